//! Backpressure-tolerant dispatch loop.
//!
//! One task drives corpus→router→client hand-off for every message. Records
//! are never dropped on a full queue: a full queue yields a bounded
//! cooperative drain and a retry of the same record. Shutdown always routes
//! through flush-then-close, even after a fatal error.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::client::{ClientError, ProducerClient, Record};
use crate::corpus::{Corpus, TopicRouter};

/// How long one cooperative drain waits when the outbound queue is full.
const BACKPRESSURE_DRAIN: Duration = Duration::from_millis(500);

const PROGRESS_EVERY: u64 = 100_000;

/// Per-topic buffers used in aggregated mode. Cleared on every flush; never
/// retains records across a flush boundary.
#[derive(Debug, Default)]
struct PendingBatch {
    buffers: BTreeMap<String, Vec<Record>>,
    buffered: usize,
    peak: usize,
}

impl PendingBatch {
    fn push(&mut self, record: Record) {
        self.buffers
            .entry(record.topic.clone())
            .or_default()
            .push(record);
        self.buffered += 1;
        self.peak = self.peak.max(self.buffered);
    }

    fn take(&mut self) -> BTreeMap<String, Vec<Record>> {
        self.buffered = 0;
        std::mem::take(&mut self.buffers)
    }

    fn len(&self) -> usize {
        self.buffered
    }

    fn is_empty(&self) -> bool {
        self.buffered == 0
    }
}

/// Retry state for one record's hand-off.
enum SendState {
    Attempting(Record),
    BackpressureWait(Record),
    Delivered,
}

#[derive(Debug, Default)]
struct LoopCounts {
    delivered: u64,
    rejected: u64,
    batch_flushes: u64,
    peak_buffered: usize,
}

/// What the run did, for logging and assertions. Totals for the external
/// report come from the sampler, not from here.
#[derive(Debug)]
pub struct DispatchSummary {
    /// Wall clock from before the first send until after the final flush.
    pub elapsed: Duration,
    pub delivered: u64,
    pub rejected: u64,
    /// Threshold-triggered PendingBatch flushes (aggregated mode only).
    pub batch_flushes: u64,
    pub peak_buffered: usize,
}

pub struct DispatchEngine {
    client: Box<dyn ProducerClient>,
    corpus: Corpus,
    router: TopicRouter,
}

impl DispatchEngine {
    pub fn new(client: Box<dyn ProducerClient>, corpus: Corpus, router: TopicRouter) -> Self {
        Self {
            client,
            corpus,
            router,
        }
    }

    /// Drive the full benchmark. Returns after every message has been handed
    /// to the client and a final flush completed, or after an unrecoverable
    /// fault. The client handle is flushed and closed on every path.
    pub async fn run(
        self,
        total_messages: u64,
        aggregation_threshold: usize,
    ) -> Result<DispatchSummary, ClientError> {
        let started = Instant::now();
        let outcome = self
            .dispatch_all(total_messages, aggregation_threshold)
            .await;
        if let Err(err) = &outcome {
            error!("fatal dispatch error, shutting down: {err}");
        }
        let flushed = self.client.flush().await;
        if let Err(err) = &flushed {
            error!("final flush failed: {err}");
        }
        let elapsed = started.elapsed();
        if let Err(err) = self.client.close().await {
            error!("close failed: {err}");
        }
        let counts = outcome?;
        flushed?;
        let summary = DispatchSummary {
            elapsed,
            delivered: counts.delivered,
            rejected: counts.rejected,
            batch_flushes: counts.batch_flushes,
            peak_buffered: counts.peak_buffered,
        };
        debug!(
            delivered = summary.delivered,
            rejected = summary.rejected,
            batch_flushes = summary.batch_flushes,
            peak_buffered = summary.peak_buffered,
            "dispatch complete"
        );
        Ok(summary)
    }

    async fn dispatch_all(
        &self,
        total_messages: u64,
        aggregation_threshold: usize,
    ) -> Result<LoopCounts, ClientError> {
        let aggregated = aggregation_threshold > 1;
        let mut counts = LoopCounts::default();
        let mut pending = PendingBatch::default();
        for index in 0..total_messages {
            let record = self.router.route(index, &self.corpus);
            if aggregated {
                pending.push(record);
                if (index + 1) % aggregation_threshold as u64 == 0 {
                    self.drain_pending(&mut pending, &mut counts).await?;
                    counts.batch_flushes += 1;
                }
            } else {
                self.send(record, &mut counts).await?;
            }
            if (index + 1) % PROGRESS_EVERY == 0 {
                info!("sent {} records", index + 1);
            }
        }
        if aggregated && !pending.is_empty() {
            debug!(leftover = pending.len(), "draining partial batch");
            self.drain_pending(&mut pending, &mut counts).await?;
        }
        counts.peak_buffered = pending.peak;
        Ok(counts)
    }

    /// Send every buffered record across all topics, then clear the batch.
    /// The cadence is global on purpose: all topics flush together.
    async fn drain_pending(
        &self,
        pending: &mut PendingBatch,
        counts: &mut LoopCounts,
    ) -> Result<(), ClientError> {
        for (_topic, records) in pending.take() {
            for record in records {
                self.send(record, counts).await?;
            }
        }
        Ok(())
    }

    /// Hand one record to the client, riding out BufferFull with cooperative
    /// drains. A rejected record is logged and skipped; anything else aborts.
    async fn send(&self, record: Record, counts: &mut LoopCounts) -> Result<(), ClientError> {
        let mut state = SendState::Attempting(record);
        loop {
            state = match state {
                SendState::Attempting(record) => match self.client.try_produce(record) {
                    Ok(()) => SendState::Delivered,
                    Err((ClientError::BufferFull, record)) => {
                        debug!("outbound queue full, waiting for deliveries");
                        SendState::BackpressureWait(record)
                    }
                    Err((ClientError::Rejected(reason), record)) => {
                        error!(topic = %record.topic, "record rejected, skipping: {reason}");
                        counts.rejected += 1;
                        return Ok(());
                    }
                    Err((err, _)) => return Err(err),
                },
                SendState::BackpressureWait(record) => {
                    self.client.poll(BACKPRESSURE_DRAIN).await;
                    SendState::Attempting(record)
                }
                SendState::Delivered => {
                    counts.delivered += 1;
                    // zero-timeout drain so delivery callbacks and the stats
                    // timer fire promptly without stalling the loop
                    self.client.poll(Duration::ZERO).await;
                    return Ok(());
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedInner {
        // outcome per try_produce call, front first; empty means accept
        plan: Mutex<VecDeque<ClientError>>,
        produced: Mutex<Vec<Record>>,
        drain_polls: AtomicU64,
        zero_polls: AtomicU64,
        flushes: AtomicU64,
        closes: AtomicU64,
    }

    #[derive(Clone, Default)]
    struct ScriptedClient {
        inner: Arc<ScriptedInner>,
    }

    impl ScriptedClient {
        fn plan_failures(&self, failures: impl IntoIterator<Item = ClientError>) {
            self.inner.plan.lock().unwrap().extend(failures);
        }

        fn produced(&self) -> Vec<Record> {
            self.inner.produced.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ProducerClient for ScriptedClient {
        fn try_produce(&self, record: Record) -> Result<(), (ClientError, Record)> {
            if let Some(err) = self.inner.plan.lock().unwrap().pop_front() {
                return Err((err, record));
            }
            self.inner.produced.lock().unwrap().push(record);
            Ok(())
        }

        async fn poll(&self, timeout: Duration) {
            if timeout.is_zero() {
                self.inner.zero_polls.fetch_add(1, Ordering::SeqCst);
            } else {
                self.inner.drain_polls.fetch_add(1, Ordering::SeqCst);
            }
        }

        async fn flush(&self) -> Result<(), ClientError> {
            self.inner.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), ClientError> {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(client: &ScriptedClient, nb_topics: usize) -> DispatchEngine {
        DispatchEngine::new(
            Box::new(client.clone()),
            Corpus::generate(10, nb_topics),
            TopicRouter::new("sample", nb_topics, false),
        )
    }

    #[tokio::test]
    async fn buffer_full_retries_same_record_until_delivered() {
        let client = ScriptedClient::default();
        client.plan_failures([
            ClientError::BufferFull,
            ClientError::BufferFull,
            ClientError::BufferFull,
        ]);
        let summary = engine(&client, 1).run(1, 1).await.unwrap();
        assert_eq!(summary.delivered, 1);
        // exactly one copy handed over, no duplication or loss
        assert_eq!(client.produced().len(), 1);
        assert!(client.inner.drain_polls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn rejected_record_is_skipped_and_run_continues() {
        let client = ScriptedClient::default();
        client.plan_failures([ClientError::Rejected("bad record".into())]);
        let summary = engine(&client, 1).run(3, 1).await.unwrap();
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(client.produced().len(), 2);
    }

    #[tokio::test]
    async fn fatal_error_still_flushes_and_closes() {
        let client = ScriptedClient::default();
        client.plan_failures([ClientError::Fatal("broker gone".into())]);
        let result = engine(&client, 1).run(5, 1).await;
        assert!(matches!(result, Err(ClientError::Fatal(_))));
        assert_eq!(client.inner.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(client.inner.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn direct_mode_polls_after_every_hand_off() {
        let client = ScriptedClient::default();
        let summary = engine(&client, 1).run(4, 1).await.unwrap();
        assert_eq!(summary.delivered, 4);
        assert_eq!(client.inner.zero_polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn aggregation_cadence_flushes_globally_and_drains_leftovers() {
        let client = ScriptedClient::default();
        let summary = engine(&client, 2).run(10, 4).await.unwrap();
        // threshold 4 over 10 messages: cadence flushes after 4 and 8, the
        // last 2 records drain before the client flush
        assert_eq!(summary.batch_flushes, 2);
        assert_eq!(summary.delivered, 10);
        assert!(summary.peak_buffered <= 2 * 4);
        let produced = client.produced();
        assert_eq!(produced.len(), 10);
        // per-topic submission order is preserved across batch boundaries
        let sample_0: Vec<&Record> =
            produced.iter().filter(|r| r.topic == "sample_0").collect();
        assert_eq!(sample_0.len(), 5);
    }

    #[tokio::test]
    async fn aggregated_mode_rides_out_backpressure_during_drain() {
        let client = ScriptedClient::default();
        client.plan_failures([ClientError::BufferFull, ClientError::BufferFull]);
        let summary = engine(&client, 2).run(6, 3).await.unwrap();
        assert_eq!(summary.delivered, 6);
        assert_eq!(client.produced().len(), 6);
    }
}
