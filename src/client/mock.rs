//! In-memory client adapter: a bounded outbound queue drained by `poll`.
//!
//! Each non-empty drain counts as one synthetic ProduceRequest, queue-wait
//! latency is measured for real, and a timer task publishes cumulative
//! counters on `statistics.interval.ms`, so the sampler sees the same shape
//! of feed it would get from a real broker client.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::{
    BrokerCounters, ClientError, ConnectOptions, CumulativeStats, ProducerClient, Record,
    StatsReceiver, TopicCounters,
};

const DEFAULT_QUEUE_CAPACITY: usize = 100_000;
const DEFAULT_STATS_INTERVAL_MS: u64 = 1_000;
const BROKER_NAME: &str = "mock:9092";

#[derive(Default)]
struct TopicDrains {
    batches: u64,
    records: u64,
}

struct Shared {
    queue: Mutex<VecDeque<(Record, Instant)>>,
    capacity: usize,
    txmsgs: AtomicI64,
    produce_requests: AtomicI64,
    queue_wait_total_us: AtomicI64,
    topic_drains: Mutex<BTreeMap<String, TopicDrains>>,
    origin: Instant,
    stats_tx: flume::Sender<CumulativeStats>,
}

impl Shared {
    /// Move every queued record to the delivered side, accounting one
    /// ProduceRequest for the whole drain.
    fn drain(&self) {
        let drained: Vec<(Record, Instant)> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        self.produce_requests.fetch_add(1, Ordering::Relaxed);
        let mut per_topic: BTreeMap<String, u64> = BTreeMap::new();
        let mut wait_us = 0i64;
        for (record, enqueued_at) in &drained {
            *per_topic.entry(record.topic.clone()).or_default() += 1;
            wait_us += enqueued_at.elapsed().as_micros() as i64;
        }
        self.queue_wait_total_us.fetch_add(wait_us, Ordering::Relaxed);
        self.txmsgs.fetch_add(drained.len() as i64, Ordering::Relaxed);
        let mut drains = self.topic_drains.lock().unwrap();
        for (topic, count) in per_topic {
            let entry = drains.entry(topic).or_default();
            entry.batches += 1;
            entry.records += count;
        }
    }

    fn snapshot(&self) -> CumulativeStats {
        let txmsgs = self.txmsgs.load(Ordering::Relaxed);
        let wait_total = self.queue_wait_total_us.load(Ordering::Relaxed);
        let mut brokers = BTreeMap::new();
        brokers.insert(
            BROKER_NAME.to_string(),
            BrokerCounters {
                produce_requests: self.produce_requests.load(Ordering::Relaxed),
                int_latency_avg_us: if txmsgs > 0 {
                    wait_total as f64 / txmsgs as f64
                } else {
                    0.0
                },
                rtt_avg_us: 0.0,
            },
        );
        let topics = self
            .topic_drains
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, drains)| {
                (
                    topic.clone(),
                    TopicCounters {
                        batch_size_avg: if drains.batches > 0 {
                            drains.records as f64 / drains.batches as f64
                        } else {
                            0.0
                        },
                    },
                )
            })
            .collect();
        CumulativeStats {
            txmsgs,
            ts_us: self.origin.elapsed().as_micros() as i64,
            brokers,
            topics,
        }
    }
}

pub struct MockClient {
    shared: Arc<Shared>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

fn param<T: std::str::FromStr>(
    opts: &ConnectOptions,
    key: &str,
    default: T,
) -> Result<T, ClientError> {
    match opts.params.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ClientError::Connect(format!("invalid {key}: {raw}"))),
        None => Ok(default),
    }
}

pub(super) async fn connect(
    opts: ConnectOptions,
) -> Result<(Box<dyn ProducerClient>, StatsReceiver), ClientError> {
    let capacity = param(&opts, "queue.buffering.max.messages", DEFAULT_QUEUE_CAPACITY)?;
    let interval_ms = param(&opts, "statistics.interval.ms", DEFAULT_STATS_INTERVAL_MS)?;
    let (stats_tx, stats_rx) = flume::unbounded();
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        capacity,
        txmsgs: AtomicI64::new(0),
        produce_requests: AtomicI64::new(0),
        queue_wait_total_us: AtomicI64::new(0),
        topic_drains: Mutex::new(BTreeMap::new()),
        origin: Instant::now(),
        stats_tx,
    });
    let stats_task = if interval_ms > 0 {
        let shared = Arc::clone(&shared);
        Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_millis(interval_ms));
            timer.tick().await; // the first tick fires immediately
            loop {
                timer.tick().await;
                if shared.stats_tx.send(shared.snapshot()).is_err() {
                    break;
                }
            }
        }))
    } else {
        None
    };
    let client = MockClient {
        shared,
        stats_task: Mutex::new(stats_task),
    };
    Ok((Box::new(client), stats_rx))
}

#[async_trait::async_trait]
impl ProducerClient for MockClient {
    fn try_produce(&self, record: Record) -> Result<(), (ClientError, Record)> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.capacity {
            return Err((ClientError::BufferFull, record));
        }
        queue.push_back((record, Instant::now()));
        Ok(())
    }

    async fn poll(&self, timeout: Duration) {
        self.shared.drain();
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
    }

    async fn flush(&self) -> Result<(), ClientError> {
        self.shared.drain();
        // Flush forces one last counter publication so the final report sees
        // fully drained totals even with a long statistics interval.
        let _ = self.shared.stats_tx.send(self.shared.snapshot());
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if let Some(task) = self.stats_task.lock().unwrap().take() {
            task.abort();
        }
        Ok(())
    }
}
