//! Statistics sampler: turns the client's cumulative counter feed into
//! interval rate metrics.
//!
//! Snapshots arrive on the client's timer, a different thread of control
//! than the dispatch loop, so the checkpoint lives behind a mutex. Each
//! observation derives its metrics from the previously stored checkpoint and
//! only then advances it; updating first would make every interval report a
//! zero delta.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, trace};

use crate::client::{CumulativeStats, StatsReceiver};
use crate::report::{self, FinalReport};

/// Last cumulative values seen, the baseline for the next interval.
#[derive(Debug, Default)]
pub struct SamplerState {
    pub last_request_count: i64,
    pub last_txmsgs: i64,
    pub last_ts_secs: f64,
}

/// Rate metrics for one sampling interval. Derived, printed, never stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IntervalMetrics {
    pub send_rate: f64,
    pub queue_time_ms: f64,
    pub batch_size: f64,
    pub request_rate: f64,
    pub request_latency_ms: f64,
    pub records_per_request: f64,
}

#[derive(Clone, Default)]
pub struct StatsSampler {
    state: Arc<Mutex<SamplerState>>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (mut sum, mut count) = (0.0, 0u32);
    for v in values {
        sum += v;
        count += 1;
    }
    if count > 0 { sum / count as f64 } else { 0.0 }
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive interval metrics from one cumulative snapshot and advance the
    /// checkpoint.
    pub fn observe(&self, stats: &CumulativeStats) -> IntervalMetrics {
        let request_count: i64 = stats.brokers.values().map(|b| b.produce_requests).sum();
        let batch_size = mean(stats.topics.values().map(|t| t.batch_size_avg));
        let queue_time_ms = mean(stats.brokers.values().map(|b| b.int_latency_avg_us)) / 1_000.0;
        let request_latency_ms = mean(stats.brokers.values().map(|b| b.rtt_avg_us)) / 1_000.0;
        let ts_secs = stats.ts_us as f64 / 1_000_000.0;

        let mut checkpoint = self.state.lock().unwrap();
        let elapsed = (ts_secs - checkpoint.last_ts_secs).max(0.0);
        let request_rate = if elapsed > 0.0 {
            (request_count - checkpoint.last_request_count) as f64 / elapsed
        } else {
            request_count as f64
        };
        let send_rate = if elapsed > 0.0 {
            (stats.txmsgs - checkpoint.last_txmsgs) as f64 / elapsed
        } else {
            stats.txmsgs as f64
        };
        // 0 when either rate is 0; a NaN or infinity must never escape
        let records_per_request = if send_rate > 0.0 && request_rate > 0.0 {
            (send_rate / request_rate * 100.0).round() / 100.0
        } else {
            0.0
        };
        checkpoint.last_ts_secs = ts_secs;
        checkpoint.last_txmsgs = stats.txmsgs;
        checkpoint.last_request_count = request_count;

        IntervalMetrics {
            send_rate,
            queue_time_ms,
            batch_size,
            request_rate,
            request_latency_ms,
            records_per_request,
        }
    }

    /// Final totals are the last values the sampler observed, never a count
    /// kept separately by the dispatch side.
    pub fn final_report(&self, elapsed: Duration) -> FinalReport {
        let checkpoint = self.state.lock().unwrap();
        FinalReport {
            total_messages_sent: checkpoint.last_txmsgs,
            total_requests: checkpoint.last_request_count,
            elapsed,
        }
    }
}

/// Consume the stats channel until the client drops its sender, emitting one
/// interval line per snapshot.
pub async fn run_sampler(sampler: StatsSampler, stats_rx: StatsReceiver) {
    while let Ok(snapshot) = stats_rx.recv_async().await {
        if let Ok(raw) = serde_json::to_string(&snapshot) {
            trace!("stats snapshot: {raw}");
        }
        let metrics = sampler.observe(&snapshot);
        info!("{}", report::interval_line(&metrics));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BrokerCounters, TopicCounters};
    use std::collections::BTreeMap;

    fn snapshot(txmsgs: i64, requests: i64, ts_secs: f64) -> CumulativeStats {
        let mut brokers = BTreeMap::new();
        brokers.insert(
            "broker-1".to_string(),
            BrokerCounters {
                produce_requests: requests,
                int_latency_avg_us: 4_000.0,
                rtt_avg_us: 12_000.0,
            },
        );
        let mut topics = BTreeMap::new();
        topics.insert(
            "sample_0".to_string(),
            TopicCounters {
                batch_size_avg: 8.0,
            },
        );
        CumulativeStats {
            txmsgs,
            ts_us: (ts_secs * 1_000_000.0) as i64,
            brokers,
            topics,
        }
    }

    #[test]
    fn known_deltas_reproduce_hand_computed_rates() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(1_000, 10, 1.0));
        let metrics = sampler.observe(&snapshot(5_000, 30, 3.0));
        assert!((metrics.send_rate - 2_000.0).abs() < 1e-9);
        assert!((metrics.request_rate - 10.0).abs() < 1e-9);
        assert!((metrics.records_per_request - 200.0).abs() < 1e-9);
        assert!((metrics.queue_time_ms - 4.0).abs() < 1e-9);
        assert!((metrics.request_latency_ms - 12.0).abs() < 1e-9);
        assert!((metrics.batch_size - 8.0).abs() < 1e-9);
    }

    #[test]
    fn equal_consecutive_snapshots_yield_zero_rates() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(1_000, 10, 1.0));
        let metrics = sampler.observe(&snapshot(1_000, 10, 2.0));
        assert_eq!(metrics.send_rate, 0.0);
        assert_eq!(metrics.request_rate, 0.0);
        assert_eq!(metrics.records_per_request, 0.0);
    }

    #[test]
    fn zero_request_rate_never_produces_nan_or_infinity() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(0, 0, 1.0));
        // messages moved but no new requests were reported
        let mut next = snapshot(500, 0, 2.0);
        next.brokers.get_mut("broker-1").unwrap().produce_requests = 0;
        let metrics = sampler.observe(&next);
        assert!(metrics.send_rate > 0.0);
        assert_eq!(metrics.request_rate, 0.0);
        assert_eq!(metrics.records_per_request, 0.0);
        assert!(metrics.records_per_request.is_finite());
    }

    #[test]
    fn zero_elapsed_falls_back_to_cumulative_values() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(1_000, 10, 1.0));
        let metrics = sampler.observe(&snapshot(1_500, 15, 1.0));
        assert_eq!(metrics.send_rate, 1_500.0);
        assert_eq!(metrics.request_rate, 15.0);
    }

    #[test]
    fn empty_broker_and_topic_maps_report_zero_means() {
        let sampler = StatsSampler::new();
        let empty = CumulativeStats {
            txmsgs: 0,
            ts_us: 1_000_000,
            ..Default::default()
        };
        let metrics = sampler.observe(&empty);
        assert_eq!(metrics.batch_size, 0.0);
        assert_eq!(metrics.queue_time_ms, 0.0);
        assert_eq!(metrics.request_latency_ms, 0.0);
    }

    #[test]
    fn records_per_request_rounds_to_two_decimals() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(0, 0, 1.0));
        // 1000 msgs over 3 requests in one second -> 333.33 records/request
        let metrics = sampler.observe(&snapshot(1_000, 3, 2.0));
        assert!((metrics.records_per_request - 333.33).abs() < 1e-9);
    }

    #[test]
    fn final_report_uses_last_observed_values() {
        let sampler = StatsSampler::new();
        sampler.observe(&snapshot(1_000, 10, 1.0));
        sampler.observe(&snapshot(4_200, 17, 2.0));
        let report = sampler.final_report(Duration::from_secs(2));
        assert_eq!(report.total_messages_sent, 4_200);
        assert_eq!(report.total_requests, 17);
    }
}
