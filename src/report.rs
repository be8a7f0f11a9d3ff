//! Line-oriented report formatting.
//!
//! These strings are parsed by an external log scraper; field names, order,
//! and the literal `REPORT` marker are a compatibility surface and must not
//! change.

use std::time::Duration;

use crate::sampler::IntervalMetrics;

/// Totals for the whole run, computed once at shutdown from the sampler's
/// last checkpoint and the dispatch wall clock.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalReport {
    pub total_messages_sent: i64,
    pub total_requests: i64,
    pub elapsed: Duration,
}

pub fn interval_line(metrics: &IntervalMetrics) -> String {
    format!(
        "Sent rate = {:.2}/sec, duration spent in queue = {:.2}ms, batch size = {:.2}, \
         request rate = {:.2}/sec, request latency avg = {:.2}ms, records per ProduceRequest = {:.2}",
        metrics.send_rate,
        metrics.queue_time_ms,
        metrics.batch_size,
        metrics.request_rate,
        metrics.request_latency_ms,
        metrics.records_per_request,
    )
}

pub fn final_line(report: &FinalReport) -> String {
    format!(
        "REPORT: Produced {} with {} ProduceRequest(s) in {}",
        report.total_messages_sent,
        report.total_requests,
        format_duration(report.elapsed),
    )
}

/// `h:mm:ss.mmm`, the shape the downstream scraper captures for the report
/// duration field.
fn format_duration(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = (total_secs % 60) as f64 + f64::from(elapsed.subsec_millis()) / 1_000.0;
    format!("{hours}:{minutes:02}:{seconds:06.3}")
}
