//! Benchmark configuration and broker parameter pass-through.

use std::collections::BTreeMap;
use std::env;

use crate::client::ConnectOptions;
use crate::client::config::parse_connect_kv;

pub const BROKER_ENV_PREFIX: &str = "KAFKA_";

#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub topic_prefix: String,
    pub message_size: usize,
    pub nb_messages: u64,
    pub reporting_interval_ms: u64,
    pub nb_topics: usize,
    pub use_random_keys: bool,
    pub aggregation_threshold: usize,
}

impl BenchmarkConfig {
    /// Broker connection parameters: explicit `--connect key=value` pairs win
    /// over `KAFKA_*` environment variables; the statistics interval the
    /// sampler depends on is always set from the benchmark config.
    pub fn connect_options(&self, extra: &[String]) -> ConnectOptions {
        let mut opts = parse_connect_kv(extra);
        for (key, value) in broker_params(env::vars()) {
            opts.params.entry(key).or_insert(value);
        }
        opts.params.insert(
            "statistics.interval.ms".to_string(),
            self.reporting_interval_ms.to_string(),
        );
        opts
    }
}

/// `KAFKA_BOOTSTRAP_SERVERS=host` becomes `bootstrap.servers=host`.
fn broker_params(
    vars: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(BROKER_ENV_PREFIX)
                .map(|rest| (rest.replace('_', ".").to_lowercase(), value))
        })
        .collect()
}
