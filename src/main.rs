use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing::info;

use produce_bench::client::ClientBuilder;
use produce_bench::client::config::parse_engine;
use produce_bench::config::BenchmarkConfig;
use produce_bench::corpus::{Corpus, TopicRouter};
use produce_bench::dispatch::DispatchEngine;
use produce_bench::logging;
use produce_bench::report;
use produce_bench::sampler::{StatsSampler, run_sampler};

#[derive(Parser)]
#[command(name = "produce-bench")]
#[command(about = "Producer throughput benchmark harness")]
struct Cli {
    /// Client engine (kafka, mock)
    #[arg(long, default_value = "mock")]
    engine: String,

    /// Topic name prefix
    #[arg(long, env = "TOPIC_PREFIX", default_value = "sample")]
    topic_prefix: String,

    /// Payload size in bytes
    #[arg(long, env = "MESSAGE_SIZE", default_value = "200")]
    message_size: usize,

    /// Total number of messages to produce
    #[arg(long, env = "NB_MESSAGES", default_value = "1000000")]
    nb_messages: u64,

    /// Statistics interval in milliseconds
    #[arg(long, env = "REPORTING_INTERVAL", default_value = "1000")]
    reporting_interval: u64,

    /// Number of topics written round-robin
    #[arg(long, env = "NB_TOPICS", default_value = "1")]
    nb_topics: usize,

    /// Key every record with a pre-generated identifier
    #[arg(long, env = "USE_RANDOM_KEYS", default_value = "true", action = ArgAction::Set)]
    use_random_keys: bool,

    /// Buffer per topic and bulk-send every this many messages (1 disables)
    #[arg(long, env = "AGG_PER_TOPIC_NB_MESSAGES", default_value = "1")]
    aggregation_threshold: usize,

    /// Extra client connection parameters
    #[arg(long = "connect", value_name = "KEY=VALUE")]
    connect: Vec<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let config = BenchmarkConfig {
        topic_prefix: cli.topic_prefix,
        message_size: cli.message_size,
        nb_messages: cli.nb_messages,
        reporting_interval_ms: cli.reporting_interval,
        nb_topics: cli.nb_topics,
        use_random_keys: cli.use_random_keys,
        aggregation_threshold: cli.aggregation_threshold,
    };
    info!(
        "Running benchmark with {} topics, {} messages of {} bytes each, random keys={}",
        config.nb_topics, config.nb_messages, config.message_size, config.use_random_keys
    );
    if config.aggregation_threshold > 1 {
        info!(
            "Will group per topic and bulk send every {} messages",
            config.aggregation_threshold
        );
    }

    let engine_kind = parse_engine(&cli.engine)
        .ok_or_else(|| anyhow::anyhow!("unknown client engine: {}", cli.engine))?;
    let (client, stats_rx) =
        ClientBuilder::connect(engine_kind, config.connect_options(&cli.connect))
            .await
            .map_err(|e| anyhow::anyhow!("client connect error: {e}"))?;

    let corpus = Corpus::generate(config.message_size, config.nb_topics);
    let router = TopicRouter::new(&config.topic_prefix, config.nb_topics, config.use_random_keys);
    let sampler = StatsSampler::new();
    let sampler_task = tokio::spawn(run_sampler(sampler.clone(), stats_rx));

    let engine = DispatchEngine::new(client, corpus, router);
    let outcome = engine
        .run(config.nb_messages, config.aggregation_threshold)
        .await;
    // run dropped the client, so the stats channel is closed; let the
    // sampler drain whatever snapshots are left before reading final totals
    let _ = sampler_task.await;
    let summary = outcome.map_err(|e| anyhow::anyhow!("benchmark failed: {e}"))?;
    info!(
        "{}",
        report::final_line(&sampler.final_report(summary.elapsed))
    );
    Ok(())
}
