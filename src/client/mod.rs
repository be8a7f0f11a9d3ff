//! Producer-client abstraction: trait, record/stat types, and builder factory.
//!
//! The broker client is consumed as an opaque capability set: a non-blocking
//! `try_produce`, a cooperative `poll` drain, a blocking `flush`, a `close`,
//! and a periodic feed of cumulative counters delivered over a channel.

pub mod config;
#[cfg(feature = "client-kafka")]
pub mod kafka;
#[cfg(any(test, feature = "client-mock"))]
pub mod mock;

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

#[derive(Clone, Debug)]
pub enum Engine {
    Kafka,
    #[cfg(any(test, feature = "client-mock"))]
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("local outbound queue full")]
    BufferFull,
    #[error("record rejected: {0}")]
    Rejected(String),
    #[error("connect: {0}")]
    Connect(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ClientError {
    /// Transient capacity condition, resolved by draining and retrying.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::BufferFull)
    }

    /// Permanent for one record only; the run continues past it.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// One message headed for the broker. Immutable once created; owned by the
/// dispatch engine between generation and hand-off to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub topic: String,
    pub key: Option<String>,
    pub value: Bytes,
}

/// Per-broker slice of a cumulative statistics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BrokerCounters {
    /// Cumulative ProduceRequest count for this broker.
    pub produce_requests: i64,
    /// Average time spent in the local outbound queue, microseconds.
    pub int_latency_avg_us: f64,
    /// Average broker round-trip time, microseconds.
    pub rtt_avg_us: f64,
}

/// Per-topic slice of a cumulative statistics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TopicCounters {
    pub batch_size_avg: f64,
}

/// Point-in-time copy of the client's cumulative counters, delivered on the
/// client's own timer. Read-only on the engine side.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CumulativeStats {
    /// Total messages transmitted so far.
    pub txmsgs: i64,
    /// Monotonic snapshot timestamp, microseconds.
    pub ts_us: i64,
    pub brokers: BTreeMap<String, BrokerCounters>,
    pub topics: BTreeMap<String, TopicCounters>,
}

pub type StatsReceiver = flume::Receiver<CumulativeStats>;

#[async_trait::async_trait]
pub trait ProducerClient: Send + Sync {
    /// Hand a record to the local outbound queue without blocking. On failure
    /// the record is returned to the caller so it can be retried verbatim.
    fn try_produce(&self, record: Record) -> Result<(), (ClientError, Record)>;

    /// Serve pending delivery events and callbacks. A zero timeout must not
    /// block.
    async fn poll(&self, timeout: Duration);

    /// Block until every in-flight record is acknowledged or failed.
    async fn flush(&self) -> Result<(), ClientError>;

    /// Release the underlying handle. Must be idempotent after `flush` and
    /// must not re-raise errors that flush already surfaced.
    async fn close(&self) -> Result<(), ClientError>;
}

pub struct ClientBuilder;

impl ClientBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<(Box<dyn ProducerClient>, StatsReceiver), ClientError> {
        match engine {
            Engine::Kafka => {
                #[cfg(feature = "client-kafka")]
                {
                    return crate::client::kafka::connect(opts).await;
                }
                #[cfg(not(feature = "client-kafka"))]
                {
                    Err(ClientError::Connect("kafka feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "client-mock"))]
            Engine::Mock => crate::client::mock::connect(opts).await,
        }
    }
}
