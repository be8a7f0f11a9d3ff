//! rdkafka adapter: a `BaseProducer` whose client context forwards the
//! librdkafka statistics feed over the stats channel.

use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::client::ClientContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer, ProducerContext};
use rdkafka::statistics::Statistics;
use tracing::{debug, error};

use super::{
    BrokerCounters, ClientError, ConnectOptions, CumulativeStats, ProducerClient, Record,
    StatsReceiver, TopicCounters,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

struct StatsForwarder {
    stats_tx: flume::Sender<CumulativeStats>,
}

impl ClientContext for StatsForwarder {
    fn stats(&self, statistics: Statistics) {
        // Runs on a librdkafka thread; dropped snapshots after the sampler
        // has gone away are fine.
        let _ = self.stats_tx.send(convert(statistics));
    }
}

impl ProducerContext for StatsForwarder {
    type DeliveryOpaque = ();

    fn delivery(
        &self,
        delivery_result: &rdkafka::producer::DeliveryResult<'_>,
        _: Self::DeliveryOpaque,
    ) {
        if let Err((err, _)) = delivery_result {
            error!("delivery failed: {err}");
        }
    }
}

fn convert(statistics: Statistics) -> CumulativeStats {
    let brokers: BTreeMap<String, BrokerCounters> = statistics
        .brokers
        .iter()
        .map(|(name, broker)| {
            (
                name.clone(),
                BrokerCounters {
                    produce_requests: broker.req.get("Produce").copied().unwrap_or(0),
                    int_latency_avg_us: broker
                        .int_latency
                        .as_ref()
                        .map(|w| w.avg as f64)
                        .unwrap_or(0.0),
                    rtt_avg_us: broker.rtt.as_ref().map(|w| w.avg as f64).unwrap_or(0.0),
                },
            )
        })
        .collect();
    let topics: BTreeMap<String, TopicCounters> = statistics
        .topics
        .iter()
        .map(|(name, topic)| {
            (
                name.clone(),
                TopicCounters {
                    batch_size_avg: topic.batchsize.avg as f64,
                },
            )
        })
        .collect();
    CumulativeStats {
        txmsgs: statistics.txmsgs,
        ts_us: statistics.ts,
        brokers,
        topics,
    }
}

pub struct KafkaClient {
    producer: BaseProducer<StatsForwarder>,
}

pub(super) async fn connect(
    opts: ConnectOptions,
) -> Result<(Box<dyn ProducerClient>, StatsReceiver), ClientError> {
    let mut config = ClientConfig::new();
    for (key, value) in opts.params {
        config.set(key, value);
    }
    let (stats_tx, stats_rx) = flume::unbounded();
    let producer: BaseProducer<StatsForwarder> = config
        .create_with_context(StatsForwarder { stats_tx })
        .map_err(|e| ClientError::Connect(e.to_string()))?;
    Ok((Box::new(KafkaClient { producer }), stats_rx))
}

#[async_trait::async_trait]
impl ProducerClient for KafkaClient {
    fn try_produce(&self, record: Record) -> Result<(), (ClientError, Record)> {
        let send_err = {
            let payload: &[u8] = record.value.as_ref();
            let result = match &record.key {
                Some(key) => {
                    let base: BaseRecord<'_, str, [u8]> = BaseRecord::to(record.topic.as_str())
                        .payload(payload)
                        .key(key.as_str());
                    self.producer.send(base)
                }
                None => {
                    let base: BaseRecord<'_, str, [u8]> =
                        BaseRecord::to(record.topic.as_str()).payload(payload);
                    self.producer.send(base)
                }
            };
            match result {
                Ok(()) => None,
                Err((err, _)) => Some(err),
            }
        };
        match send_err {
            None => Ok(()),
            Some(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                Err((ClientError::BufferFull, record))
            }
            Some(err) => Err((ClientError::Rejected(err.to_string()), record)),
        }
    }

    async fn poll(&self, timeout: Duration) {
        tokio::task::block_in_place(|| {
            self.producer.poll(timeout);
        });
    }

    async fn flush(&self) -> Result<(), ClientError> {
        tokio::task::block_in_place(|| {
            while self.producer.in_flight_count() > 0 {
                debug!(
                    in_flight = self.producer.in_flight_count(),
                    "flushing outstanding records"
                );
                self.producer
                    .flush(FLUSH_TIMEOUT)
                    .map_err(|e| ClientError::Fatal(e.to_string()))?;
            }
            Ok(())
        })
    }

    async fn close(&self) -> Result<(), ClientError> {
        // librdkafka tears the handle down on drop; one last zero-timeout
        // poll lets terminal callbacks fire first.
        tokio::task::block_in_place(|| {
            self.producer.poll(Duration::ZERO);
        });
        Ok(())
    }
}
