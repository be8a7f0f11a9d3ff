//! Fixed payload/identifier pool and the index→record router.
//!
//! Everything random is generated up front so the measured send path pays
//! for dispatch and network only, never for the entropy source.

use bytes::Bytes;
use rand::Rng;
use uuid::Uuid;

use crate::client::Record;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Pool entries generated per topic.
const POOL_PER_TOPIC: usize = 1_000;

/// Read-only pool of pre-generated payloads and globally unique identifiers,
/// shared by every dispatch iteration.
pub struct Corpus {
    payloads: Vec<Bytes>,
    identifiers: Vec<String>,
}

impl Corpus {
    /// Build `nb_topics * 1000` random alphabetic payloads of exactly
    /// `message_size` bytes, plus an equal count of unique identifiers.
    pub fn generate(message_size: usize, nb_topics: usize) -> Self {
        let pool_size = nb_topics * POOL_PER_TOPIC;
        let mut rng = rand::rng();
        let payloads = (0..pool_size)
            .map(|_| {
                let raw: Vec<u8> = (0..message_size)
                    .map(|_| LETTERS[rng.random_range(0..LETTERS.len())])
                    .collect();
                Bytes::from(raw)
            })
            .collect();
        let identifiers = (0..pool_size)
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        Self {
            payloads,
            identifiers,
        }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn payload(&self, slot: usize) -> Bytes {
        self.payloads[slot].clone()
    }

    pub fn identifier(&self, slot: usize) -> &str {
        &self.identifiers[slot]
    }
}

/// Deterministic index→(topic, key, value) mapping: round-robin over topics,
/// cyclic reuse of the corpus pool.
pub struct TopicRouter {
    topic_names: Vec<String>,
    use_keys: bool,
}

impl TopicRouter {
    pub fn new(prefix: &str, nb_topics: usize, use_keys: bool) -> Self {
        let topic_names = (0..nb_topics).map(|i| format!("{prefix}_{i}")).collect();
        Self {
            topic_names,
            use_keys,
        }
    }

    pub fn route(&self, index: u64, corpus: &Corpus) -> Record {
        let topic = self.topic_names[(index % self.topic_names.len() as u64) as usize].clone();
        let slot = (index % corpus.len() as u64) as usize;
        Record {
            topic,
            key: self
                .use_keys
                .then(|| corpus.identifier(slot).to_string()),
            value: corpus.payload(slot),
        }
    }

    pub fn topic_names(&self) -> &[String] {
        &self.topic_names
    }
}
