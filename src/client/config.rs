use super::{ConnectOptions, Engine};

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_lowercase().as_str() {
        "kafka" => Some(Engine::Kafka),
        #[cfg(any(test, feature = "client-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

pub fn parse_connect_kv(pairs: &[String]) -> ConnectOptions {
    let mut opts = ConnectOptions::default();
    for p in pairs {
        if let Some((k, v)) = p.split_once('=') {
            opts.params.insert(k.to_string(), v.to_string());
        }
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_engines() {
        assert!(matches!(parse_engine("kafka"), Some(Engine::Kafka)));
        assert!(matches!(parse_engine("Mock"), Some(Engine::Mock)));
        assert!(parse_engine("pulsar").is_none());
    }

    #[test]
    fn parses_connect_pairs() {
        let opts = parse_connect_kv(&[
            "bootstrap.servers=localhost:9092".to_string(),
            "acks=all".to_string(),
            "not-a-pair".to_string(),
        ]);
        assert_eq!(
            opts.params.get("bootstrap.servers").map(String::as_str),
            Some("localhost:9092")
        );
        assert_eq!(opts.params.get("acks").map(String::as_str), Some("all"));
        assert_eq!(opts.params.len(), 2);
    }
}
