use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once at startup from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.parse().ok());
        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("ROOMBOOK_PORT").unwrap_or(5433),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: lookup("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into()),
            max_connections: parse_or(lookup("ROOMBOOK_MAX_CONNECTIONS"), 256),
            compact_threshold: parse_or(lookup("ROOMBOOK_COMPACT_THRESHOLD"), 1000),
            metrics_port: parsed("ROOMBOOK_METRICS_PORT"),
            tls_cert: lookup("ROOMBOOK_TLS_CERT"),
            tls_key: lookup("ROOMBOOK_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/reservations.wal"));
        assert_eq!(config.password, "roombook");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.tls_cert, None);
        assert_eq!(config.tls_key, None);
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_PORT", "6000"),
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_MAX_CONNECTIONS", "8"),
            ("ROOMBOOK_COMPACT_THRESHOLD", "50"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_PASSWORD", "hunter2"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(
            config.wal_path(),
            PathBuf::from("/var/lib/roombook/reservations.wal")
        );
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.password, "hunter2");
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("ROOMBOOK_PORT", "http"),
            ("ROOMBOOK_MAX_CONNECTIONS", "-1"),
            ("ROOMBOOK_METRICS_PORT", "99999"),
        ]);
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
    }
}
