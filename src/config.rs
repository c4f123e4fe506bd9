use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine settings, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Compact the WAL once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTWISE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed(&lookup, "SLOTWISE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed(&lookup, "SLOTWISE_COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            metrics_port: parsed(&lookup, "SLOTWISE_METRICS_PORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), EngineConfig::default());
    }

    #[test]
    fn reads_all_keys() {
        let cfg = config(&[
            ("SLOTWISE_DATA_DIR", "/var/lib/slotwise"),
            ("SLOTWISE_COMPACT_THRESHOLD", "50"),
            ("SLOTWISE_COMPACT_INTERVAL_SECS", "5"),
            ("SLOTWISE_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotwise"));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.compact_interval, Duration::from_secs(5));
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = config(&[
            ("SLOTWISE_COMPACT_THRESHOLD", "lots"),
            ("SLOTWISE_METRICS_PORT", "99999"),
        ]);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
    }
}
