use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process settings, read once from `COURTBOOK_*` environment variables.
/// Missing or unparsable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// JSON array of courts upserted at start-up.
    pub catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            catalog: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("COURTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "COURTBOOK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "COURTBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed(&lookup, "COURTBOOK_SWEEP_INTERVAL_SECS")
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            catalog: lookup("COURTBOOK_CATALOG").map(PathBuf::from),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn empty_env_is_default() {
        assert_eq!(config_from(&[]), Config::default());
    }

    #[test]
    fn reads_every_key() {
        let config = config_from(&[
            ("COURTBOOK_DATA_DIR", "/var/lib/courtbook"),
            ("COURTBOOK_METRICS_PORT", "9100"),
            ("COURTBOOK_COMPACT_THRESHOLD", "50"),
            ("COURTBOOK_SWEEP_INTERVAL_SECS", "5"),
            ("COURTBOOK_CATALOG", "courts.json"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/courtbook"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.catalog, Some(PathBuf::from("courts.json")));
    }

    #[test]
    fn garbage_falls_back() {
        let config = config_from(&[
            ("COURTBOOK_METRICS_PORT", "ninety"),
            ("COURTBOOK_COMPACT_THRESHOLD", "-1"),
            ("COURTBOOK_SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
