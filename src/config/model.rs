use serde::{Deserialize, Serialize};

pub const DEFAULT_SAFE_STATS_SIZE: u64 = 10_000_000;
pub const DEFAULT_EACH_COLLECTION_SIZE: u64 = 4_000_000;

/// One sync endpoint, optionally routed through its own proxy and weighted
/// relative to its siblings for endpoint selection (see `sync::endpoint`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlSpec {
    pub url: String,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Agent configuration. Loaded from a YAML file at startup, merged with
/// environment overrides, and later replaced wholesale by the control
/// plane's validated response config each cycle (see `controller`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Deprecated single-endpoint form; upgraded into `sync_urls` on load.
    #[serde(default)]
    pub sync_url: String,
    #[serde(default)]
    pub proxy_url: String,

    #[serde(default)]
    pub sync_urls: Vec<UrlSpec>,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub interval_sec: u64,

    #[serde(default)]
    pub working_dir: String,

    #[serde(default)]
    pub is_dev: bool,

    #[serde(default)]
    pub sentry_dsn: Option<String>,

    #[serde(default)]
    pub full_control_supervisord: bool,

    #[serde(default)]
    pub supervisor_base_config_path: String,

    #[serde(default)]
    pub safe_stats_size: u64,

    #[serde(default)]
    pub each_collection_size: u64,
}

impl Config {
    /// Returns the non-zero collection budgets, substituting the documented
    /// defaults for any field left at zero (i.e. absent from the file).
    pub fn safe_stats_size(&self) -> u64 {
        if self.safe_stats_size == 0 {
            DEFAULT_SAFE_STATS_SIZE
        } else {
            self.safe_stats_size
        }
    }

    pub fn each_collection_size(&self) -> u64 {
        if self.each_collection_size == 0 {
            DEFAULT_EACH_COLLECTION_SIZE
        } else {
            self.each_collection_size
        }
    }

    pub fn logs_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.working_dir).join("logs")
    }

    pub fn supervisor_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.working_dir).join("supervisor")
    }

    /// Upgrades the legacy `sync_url`/`proxy_url` pair into a one-entry
    /// `sync_urls` list with weight 1, when `sync_urls` is empty. A no-op
    /// otherwise. Mirrors the server-side config schema, which may still
    /// send the deprecated fields for older nodes.
    pub fn upgrade_legacy_sync_url(&mut self) {
        if self.sync_urls.is_empty() && !self.sync_url.is_empty() {
            self.sync_urls.push(UrlSpec {
                url: self.sync_url.clone(),
                proxy_url: self.proxy_url.clone(),
                weight: 1,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_legacy_single_url() {
        let mut cfg = Config {
            sync_url: "https://a.example/sync".into(),
            proxy_url: "http://proxy.example".into(),
            ..Default::default()
        };
        cfg.upgrade_legacy_sync_url();
        assert_eq!(cfg.sync_urls.len(), 1);
        assert_eq!(cfg.sync_urls[0].url, "https://a.example/sync");
        assert_eq!(cfg.sync_urls[0].proxy_url, "http://proxy.example");
        assert_eq!(cfg.sync_urls[0].weight, 1);
    }

    #[test]
    fn does_not_override_explicit_sync_urls() {
        let mut cfg = Config {
            sync_url: "https://legacy/sync".into(),
            sync_urls: vec![UrlSpec {
                url: "https://a/sync".into(),
                proxy_url: String::new(),
                weight: 2,
            }],
            ..Default::default()
        };
        cfg.upgrade_legacy_sync_url();
        assert_eq!(cfg.sync_urls.len(), 1);
        assert_eq!(cfg.sync_urls[0].url, "https://a/sync");
    }

    #[test]
    fn default_budgets_apply_when_zero() {
        let cfg = Config::default();
        assert_eq!(cfg.safe_stats_size(), DEFAULT_SAFE_STATS_SIZE);
        assert_eq!(cfg.each_collection_size(), DEFAULT_EACH_COLLECTION_SIZE);
    }
}
