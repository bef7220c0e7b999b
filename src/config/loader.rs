use super::error::ConfigError;
use super::model::Config;
use std::path::{Path, PathBuf};

/// Loads a [`Config`] from `path`, applies environment overrides, upgrades
/// the legacy single-URL form, and validates the result. This is the single
/// entry point startup uses; later cycles persist back through [`save`].
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut config: Config = serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    apply_env_overrides(&mut config);
    config.upgrade_legacy_sync_url();
    validate(&config)?;
    Ok(config)
}

/// Persists `config` back to `path` as YAML, overwriting its prior contents.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let data = serde_yaml::to_string(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Applies the environment overrides documented in the external interfaces
/// section, each taking effect only when the corresponding field is at its
/// zero value (empty string / zero number / false).
pub fn apply_env_overrides(config: &mut Config) {
    if config.sync_url.is_empty() {
        if let Ok(v) = std::env::var("sync_url") {
            config.sync_url = v;
        }
    }
    if config.proxy_url.is_empty() {
        if let Ok(v) = std::env::var("proxy_url") {
            config.proxy_url = v;
        }
    }
    if config.api_key.is_empty() {
        if let Ok(v) = std::env::var("api_key") {
            config.api_key = v;
        }
    }
    if config.interval_sec == 0 {
        if let Some(v) = env_u64("interval_sec") {
            config.interval_sec = v;
        }
    }
    if config.working_dir.is_empty() {
        if let Ok(v) = std::env::var("working_dir") {
            config.working_dir = v;
        }
    }
    if config.sentry_dsn.is_none() {
        if let Ok(v) = std::env::var("sentry_dsn") {
            config.sentry_dsn = Some(v);
        }
    }
    if !config.full_control_supervisord {
        if let Ok(v) = std::env::var("full_control_supervisord") {
            config.full_control_supervisord = v.eq_ignore_ascii_case("true") || v == "1";
        }
    }
    if config.supervisor_base_config_path.is_empty() {
        if let Ok(v) = std::env::var("supervisor_base_config_path") {
            config.supervisor_base_config_path = v;
        }
    }
    if config.safe_stats_size == 0 {
        if let Some(v) = env_u64("safe_stats_size") {
            config.safe_stats_size = v;
        }
    }
    if config.each_collection_size == 0 {
        if let Some(v) = env_u64("each_collection_size") {
            config.each_collection_size = v;
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Checks the startup invariants: at least one sync endpoint, a non-empty
/// API key, a non-empty working directory, and (when full-control is
/// enabled) a base supervisor config that exists on disk.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.sync_urls.is_empty() {
        return Err(ConfigError::Invalid("no sync endpoint configured".into()));
    }
    if config.api_key.is_empty() {
        return Err(ConfigError::Invalid("api_key not set".into()));
    }
    if config.working_dir.is_empty() {
        return Err(ConfigError::Invalid("working_dir not set".into()));
    }
    if config.full_control_supervisord {
        let base: PathBuf = config.supervisor_base_config_path.clone().into();
        if !base.exists() {
            return Err(ConfigError::Invalid(format!(
                "supervisor_base_config_path `{}` does not exist",
                base.display()
            )));
        }
    }
    for spec in &config.sync_urls {
        if url::Url::parse(&spec.url).is_err() {
            return Err(ConfigError::Invalid(format!("sync endpoint `{}` is not a valid URL", spec.url)));
        }
        if !spec.proxy_url.is_empty() && url::Url::parse(&spec.proxy_url).is_err() {
            return Err(ConfigError::Invalid(format!("proxy url `{}` is not a valid URL", spec.proxy_url)));
        }
    }
    Ok(())
}

/// Creates `logs/` and `supervisor/` under `working_dir`, 0755, if absent.
pub fn ensure_working_dirs(config: &Config) -> std::io::Result<()> {
    create_dir_0755(&config.logs_dir())?;
    create_dir_0755(&config.supervisor_dir())
}

#[cfg(unix)]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::UrlSpec;
    use serial_test::serial;
    use tempfile::tempdir;

    fn clear_env() {
        for key in [
            "sync_url",
            "proxy_url",
            "api_key",
            "interval_sec",
            "working_dir",
            "sentry_dsn",
            "full_control_supervisord",
            "supervisor_base_config_path",
            "safe_stats_size",
            "each_collection_size",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn load_merges_env_and_upgrades_legacy_url() {
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "sync_url: https://a.example/sync\napi_key: K\nworking_dir: /tmp/agent\n",
        )
        .unwrap();
        std::env::set_var("interval_sec", "7");

        let config = load(&path).unwrap();
        assert_eq!(config.interval_sec, 7);
        assert_eq!(config.sync_urls, vec![UrlSpec {
            url: "https://a.example/sync".into(),
            proxy_url: String::new(),
            weight: 1,
        }]);
        clear_env();
    }

    #[test]
    #[serial]
    fn env_override_skipped_when_field_already_set() {
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api_key: FROM_FILE\nworking_dir: /tmp\nsync_url: https://x\n").unwrap();
        std::env::set_var("api_key", "FROM_ENV");

        let config = load(&path).unwrap();
        assert_eq!(config.api_key, "FROM_FILE");
        clear_env();
    }

    #[test]
    #[serial]
    fn validate_rejects_missing_fields() {
        clear_env();
        let empty = Config::default();
        assert!(validate(&empty).is_err());
    }

    #[test]
    #[serial]
    fn validate_requires_base_config_when_full_control() {
        clear_env();
        let cfg = Config {
            sync_urls: vec![UrlSpec {
                url: "https://a".into(),
                proxy_url: String::new(),
                weight: 1,
            }],
            api_key: "K".into(),
            working_dir: "/tmp".into(),
            full_control_supervisord: true,
            supervisor_base_config_path: "/nonexistent/base.conf".into(),
            ..Default::default()
        };
        assert!(validate(&cfg).is_err());
    }

    #[test]
    #[serial]
    fn save_round_trips() {
        clear_env();
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = Config {
            sync_urls: vec![UrlSpec {
                url: "https://a".into(),
                proxy_url: String::new(),
                weight: 1,
            }],
            api_key: "K".into(),
            working_dir: "/tmp".into(),
            ..Default::default()
        };
        save(&path, &cfg).unwrap();
        let reloaded: Config = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.api_key, "K");
    }
}
