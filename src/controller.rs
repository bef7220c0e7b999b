//! The outer loop: ensure the supervisor is alive, collect and upload
//! state, commit the backlog on success, reconcile desired state, sleep.
//! Exactly one cycle runs at a time; there is no concurrency here beyond
//! the external supervisor process itself.

use crate::config::{self, Config};
use crate::model::{ApiRequest, Metrics};
use crate::process;
use crate::reconcile;
use crate::supervisor::SupervisorClient;
use crate::sync;
use crate::{collector, RELEASE};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drives the agent's main loop against `config_path`, until `shutdown`
/// is observed true at the top of a cycle or before a sleep.
pub struct Controller {
    config_path: PathBuf,
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(config_path: PathBuf, config: Config, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            config_path,
            config,
            shutdown,
        }
    }

    fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs cycles forever, until `shutdown` is set. Returns normally only
    /// when shutdown is requested; any panic inside a cycle body is caught
    /// by the caller (see `bin/main.rs`), not here.
    pub fn run(&mut self) {
        while !self.should_shutdown() {
            self.run_cycle();
            if self.should_shutdown() {
                break;
            }
            self.sleep_interval();
        }
    }

    fn sleep_interval(&self) {
        std::thread::sleep(Duration::from_secs(self.config.interval_sec.max(1)));
    }

    fn run_cycle(&mut self) {
        if !self.ensure_supervisor_alive() {
            return;
        }

        let supervisor = match SupervisorClient::new() {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(%err, "could not build supervisor client, skipping cycle");
                return;
            }
        };

        let outcome = collector::collect(&self.config, &supervisor);
        if let Some(err) = &outcome.error {
            tracing::warn!(%err, "log collection aborted mid-cycle, not attempting an upload");
            return;
        }

        let metrics = Metrics {
            ip_a: process::run("ip", &["a"]).map(|o| o.stdout).unwrap_or_default(),
        };

        let payload = ApiRequest {
            metrics,
            configs_states: outcome.states,
            self_logs: self_log_tail(&self.config),
            config: self.config.clone(),
        };

        let response = match sync::post(&self.config, &payload) {
            Ok(response) => response,
            Err(err) => {
                if let crate::sync::SyncError::NonSuccess { raw_body, .. } = &err {
                    if let Err(io_err) = sync::persist_response(&self.config, raw_body) {
                        tracing::warn!(%io_err, "could not persist sync_response.txt");
                    }
                }
                tracing::warn!(%err, "sync upload failed, backlog not committed");
                return;
            }
        };

        for (path, err) in outcome.commit.run() {
            tracing::warn!(path = %path.display(), %err, "failed to delete committed backlog file");
        }

        if config::validate(&response.config).is_ok() {
            self.config = response.config;
        } else {
            tracing::warn!("server returned an invalid config, keeping the current one");
        }

        reconcile::apply_files(&response.files, &self.config.api_key);

        let supervisor_conf_path = self.config.supervisor_dir().join("supervisor.conf");
        match reconcile::apply_supervisor_config(
            &supervisor_conf_path,
            &response.supervisor_config.config_content,
            &supervisor,
        ) {
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "failed to reconcile supervisor config"),
        }

        if let Err(err) = config::save(&self.config_path, &self.config) {
            tracing::warn!(%err, "failed to persist updated config");
        }
    }

    /// Returns `true` if the supervisor was (or already is) reachable. If
    /// unreachable and the agent has full control, spawns it and returns
    /// `false` so the cycle retries on the next pass; otherwise this is
    /// fatal and the process exits.
    fn ensure_supervisor_alive(&self) -> bool {
        let probe = match SupervisorClient::new() {
            Ok(client) => client.is_running(),
            Err(_) => false,
        };
        if probe {
            return true;
        }

        if !self.config.full_control_supervisord {
            tracing::error!("supervisor unreachable and full_control_supervisord is false, exiting");
            std::process::exit(1);
        }

        tracing::warn!("supervisor unreachable, starting supervisord under full control");
        if let Err(err) = process::spawn_detached(
            "supervisord",
            &["-c", &self.config.supervisor_base_config_path],
        ) {
            tracing::error!(%err, "failed to start supervisord");
        }
        false
    }
}

fn self_log_tail(config: &Config) -> crate::model::TailResult {
    let path = config.logs_dir().join("app.log");
    let bytes = std::fs::read_to_string(&path).unwrap_or_default();
    let tail_len = 64 * 1024;
    let bytes = if bytes.len() > tail_len {
        bytes[bytes.len() - tail_len..].to_string()
    } else {
        bytes
    };
    crate::model::TailResult {
        bytes,
        offset: 0,
        overflow: false,
    }
}

/// Returns the `Release`/`Built at` text printed by `--version`.
pub fn version_text() -> String {
    format!("Release: {}\nBuilt at: {}\n", RELEASE, crate::BUILT_AT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_text_matches_wire_format() {
        let text = version_text();
        assert!(text.starts_with("Release: "));
        assert!(text.contains("Built at: "));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn self_log_tail_truncates_to_last_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            working_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        std::fs::create_dir_all(cfg.logs_dir()).unwrap();
        let body = "a".repeat(100_000);
        std::fs::write(cfg.logs_dir().join("app.log"), &body).unwrap();

        let tail = self_log_tail(&cfg);
        assert_eq!(tail.bytes.len(), 64 * 1024);
    }
}
