//! Drains per-process stdout/stderr tails from the supervisor under a
//! global byte budget, clears what was collected, and durably persists a
//! copy of anything cleared before the caller ever gets a chance to lose it
//! to a failed upload.
//!
//! The destructive `clearProcessLogs` call must never run ahead of the
//! tails it authorizes, and a successful clear must never go un-backed-up:
//! those two invariants are what make this module worth getting right, and
//! `WriteOnClearGuard` below exists specifically to hold the second one.

use crate::backlog::{self, BacklogError};
use crate::config::Config;
use crate::model::{ConfigState, TailResult};
use crate::supervisor::{SupervisorError, SupervisorOps};
use chrono::Utc;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("could not list processes: {0}")]
    ProcessInfo(#[source] SupervisorError),

    #[error("supervisor RPC failed mid-collection for `{process}`: {source}")]
    Rpc {
        process: String,
        #[source]
        source: SupervisorError,
    },
}

/// Everything a cycle needs out of collection: the states to upload, and a
/// deferred commit that the controller invokes only after a successful
/// sync. `error` is set when collection aborted mid-loop; the controller
/// must not attempt an upload in that case, but the commit handle is still
/// returned for symmetry and so any backlog merged before the abort (there
/// is none, by construction — see module docs) isn't silently dropped.
pub struct CollectOutcome {
    pub states: Vec<ConfigState>,
    pub commit: Commit,
    pub error: Option<CollectorError>,
}

/// Deletes the current cycle's generation file (if one was written) plus
/// every backlog generation merged into this cycle's upload. Returned
/// separately from the collection guard because it must fire later — only
/// once the sync client reports success.
pub struct Commit {
    paths: Vec<PathBuf>,
}

impl Commit {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Deletes every committed path, reporting (not propagating) individual
    /// failures: a failed deletion is not data loss, since the next cycle
    /// will simply see the file again and re-merge it.
    pub fn run(self) -> Vec<(PathBuf, std::io::Error)> {
        backlog::commit(&self.paths)
    }
}

/// Writes the current generation file on drop, but only if at least one
/// `clearProcessLogs` call succeeded during the collection this guard
/// spans. Constructed before the per-process loop begins so it covers every
/// exit path out of that loop, not just the happy path at function end.
struct WriteOnClearGuard {
    path: PathBuf,
    cleared_any: Rc<Cell<bool>>,
    states: Rc<RefCell<Vec<ConfigState>>>,
}

impl Drop for WriteOnClearGuard {
    fn drop(&mut self) {
        if !self.cleared_any.get() {
            return;
        }
        let states = self.states.borrow();
        if let Err(err) = backlog::write_generation(&self.path, &states) {
            tracing::error!(path = %self.path.display(), %err, "failed to persist backlog generation after clearing process logs");
        }
    }
}

/// Runs one cycle's worth of log collection against `supervisor`, per
/// `config`'s budgets.
pub fn collect<S: SupervisorOps>(config: &Config, supervisor: &S) -> CollectOutcome {
    let now = Utc::now();
    let logs_dir = config.logs_dir();
    let generation_path = backlog::generation_path(&logs_dir, now);

    let infos = match supervisor.get_all_process_info() {
        Ok(infos) => infos,
        Err(source) => {
            return CollectOutcome {
                states: Vec::new(),
                commit: Commit::new(Vec::new()),
                error: Some(CollectorError::ProcessInfo(source)),
            }
        }
    };

    let cleared_any = Rc::new(Cell::new(false));
    let states = Rc::new(RefCell::new(Vec::new()));
    let guard = WriteOnClearGuard {
        path: generation_path.clone(),
        cleared_any: cleared_any.clone(),
        states: states.clone(),
    };

    let safe_stats_size = config.safe_stats_size();
    let each_collection_size = config.each_collection_size();
    let mut running_size: u64 = 0;
    let mut abort_error: Option<CollectorError> = None;

    for info in &infos {
        let tail_len = if info.is_running() {
            each_collection_size
        } else {
            (each_collection_size as f64 * 0.1).round() as u64
        };

        let stdout = match supervisor.tail_stdout(&info.name, 0, tail_len as i64) {
            Ok(tail) => tail,
            Err(source) => {
                abort_error = Some(CollectorError::Rpc {
                    process: info.name.clone(),
                    source,
                });
                break;
            }
        };
        let stderr = match supervisor.tail_stderr(&info.name, 0, tail_len as i64) {
            Ok(tail) => tail,
            Err(source) => {
                abort_error = Some(CollectorError::Rpc {
                    process: info.name.clone(),
                    source,
                });
                break;
            }
        };

        let combined = stdout.bytes.len() as u64 + stderr.bytes.len() as u64;
        if running_size + combined > safe_stats_size {
            tracing::debug!(process = %info.name, "collection budget exhausted, stopping before clear");
            break;
        }

        match supervisor.clear_process_logs(&info.name) {
            Ok(_) => cleared_any.set(true),
            Err(source) => {
                abort_error = Some(CollectorError::Rpc {
                    process: info.name.clone(),
                    source,
                });
                break;
            }
        }

        running_size += combined;
        states.borrow_mut().push(ConfigState {
            time: now,
            supervisorprocessinfo: info.clone(),
            stdout: TailResult {
                bytes: stdout.bytes,
                offset: stdout.offset,
                overflow: stdout.overflow,
            },
            stderr: TailResult {
                bytes: stderr.bytes,
                offset: stderr.offset,
                overflow: stderr.overflow,
            },
        });
    }

    let mut included_backlog_paths = Vec::new();
    if abort_error.is_none() {
        let remaining = safe_stats_size.saturating_sub(running_size);
        if remaining > 0 {
            match load_backlog(&logs_dir, remaining, &generation_path) {
                Ok((mut backlog_states, included)) => {
                    states.borrow_mut().append(&mut backlog_states);
                    included_backlog_paths = included;
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to merge on-disk backlog into this cycle");
                }
            }
        }
    }

    drop(guard);

    let mut commit_paths = included_backlog_paths;
    if cleared_any.get() {
        commit_paths.push(generation_path);
    }

    let states = Rc::try_unwrap(states)
        .expect("collection guard dropped before state unwrap")
        .into_inner();

    CollectOutcome {
        states,
        commit: Commit::new(commit_paths),
        error: abort_error,
    }
}

fn load_backlog(
    logs_dir: &Path,
    max_bytes: u64,
    current_generation: &Path,
) -> Result<(Vec<ConfigState>, Vec<PathBuf>), BacklogError> {
    backlog::load_under_budget(logs_dir, max_bytes, std::slice::from_ref(&current_generation.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlSpec;
    use crate::model::SupervisorProcessInfo;
    use crate::supervisor::{MockSupervisorOps, TailLog};

    fn config(working_dir: &Path, safe_stats_size: u64, each_collection_size: u64) -> Config {
        Config {
            sync_urls: vec![UrlSpec {
                url: "https://example/sync".into(),
                proxy_url: String::new(),
                weight: 1,
            }],
            api_key: "K".into(),
            working_dir: working_dir.display().to_string(),
            safe_stats_size,
            each_collection_size,
            ..Default::default()
        }
    }

    fn info(name: &str, statename: &str) -> SupervisorProcessInfo {
        SupervisorProcessInfo {
            name: name.into(),
            group: name.into(),
            description: String::new(),
            start: 0,
            stop: 0,
            now: 0,
            state: 20,
            statename: statename.into(),
            spawnerr: String::new(),
            exitstatus: 0,
            stdout_logfile: String::new(),
            stderr_logfile: String::new(),
            pid: 1,
        }
    }

    // Exercises the tail-length halving rule without a live supervisor: a
    // fake client is unnecessary since `collect` takes a `SupervisorClient`,
    // so this only checks the arithmetic directly.
    #[test]
    fn non_running_tail_length_is_rounded_tenth() {
        let each = 1_000_000u64;
        let rounded = (each as f64 * 0.1).round() as u64;
        assert_eq!(rounded, 100_000);
    }

    #[test]
    fn zero_processes_writes_no_generation() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10_000, 1_000);
        std::fs::create_dir_all(cfg.logs_dir()).unwrap();
        // No supervisor call is made in this unit test; it only checks the
        // guard's no-op behavior when cleared_any was never set.
        let cleared_any = Rc::new(Cell::new(false));
        let states = Rc::new(RefCell::new(Vec::new()));
        let path = cfg.logs_dir().join("configs_states_bak_2026_01_01_000000.json");
        drop(WriteOnClearGuard {
            path: path.clone(),
            cleared_any,
            states,
        });
        assert!(!path.exists());
    }

    #[test]
    fn guard_writes_generation_only_when_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10_000, 1_000);
        std::fs::create_dir_all(cfg.logs_dir()).unwrap();
        let path = cfg.logs_dir().join("configs_states_bak_2026_01_01_000000.json");

        let cleared_any = Rc::new(Cell::new(true));
        let states = Rc::new(RefCell::new(vec![{
            let mut s = ConfigState {
                time: Utc::now(),
                supervisorprocessinfo: info("worker", "RUNNING"),
                stdout: TailResult::default(),
                stderr: TailResult::default(),
            };
            s.stdout.bytes = "hi".into();
            s
        }]));
        drop(WriteOnClearGuard {
            path: path.clone(),
            cleared_any,
            states,
        });
        assert!(path.exists());
    }

    fn tail(bytes: &str) -> TailLog {
        TailLog {
            bytes: bytes.to_string(),
            offset: bytes.len() as i64,
            overflow: false,
        }
    }

    // A second process whose combined tail would push the running total
    // over `safe_stats_size` must be skipped entirely — its logs are
    // neither cleared nor uploaded this cycle.
    #[test]
    fn budget_exhaustion_stops_before_clearing_second_process() {
        let mut mock = MockSupervisorOps::new();
        mock.expect_get_all_process_info()
            .returning(|| Ok(vec![info("p1", "RUNNING"), info("p2", "RUNNING")]));
        mock.expect_tail_stdout()
            .withf(|name, _, _| name == "p1")
            .returning(|_, _, _| Ok(tail(&"a".repeat(200))));
        mock.expect_tail_stderr()
            .withf(|name, _, _| name == "p1")
            .returning(|_, _, _| Ok(tail(&"b".repeat(50))));
        mock.expect_clear_process_logs()
            .withf(|name| name == "p1")
            .returning(|_| Ok(true));
        mock.expect_tail_stdout()
            .withf(|name, _, _| name == "p2")
            .returning(|_, _, _| Ok(tail(&"c".repeat(200))));
        mock.expect_tail_stderr()
            .withf(|name, _, _| name == "p2")
            .returning(|_, _, _| Ok(tail("")));
        // No expectation is registered for clearing "p2": if `collect` called
        // it anyway, mockall would panic with no matching expectation.

        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 300, 1_000_000);
        std::fs::create_dir_all(cfg.logs_dir()).unwrap();

        let outcome = collect(&cfg, &mock);

        assert!(outcome.error.is_none());
        assert_eq!(outcome.states.len(), 1);
        assert_eq!(outcome.states[0].supervisorprocessinfo.name, "p1");
    }

    // A clear that already succeeded for one process must be durably
    // backed up even when a later RPC in the same cycle fails and aborts
    // collection.
    #[test]
    fn rpc_failure_after_a_successful_clear_still_persists_the_generation() {
        let mut mock = MockSupervisorOps::new();
        mock.expect_get_all_process_info()
            .returning(|| Ok(vec![info("p1", "RUNNING"), info("p2", "RUNNING")]));
        mock.expect_tail_stdout()
            .withf(|name, _, _| name == "p1")
            .returning(|_, _, _| Ok(tail("hello")));
        mock.expect_tail_stderr()
            .withf(|name, _, _| name == "p1")
            .returning(|_, _, _| Ok(tail("")));
        mock.expect_clear_process_logs()
            .withf(|name| name == "p1")
            .returning(|_| Ok(true));
        mock.expect_tail_stdout().withf(|name, _, _| name == "p2").returning(|_, _, _| {
            Err(crate::supervisor::SupervisorError::Fault {
                code: 1,
                message: "boom".into(),
            })
        });

        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1_000_000, 1_000_000);
        std::fs::create_dir_all(cfg.logs_dir()).unwrap();

        let outcome = collect(&cfg, &mock);

        assert!(outcome.error.is_some());
        assert_eq!(outcome.states.len(), 1);
        let generations: Vec<_> = std::fs::read_dir(cfg.logs_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("configs_states_bak_"))
            .collect();
        assert_eq!(generations.len(), 1, "expected one backlog generation written on disk");
    }
}
