//! Size-bounded, multi-generation backlog of uploaded-but-unacknowledged
//! [`ConfigState`] batches, kept as individual JSON files under `logs/` so a
//! crash between collection and a successful upload loses nothing.

use super::error::BacklogError;
use crate::model::ConfigState;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn generation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^configs_states_bak_(\d{4})_(\d{2})_(\d{2})_(\d{2})(\d{2})(\d{2})\.json$").unwrap()
    })
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub path: PathBuf,
    pub size: u64,
    pub time: DateTime<Utc>,
}

/// Returns the path a generation created at `time` would be written to,
/// encoding the timestamp to second precision in the basename.
pub fn generation_path(logs_dir: &Path, time: DateTime<Utc>) -> PathBuf {
    logs_dir.join(format!(
        "configs_states_bak_{}.json",
        time.format("%Y_%m_%d_%H%M%S")
    ))
}

/// Writes `states` to `path` as JSON. Generation files are immutable after
/// creation; only [`commit`] removes them.
pub fn write_generation(path: &Path, states: &[ConfigState]) -> Result<(), BacklogError> {
    let data = serde_json::to_vec(states).map_err(|source| BacklogError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, data).map_err(|source| BacklogError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Scans `logs_dir` non-recursively for generation files, parsing each
/// basename's embedded timestamp.
pub fn enumerate(logs_dir: &Path) -> Result<Vec<Generation>, BacklogError> {
    let entries = match std::fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BacklogError::List {
                path: logs_dir.display().to_string(),
                source,
            })
        }
    };

    let mut generations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BacklogError::List {
            path: logs_dir.display().to_string(),
            source,
        })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(captures) = generation_regex().captures(name) else { continue };
        let Some(time) = parse_timestamp(&captures) else { continue };
        let metadata = entry.metadata().map_err(|source| BacklogError::List {
            path: logs_dir.display().to_string(),
            source,
        })?;
        generations.push(Generation {
            path: entry.path(),
            size: metadata.len(),
            time,
        });
    }
    Ok(generations)
}

fn parse_timestamp(captures: &regex::Captures) -> Option<DateTime<Utc>> {
    let year: i32 = captures[1].parse().ok()?;
    let month: u32 = captures[2].parse().ok()?;
    let day: u32 = captures[3].parse().ok()?;
    let hour: u32 = captures[4].parse().ok()?;
    let minute: u32 = captures[5].parse().ok()?;
    let second: u32 = captures[6].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Loads generations newest-first under `max_bytes`, skipping anything in
/// `exclude_paths`, empty files, and files whose size exceeds the
/// remaining budget (whole-file atomic inclusion, no partial loads).
/// Returns the accumulated states plus the paths actually included.
pub fn load_under_budget(
    logs_dir: &Path,
    max_bytes: u64,
    exclude_paths: &[PathBuf],
) -> Result<(Vec<ConfigState>, Vec<PathBuf>), BacklogError> {
    let mut generations = enumerate(logs_dir)?;
    generations.sort_by(|a, b| b.time.cmp(&a.time));

    let mut states = Vec::new();
    let mut included = Vec::new();
    let mut remaining = max_bytes;

    for generation in generations {
        if exclude_paths.contains(&generation.path) {
            continue;
        }
        if generation.size == 0 {
            continue;
        }
        if generation.size > remaining {
            continue;
        }
        let data = std::fs::read(&generation.path).map_err(|source| BacklogError::Read {
            path: generation.path.display().to_string(),
            source,
        })?;
        let mut batch: Vec<ConfigState> = serde_json::from_slice(&data).map_err(|source| BacklogError::Parse {
            path: generation.path.display().to_string(),
            source,
        })?;
        remaining -= generation.size;
        states.append(&mut batch);
        included.push(generation.path);
    }

    Ok((states, included))
}

/// Deletes every file in `paths`. A deletion error for one path is
/// reported but does not prevent attempting the rest: the next cycle will
/// re-read whatever remains, which is safe since backlog files only hold
/// data not yet acknowledged.
pub fn commit(paths: &[PathBuf]) -> Vec<(PathBuf, std::io::Error)> {
    let mut failures = Vec::new();
    for path in paths {
        if let Err(source) = std::fs::remove_file(path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                failures.push((path.clone(), source));
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SupervisorProcessInfo, TailResult};
    use tempfile::tempdir;

    fn sample_state(time: DateTime<Utc>) -> ConfigState {
        ConfigState {
            time,
            supervisorprocessinfo: SupervisorProcessInfo {
                name: "worker".into(),
                group: "workers".into(),
                description: String::new(),
                start: 0,
                stop: 0,
                now: 0,
                state: 20,
                statename: "RUNNING".into(),
                spawnerr: String::new(),
                exitstatus: 0,
                stdout_logfile: String::new(),
                stderr_logfile: String::new(),
                pid: 1,
            },
            stdout: TailResult {
                bytes: "hello".into(),
                offset: 0,
                overflow: false,
            },
            stderr: TailResult::default(),
        }
    }

    #[test]
    fn round_trips_generation_file() {
        let dir = tempdir().unwrap();
        let time = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let path = generation_path(dir.path(), time);
        write_generation(&path, &[sample_state(time)]).unwrap();

        let generations = enumerate(dir.path()).unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].time, time);
    }

    #[test]
    fn load_under_budget_skips_oversized_and_excluded() {
        let dir = tempdir().unwrap();
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let older_path = generation_path(dir.path(), older);
        let newer_path = generation_path(dir.path(), newer);
        write_generation(&older_path, &[sample_state(older), sample_state(older)]).unwrap();
        write_generation(&newer_path, &[sample_state(newer)]).unwrap();

        let (states, included) = load_under_budget(dir.path(), 10_000, &[]).unwrap();
        assert_eq!(included.len(), 2);
        assert_eq!(states.len(), 3);

        let (states, included) = load_under_budget(dir.path(), 10_000, &[newer_path.clone()]).unwrap();
        assert_eq!(included, vec![older_path.clone()]);
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn commit_deletes_given_paths() {
        let dir = tempdir().unwrap();
        let time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let path = generation_path(dir.path(), time);
        write_generation(&path, &[sample_state(time)]).unwrap();

        let failures = commit(&[path.clone()]);
        assert!(failures.is_empty());
        assert!(!path.exists());
    }
}
