//! Applies a control-plane response to the local node: materializes the
//! requested files (inline or downloaded+hash-verified), and brings the
//! supervisor's configuration in line, reloading it only when the new
//! content differs from the current one modulo comments.

use crate::model::FileSpec;
use crate::process;
use crate::supervisor::SupervisorOps;
use crate::RELEASE;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;
const PROGRAM_NAME: &str = "fleet-sync-agent";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("could not read supervisor config `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write supervisor config `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Applies every [`FileSpec`] in `files`, skipping any whose `dest_path`
/// already exists. Individual failures are logged, not propagated — the
/// next cycle retries whatever didn't land.
pub fn apply_files(files: &[FileSpec], api_key: &str) {
    for spec in files {
        if let Err(err) = apply_file(spec, api_key) {
            tracing::warn!(dest = %spec.dest_path, %err, "failed to apply file, will retry next cycle");
        }
    }
}

#[derive(Error, Debug)]
enum FileApplyError {
    #[error("stat failed: {0}")]
    Stat(#[source] std::io::Error),
    #[error("neither content nor url was set")]
    Empty,
    #[error("download failed: {0}")]
    Download(#[source] reqwest::Error),
    #[error("downloaded content hash did not match expected `{expected}` (got `{got}`)")]
    HashMismatch { expected: String, got: String },
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

fn apply_file(spec: &FileSpec, api_key: &str) -> Result<(), FileApplyError> {
    let dest = Path::new(&spec.dest_path);
    match dest.try_exists() {
        Ok(true) => return Ok(()),
        Ok(false) => {}
        Err(source) => return Err(FileApplyError::Stat(source)),
    }

    if let Some(url) = &spec.url {
        return apply_downloaded_file(spec, url, api_key);
    }
    if let Some(content) = &spec.content {
        return apply_inline_file(spec, content);
    }
    Err(FileApplyError::Empty)
}

fn apply_inline_file(spec: &FileSpec, content: &str) -> Result<(), FileApplyError> {
    let dest = Path::new(&spec.dest_path);
    if let Some(parent) = dest.parent() {
        create_dir_0755(parent).map_err(FileApplyError::Io)?;
    }
    let normalized = content.replace('\r', "");
    write_with_mode(dest, normalized.as_bytes(), spec.permission).map_err(FileApplyError::Io)
}

fn apply_downloaded_file(spec: &FileSpec, url: &str, api_key: &str) -> Result<(), FileApplyError> {
    let expected_hash = spec.hash.clone().unwrap_or_default();
    let dest = Path::new(&spec.dest_path);
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "downloaded".into());
    let tmp_path = std::env::temp_dir().join(format!("{file_name}.tmp"));

    let download_result = download_and_hash(url, api_key, &tmp_path);
    let digest = match download_result {
        Ok(digest) => digest,
        Err(err) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
    };

    if !digest.eq_ignore_ascii_case(&expected_hash) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(FileApplyError::HashMismatch {
            expected: expected_hash,
            got: digest,
        });
    }

    if let Some(parent) = dest.parent() {
        create_dir_0755(parent).map_err(FileApplyError::Io)?;
    }
    let data = std::fs::read(&tmp_path).map_err(FileApplyError::Io)?;
    let result = write_with_mode(dest, &data, spec.permission).map_err(FileApplyError::Io);
    let _ = std::fs::remove_file(&tmp_path);
    result
}

/// Streams `url` into `tmp_path` in 32 KiB chunks through a SHA-256 hasher,
/// returning the lowercase hex digest of the whole stream.
fn download_and_hash(url: &str, api_key: &str, tmp_path: &Path) -> Result<String, FileApplyError> {
    let client = reqwest::blocking::Client::new();
    let mut response = client
        .get(url)
        .header("Authorization", format!("Api-Key {api_key}"))
        .header("User-Agent", format!("{PROGRAM_NAME}:{}", RELEASE))
        .send()
        .map_err(FileApplyError::Download)?
        .error_for_status()
        .map_err(FileApplyError::Download)?;

    let mut file = std::fs::File::create(tmp_path).map_err(FileApplyError::Io)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; DOWNLOAD_CHUNK_SIZE];
    loop {
        let n = response.read(&mut buf).map_err(FileApplyError::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).map_err(FileApplyError::Io)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_with_mode(path: &Path, data: &[u8], permission: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(permission)
            .open(path)?
            .write_all(data)
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)
    }
}

#[cfg(unix)]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Strips any line whose first non-whitespace byte is `#` or `;`, the
/// comparison used to decide whether a new supervisor config is
/// semantically different from the current one.
fn normalize(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            !matches!(line.trim_start().as_bytes().first(), Some(b'#') | Some(b';'))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads the current supervisor config (creating an empty one if absent),
/// compares it to `new_content` modulo comments, and if they differ writes
/// the new content and triggers a supervisor reload + `supervisorctl
/// update`. Returns whether a reload was performed.
pub fn apply_supervisor_config<S: SupervisorOps>(
    supervisor_conf_path: &Path,
    new_content: &str,
    supervisor: &S,
) -> Result<bool, ReconcileError> {
    let current = match std::fs::read_to_string(supervisor_conf_path) {
        Ok(content) => content,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            write_supervisor_conf(supervisor_conf_path, "")?;
            String::new()
        }
        Err(source) => {
            return Err(ReconcileError::Read {
                path: supervisor_conf_path.display().to_string(),
                source,
            })
        }
    };

    if normalize(&current) == normalize(new_content) {
        return Ok(false);
    }

    write_supervisor_conf(supervisor_conf_path, new_content)?;

    match supervisor.reload_config() {
        Ok(result) => tracing::info!(
            added = ?result.added,
            changed = ?result.changed,
            removed = ?result.removed,
            "supervisor config reloaded",
        ),
        Err(err) => tracing::warn!(%err, "supervisor.reloadConfig failed"),
    }

    match process::run("supervisorctl", &["update"]) {
        Ok(output) => {
            tracing::info!(stdout = %output.stdout.trim(), success = output.success, "ran supervisorctl update");
        }
        Err(err) => tracing::warn!(%err, "could not run supervisorctl update"),
    }

    Ok(true)
}

fn write_supervisor_conf(path: &Path, content: &str) -> Result<(), ReconcileError> {
    if let Some(parent) = path.parent() {
        create_dir_0755(parent).map_err(|source| ReconcileError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }
    write_with_mode(path, content.as_bytes(), 0o755).map_err(|source| ReconcileError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Returns the path the reconciler would write temp downloads to for a
/// given [`FileSpec`]. Exposed for tests that need to assert a temp file
/// was cleaned up.
#[cfg(test)]
fn temp_path_for(spec: &FileSpec) -> PathBuf {
    let dest = Path::new(&spec.dest_path);
    let file_name = dest.file_name().unwrap().to_string_lossy().into_owned();
    std::env::temp_dir().join(format!("{file_name}.tmp"))
}
