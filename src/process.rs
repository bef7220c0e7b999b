//! Minimal synchronous child-process helper for the three places the agent
//! shells out: starting `supervisord`, running `supervisorctl update`, and
//! capturing `ip a` output. Two operations only — run-to-completion and
//! spawn-detached — because restart policy and output streaming belong to
//! the supervisor being supervised, not to this agent.

use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("could not spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read output of `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Output of a completed child process.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Runs `program args...` to completion, capturing stdout/stderr. Never
/// fails on a non-zero exit status — the caller inspects `success` and
/// decides whether to log or ignore it, matching the "ignore non-zero exit
/// except to log" handling used for `supervisorctl update`.
pub fn run(program: &str, args: &[&str]) -> Result<RunOutput, ProcessError> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ProcessError::Spawn {
            command: describe(program, args),
            source,
        })?;

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
    })
}

/// Spawns `program args...` and does not wait for it to exit. Used to start
/// `supervisord` in the background when the agent has full control over it.
pub fn spawn_detached(program: &str, args: &[&str]) -> Result<(), ProcessError> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|source| ProcessError::Spawn {
            command: describe(program, args),
            source,
        })
}

fn describe(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let output = run("echo", &["hello"]).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn run_reports_failure_without_erroring() {
        let output = run("false", &[]).unwrap();
        assert!(!output.success);
    }

    #[test]
    fn spawn_detached_does_not_block() {
        spawn_detached("true", &[]).unwrap();
    }
}
