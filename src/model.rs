//! Wire types shared between the supervisor client, the log collector, the
//! backlog store, and the sync client: these are exactly the shapes that
//! flow from the supervisor's XML-RPC replies into a JSON request body, and
//! the shapes the control plane answers with.

use crate::config::Config;
use serde::{Deserialize, Serialize};

/// Mirrors `supervisor.getAllProcessInfo`'s per-process record. Field names
/// are lowercase to match the canonical XML-RPC wire format; `is_running`
/// compares case-insensitively in case an older supervisor build echoes
/// mixed case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorProcessInfo {
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub description: String,
    pub start: i64,
    pub stop: i64,
    pub now: i64,
    pub state: i64,
    pub statename: String,
    #[serde(default)]
    pub spawnerr: String,
    pub exitstatus: i64,
    #[serde(default)]
    pub stdout_logfile: String,
    #[serde(default)]
    pub stderr_logfile: String,
    pub pid: i64,
}

impl SupervisorProcessInfo {
    pub fn is_running(&self) -> bool {
        self.statename.eq_ignore_ascii_case("RUNNING")
    }
}

/// Result of a `tailProcessStdoutLog`/`tailProcessStderrLog` call, with a
/// `nil` byte payload already normalized to an empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TailResult {
    pub bytes: String,
    pub offset: i64,
    pub overflow: bool,
}

impl TailResult {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One process's observed state for a single cycle. This is the unit stored
/// in backlog generations and uploaded in `APIRequest::configs_states`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigState {
    pub time: chrono::DateTime<chrono::Utc>,
    pub supervisorprocessinfo: SupervisorProcessInfo,
    pub stdout: TailResult,
    pub stderr: TailResult,
}

impl ConfigState {
    /// Combined stdout+stderr byte length, the unit the collection budget is
    /// measured in.
    pub fn byte_len(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metrics {
    pub ip_a: String,
}

/// Request body uploaded to the control plane each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiRequest {
    pub metrics: Metrics,
    pub configs_states: Vec<ConfigState>,
    pub self_logs: TailResult,
    pub config: Config,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SupervisorConfigPayload {
    pub config_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RuntimeInfo {
    pub node_id: String,
    pub node_name: String,
}

/// A single file the control plane wants present on the node, materialized
/// either from inline `content` or downloaded from `url` and verified
/// against `hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSpec {
    pub dest_path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub permission: u32,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Response body received from the control plane each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub supervisor_config: SupervisorConfigPayload,
    pub files: Vec<FileSpec>,
    pub config: Config,
    pub runtime: RuntimeInfo,
}
