mod client;
mod error;
mod xmlrpc;

pub use client::{ReloadResult, SupervisorClient, TailLog};
pub use error::SupervisorError;
pub use xmlrpc::Value;

use crate::model::SupervisorProcessInfo;

/// The supervisor operations the collector and reconciler depend on,
/// extracted as a trait so those modules can be exercised against
/// `mockall` mocks rather than a live (or HTTP-mocked) transport.
#[cfg_attr(test, mockall::automock)]
pub trait SupervisorOps {
    fn get_state(&self) -> Result<(i64, String), SupervisorError>;
    fn is_running(&self) -> bool;
    fn get_all_process_info(&self) -> Result<Vec<SupervisorProcessInfo>, SupervisorError>;
    fn tail_stdout(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError>;
    fn tail_stderr(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError>;
    fn clear_process_logs(&self, name: &str) -> Result<bool, SupervisorError>;
    fn reload_config(&self) -> Result<ReloadResult, SupervisorError>;
}

impl SupervisorOps for SupervisorClient {
    fn get_state(&self) -> Result<(i64, String), SupervisorError> {
        SupervisorClient::get_state(self)
    }

    fn is_running(&self) -> bool {
        SupervisorClient::is_running(self)
    }

    fn get_all_process_info(&self) -> Result<Vec<SupervisorProcessInfo>, SupervisorError> {
        SupervisorClient::get_all_process_info(self)
    }

    fn tail_stdout(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError> {
        SupervisorClient::tail_stdout(self, name, offset, length)
    }

    fn tail_stderr(&self, name: &str, offset: i64, length: i64) -> Result<TailLog, SupervisorError> {
        SupervisorClient::tail_stderr(self, name, offset, length)
    }

    fn clear_process_logs(&self, name: &str) -> Result<bool, SupervisorError> {
        SupervisorClient::clear_process_logs(self, name)
    }

    fn reload_config(&self) -> Result<ReloadResult, SupervisorError> {
        SupervisorClient::reload_config(self)
    }
}
