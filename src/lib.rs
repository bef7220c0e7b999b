pub mod backlog;
pub mod cli;
pub mod collector;
pub mod config;
pub mod controller;
pub mod logging;
pub mod model;
pub mod process;
pub mod reconcile;
pub mod supervisor;
pub mod sync;

pub use config::Config;
pub use controller::Controller;

/// Release version string, reported by `--version` and sent as part of the
/// sync client's `User-Agent` header.
pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

/// Build timestamp. Populated at compile time when available; falls back to
/// "unknown" rather than failing the build.
pub const BUILT_AT: &str = match option_env!("FLEET_SYNC_AGENT_BUILD_TIME") {
    Some(t) => t,
    None => "unknown",
};
