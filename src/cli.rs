use clap::Parser;
use std::path::PathBuf;

/// Command line surface for the agent binary.
///
/// Intentionally not a single `clap` derive with a `--version` flag: the
/// version output format (`Release: ..\nBuilt at: ..`) is part of the wire
/// contract with operators' deploy scripts, so it is printed manually rather
/// than delegated to clap's own `--version` handling.
#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Print the release version and build time, then exit.
    #[arg(long)]
    pub version: bool,

    /// Path to the agent's YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_flag() {
        let cli = Cli::parse_from(["fleet-sync-agent", "--version"]);
        assert!(cli.version);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_config_path() {
        let cli = Cli::parse_from(["fleet-sync-agent", "--config", "/etc/agent.yaml"]);
        assert!(!cli.version);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/agent.yaml")));
    }
}
