use fleet_sync_agent::cli::Cli;
use fleet_sync_agent::controller::version_text;
use fleet_sync_agent::{config, logging, Controller};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() {
    let cli = Cli::parse_args();

    if cli.version {
        print!("{}", version_text());
        return;
    }

    let Some(config_path) = cli.config else {
        eprintln!("usage: fleet-sync-agent --config <path> | --version");
        std::process::exit(2);
    };

    let cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("fatal: invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = config::ensure_working_dirs(&cfg) {
        eprintln!("fatal: could not create working directories: {err}");
        std::process::exit(1);
    }

    let _logging_guard = match logging::init(&cfg.logs_dir(), cfg.is_dev) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("fatal: could not initialize logging: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            tracing::info!("received termination signal, will shut down at the next suspension point");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(%err, "could not install SIGTERM/SIGINT handler");
        }
    }

    let mut controller = Controller::new(config_path, cfg, shutdown);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        controller.run();
    }));

    if let Err(panic) = result {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(panic = %message, "agent cycle panicked, exiting");
        std::process::exit(1);
    }
}
