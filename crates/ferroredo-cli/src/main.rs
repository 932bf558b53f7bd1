//! ferroredo — change-data-capture daemon for Oracle redo logs.
//!
//! Loads one instance configuration, starts its pipeline, and runs until
//! the pipeline finishes or a signal asks for shutdown. SIGINT/SIGTERM are
//! handled by a single watcher thread that requests a soft stop on every
//! instance; a second signal escalates to hard.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ferroredo_replicator::InstanceManager;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ferroredo")]
#[command(about = "Logical replication from Oracle redo logs")]
#[command(version)]
struct Cli {
    /// Instance configuration file (JSON).
    #[arg(short = 'f', long = "file")]
    config: PathBuf,

    /// Instance id to register the pipeline under.
    #[arg(long, default_value = "main")]
    id: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let config_json = match std::fs::read_to_string(&cli.config) {
        Ok(text) => text,
        Err(err) => {
            error!(path = %cli.config.display(), "can't read config: {err}");
            return 1;
        }
    };

    let manager = Arc::new(InstanceManager::new());
    if let Err(err) = manager.start(&cli.id, &config_json) {
        error!(code = err.code(), "startup failed: {err}");
        return 1;
    }

    // One watcher thread for the whole process; every instance polls the
    // shared flags at its suspension points.
    let signal_count = Arc::new(AtomicUsize::new(0));
    let watcher_manager = Arc::clone(&manager);
    let watcher_count = Arc::clone(&signal_count);
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(s) => s,
        Err(err) => {
            error!("can't register signal handler: {err}");
            return 1;
        }
    };
    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                let count = watcher_count.fetch_add(1, Ordering::AcqRel);
                if count == 0 {
                    info!(signal, "shutdown requested, draining");
                    watcher_manager.stop_all_soft();
                } else {
                    warn!(signal, "second signal, stopping now");
                    watcher_manager.shutdown_all();
                    break;
                }
            }
        })
        .expect("spawn signal watcher");

    // Wait for the instance to finish (batch end, stop-log-switches, or a
    // requested shutdown).
    loop {
        match manager.status(&cli.id) {
            Ok(status) if status.running => std::thread::sleep(Duration::from_millis(200)),
            Ok(status) => {
                let code = i32::from(status.hard_shutdown && signal_count.load(Ordering::Acquire) == 0);
                let _ = manager.stop(&cli.id);
                info!("ferroredo exiting");
                return code;
            }
            Err(_) => return 0, // removed by the signal path
        }
    }
}
