//! `dotlinkd`: braille display daemon entry point.
//!
//! Loads the configuration, connects to the first display that answers and
//! runs a fixed-interval tick loop on a blocking worker thread.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()           -- explicit path argument or platform default
//!  └─ spawn_blocking(run)
//!       └─ DeviceSession::open()        -- candidates in order
//!            └─ every tick:
//!                 ├─ poll_events()      -- log key events by name
//!                 └─ render(pattern)    -- test pattern + held routing keys
//! ```
//!
//! A lost device ends the session; the loop reopens it up to
//! `max_restarts` consecutive times.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use dotlink_core::KeyGroup;
use dotlink_driver::infrastructure::storage::config::{self, AppConfig};
use dotlink_driver::infrastructure::transport::SystemConnector;
use dotlink_driver::{DeviceSession, SessionError};

/// Pause before reopening after a failed or lost session.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => config::load_config_from(&path).with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading configuration")?,
    };

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level)),
        )
        .init();

    info!("dotlinkd starting");

    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    let worker = tokio::task::spawn_blocking(move || run(&config, &running));
    worker.await.context("daemon worker panicked")??;

    info!("dotlinkd stopped");
    Ok(())
}

/// Opens sessions and drives them until shutdown or too many failures.
fn run(config: &AppConfig, running: &AtomicBool) -> anyhow::Result<()> {
    let connector = SystemConnector::new();
    let candidates = config.candidates();
    let options = config.session_options();
    let mut failures = 0u32;

    while running.load(Ordering::Relaxed) {
        match DeviceSession::open(&connector, &candidates, &options) {
            Ok(mut session) => {
                failures = 0;
                let result = drive(&mut session, config, running);
                session.disconnect();
                match result {
                    Ok(()) => break,
                    Err(err) => warn!(error = %err, "session ended"),
                }
            }
            Err(err) => error!(error = %err, "no display"),
        }

        failures += 1;
        if failures > config.daemon.max_restarts {
            bail!("giving up after {failures} consecutive failures");
        }
        info!(attempt = failures, max = config.daemon.max_restarts, "restarting session");
        thread::sleep(RESTART_BACKOFF);
    }

    Ok(())
}

/// Runs the tick loop for one session.  Returns `Ok` on shutdown and the
/// fatal error when the device is lost.
fn drive(session: &mut DeviceSession, config: &AppConfig, running: &AtomicBool) -> Result<(), SessionError> {
    let capabilities = session.probe().clone();
    info!(
        session = %session.id(),
        model = %capabilities.model,
        cells = capabilities.cell_count,
        "display ready"
    );

    let pattern = config.render.test_pattern.cells(capabilities.cell_count);
    let tick = config.poll_interval();

    while running.load(Ordering::Relaxed) {
        let started = Instant::now();

        for event in session.poll_events()? {
            info!(key = %session.profile().describe(&event), press = event.press, "key");
        }

        // Held routing keys light up their cell.
        let mut cells = pattern.clone();
        for key in session.held_keys(KeyGroup::Routing).iter() {
            if let Some(cell) = cells.get_mut(key) {
                *cell = 0xFF;
            }
        }

        match session.render(&cells) {
            Ok(outcome) => debug!(?outcome, "render"),
            Err(err) if !err.is_fatal() => warn!(error = %err, "render failed, retrying next tick"),
            Err(err) => return Err(err),
        }

        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    Ok(())
}
