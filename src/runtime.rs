//! Purpose: Event loop for a worker process: settings sync tick, log drain tick, signal-driven stop.
//! Exports: `serve`, `serve_until`, `shutdown_signal`.
//! Role: Keeps a ready `Core` fresh until the process is told to terminate.
//! Invariants: Backend fetches run on the blocking pool; at most one sync tick is in flight.
//! Invariants: Missed ticks are skipped, never bunched; `Core::stop` runs before returning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Interval, MissedTickBehavior};

use crate::core::error::{Error, ErrorKind};
use crate::core::orchestrator::Core;
use crate::core::sync::SyncReport;
use crate::spells::core_spell::LOG_PUMP_INTERVAL_KEY;
use crate::spells::settings_sync;

const DEFAULT_LOG_PUMP: Duration = Duration::from_millis(100);

type SyncTask = JoinHandle<Result<SyncReport, Error>>;

/// Runs the loop on a current-thread runtime until SIGTERM or Ctrl-C.
pub fn serve(core: Arc<Core>) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to start event loop")
                .with_source(err)
        })?;
    runtime.block_on(serve_until(core, shutdown_signal()))
}

pub async fn serve_until<F>(core: Arc<Core>, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    if !core.is_ready() {
        return Err(Error::new(ErrorKind::Usage).with_message("core is not ready to serve"));
    }
    let synchronizer = settings_sync::synchronizer(&core);

    let mut log_tick = ticker(log_pump_interval(&core));
    let mut sync_tick = synchronizer.as_ref().map(|sync| ticker(sync.interval()));
    let mut in_flight: Option<SyncTask> = None;
    tracing::info!(
        app = core.app_name(),
        sync = ?synchronizer.as_ref().map(|sync| sync.backend().describe()),
        "serving"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = log_tick.tick() => {
                core.drain_logs();
            }
            _ = next_tick(&mut sync_tick) => {
                let Some(sync) = synchronizer.clone() else {
                    continue;
                };
                if in_flight.is_some() {
                    tracing::debug!("previous settings sync still running; skipping tick");
                    continue;
                }
                in_flight = Some(tokio::task::spawn_blocking(move || sync.tick()));
            }
            joined = join_sync(&mut in_flight) => {
                in_flight = None;
                match joined {
                    Ok(Ok(_report)) => {}
                    Ok(Err(err)) => tracing::warn!(error = %err, "settings sync tick failed"),
                    Err(err) => tracing::warn!(error = %err, "settings sync task panicked"),
                }
            }
        }
    }

    tracing::info!("termination requested");
    core.stop();
    Ok(())
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn log_pump_interval(core: &Core) -> Duration {
    match core.settings().get_as::<u64>(LOG_PUMP_INTERVAL_KEY) {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => DEFAULT_LOG_PUMP,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_sync(task: &mut Option<SyncTask>) -> Result<Result<SyncReport, Error>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}
