use std::future::Future;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;
use crate::services::pipeline::{ExamPipeline, PipelineError};
use crate::tasks::drain;

pub(crate) async fn run(state: AppState) -> Result<()> {
    run_until(state, crate::core::shutdown::shutdown_signal()).await
}

pub(crate) async fn run_until(state: AppState, shutdown: impl Future<Output = ()>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let period = Duration::from_secs(state.settings().drain().interval_seconds);

    tracing::info!(
        queue = state.pipeline().queue().name(),
        interval_seconds = period.as_secs(),
        policy = state.settings().drain().policy.as_str(),
        "Starting drain scheduler"
    );

    let handle = tokio::spawn(drain_loop(state.pipeline().clone(), period, shutdown_rx));

    shutdown.await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    if let Err(err) = handle.await {
        tracing::error!(error = %err, "Background task join failed");
    }

    Ok(())
}

async fn drain_loop(pipeline: ExamPipeline, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match drain::run_exclusive(&pipeline).await {
                    Ok(report) if report.is_clean() && !report.graded.is_empty() => {
                        tracing::debug!(graded = report.graded.len(), "Scheduled drain finished");
                    }
                    Ok(_) => {}
                    Err(PipelineError::DrainInProgress) => {
                        tracing::debug!("Skipping scheduled drain; another drain holds the lock");
                    }
                    Err(err) => tracing::error!(error = %err, "Scheduled drain failed"),
                }
            }
        }
    }
}
