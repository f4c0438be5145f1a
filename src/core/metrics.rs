use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    metrics::describe_counter!(
        "exam_submissions_enqueued_total",
        "Exam submissions written to the submission queue"
    );
    metrics::describe_counter!(
        "exam_submissions_enqueue_failed_total",
        "Exam submissions the queue rejected"
    );
    metrics::describe_counter!("exam_grading_total", "Graded exam results by outcome");
    metrics::describe_counter!(
        "exam_dead_lettered_total",
        "Stalled messages moved to the dead-letter queue"
    );
    metrics::describe_counter!("exam_drain_halts_total", "Drains that stopped early by reason");
    metrics::describe_histogram!("exam_drain_duration_seconds", "Wall time of one drain");
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
