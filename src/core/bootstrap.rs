use anyhow::Context;

use crate::core::state::AppState;

/// Creates the queues the pipeline writes to, unless auto-creation is disabled.
pub(crate) async fn ensure_queues(state: &AppState) -> anyhow::Result<()> {
    let queue = state.settings().queue();
    if !queue.auto_create {
        tracing::info!(queue = %queue.name, "Queue auto-creation disabled; skipping");
        return Ok(());
    }

    state.pipeline().ensure_queues().await.context("Failed to create submission queues")?;
    tracing::info!(
        queue = %queue.name,
        dead_letter_queue = %queue.dead_letter_name,
        "Submission queues ready"
    );
    Ok(())
}
