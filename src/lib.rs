pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use anyhow::Context;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};

async fn bootstrap() -> anyhow::Result<AppState> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await.context("Failed to connect to Postgres")?;
    db::run_migrations(&db_pool).await.context("Failed to run migrations")?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    redis.connect().await.context("Failed to connect to Redis")?;
    tracing::info!("Redis connected successfully");

    let state = AppState::from_settings(settings, db_pool, redis);
    core::bootstrap::ensure_queues(&state).await?;

    Ok(state)
}

pub async fn run() -> anyhow::Result<()> {
    let state = bootstrap().await?;

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        queue = %state.settings().queue().name,
        "Exam ingest API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    let state = bootstrap().await?;

    let result = tasks::scheduler::run(state.clone()).await;

    state.redis().disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
