use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::pipeline::ExamPipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    pipeline: ExamPipeline,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        pipeline: ExamPipeline,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, pipeline }) }
    }

    /// State wired to the Redis and Postgres adapters named in `settings`.
    pub(crate) fn from_settings(settings: Settings, db: PgPool, redis: RedisHandle) -> Self {
        let pipeline = ExamPipeline::from_settings(&settings, db.clone(), redis.clone());
        Self::new(settings, db, redis, pipeline)
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn pipeline(&self) -> &ExamPipeline {
        &self.inner.pipeline
    }
}
