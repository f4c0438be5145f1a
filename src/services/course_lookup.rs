use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::models::CourseThreshold;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum LookupError {
    #[error("course {0} does not exist")]
    NotFound(i32),
    #[error("course lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read-only source of course passing thresholds.
#[async_trait]
pub(crate) trait CourseLookup: Send + Sync {
    async fn resolve_threshold(&self, course_id: i32) -> Result<CourseThreshold, LookupError>;
}

#[derive(Clone)]
pub(crate) struct PgCourseLookup {
    pool: PgPool,
}

impl PgCourseLookup {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseLookup for PgCourseLookup {
    async fn resolve_threshold(&self, course_id: i32) -> Result<CourseThreshold, LookupError> {
        repositories::courses::find_threshold(&self.pool, course_id)
            .await?
            .ok_or(LookupError::NotFound(course_id))
    }
}
