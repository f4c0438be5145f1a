use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::core::config::{DrainPolicy, Settings};
use crate::core::redis::RedisHandle;
use crate::services::course_lookup::{CourseLookup, PgCourseLookup};
use crate::services::drain_lock::{DrainLock, RedisDrainLock};
use crate::services::partitioning::PartitionStrategy;
use crate::services::result_store::{RedisResultStore, ResultStore, StoreError};
use crate::services::submission_queue::{QueueError, RedisSubmissionQueue, SubmissionQueue};

/// Reasons a producer call or a drain stops.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("queue '{queue}' is unavailable: {detail}")]
    QueueUnavailable { queue: String, detail: String },
    #[error("message {message_id} was claimed {claims} time(s) before and never confirmed")]
    AlreadyClaimed { message_id: String, claims: u32 },
    #[error("message {message_id} could not be decoded: {detail}")]
    Decode { message_id: String, detail: String },
    #[error("course {course_id} referenced by message {message_id} does not exist")]
    CourseNotFound { course_id: i32, message_id: String },
    #[error("course {course_id} could not be read: {detail}")]
    CourseLookup { course_id: i32, detail: String },
    #[error("failed to store graded exam {row_key}: {source}")]
    Store {
        row_key: String,
        #[source]
        source: StoreError,
    },
    #[error("another drain is already running")]
    DrainInProgress,
}

impl PipelineError {
    pub(crate) fn queue_unavailable(queue: &str, err: &QueueError) -> Self {
        Self::QueueUnavailable { queue: queue.to_string(), detail: err.to_string() }
    }

    /// Stable label used in metrics and API responses.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::QueueUnavailable { .. } => "QueueUnavailable",
            Self::AlreadyClaimed { .. } => "AlreadyClaimed",
            Self::Decode { .. } => "DecodeError",
            Self::CourseNotFound { .. } => "CourseNotFound",
            Self::CourseLookup { .. } => "CourseLookupFailed",
            Self::Store { .. } => "StoreError",
            Self::DrainInProgress => "DrainInProgress",
        }
    }
}

/// The stores one drain works against, plus the grading knobs.
#[derive(Clone)]
pub(crate) struct ExamPipeline {
    queue: Arc<dyn SubmissionQueue>,
    dead_letter: Arc<dyn SubmissionQueue>,
    courses: Arc<dyn CourseLookup>,
    results: Arc<dyn ResultStore>,
    lock: Arc<dyn DrainLock>,
    partitions: PartitionStrategy,
    policy: DrainPolicy,
}

impl ExamPipeline {
    pub(crate) fn new(
        queue: Arc<dyn SubmissionQueue>,
        dead_letter: Arc<dyn SubmissionQueue>,
        courses: Arc<dyn CourseLookup>,
        results: Arc<dyn ResultStore>,
        lock: Arc<dyn DrainLock>,
        partitions: PartitionStrategy,
        policy: DrainPolicy,
    ) -> Self {
        Self { queue, dead_letter, courses, results, lock, partitions, policy }
    }

    pub(crate) fn from_settings(settings: &Settings, db: PgPool, redis: RedisHandle) -> Self {
        let queue_settings = settings.queue();
        let visibility =
            time::Duration::seconds(saturating_i64(queue_settings.visibility_timeout_seconds));
        let lock_ttl = std::time::Duration::from_secs(settings.drain().lock_ttl_seconds);

        Self::new(
            Arc::new(RedisSubmissionQueue::new(redis.clone(), &queue_settings.name, visibility)),
            Arc::new(RedisSubmissionQueue::new(
                redis.clone(),
                &queue_settings.dead_letter_name,
                visibility,
            )),
            Arc::new(PgCourseLookup::new(db)),
            Arc::new(RedisResultStore::new(redis.clone(), &settings.results().table)),
            Arc::new(RedisDrainLock::new(redis, &queue_settings.name, lock_ttl)),
            PartitionStrategy::from_settings(settings),
            settings.drain().policy,
        )
    }

    pub(crate) fn queue(&self) -> &dyn SubmissionQueue {
        self.queue.as_ref()
    }

    pub(crate) fn dead_letter(&self) -> &dyn SubmissionQueue {
        self.dead_letter.as_ref()
    }

    pub(crate) fn courses(&self) -> &dyn CourseLookup {
        self.courses.as_ref()
    }

    pub(crate) fn results(&self) -> &dyn ResultStore {
        self.results.as_ref()
    }

    pub(crate) fn lock(&self) -> &dyn DrainLock {
        self.lock.as_ref()
    }

    pub(crate) fn partitions(&self) -> &PartitionStrategy {
        &self.partitions
    }

    pub(crate) fn policy(&self) -> DrainPolicy {
        self.policy
    }

    /// Creates the submission queue and, when it is used, the dead-letter queue.
    pub(crate) async fn ensure_queues(&self) -> Result<(), PipelineError> {
        self.queue
            .create_if_missing()
            .await
            .map_err(|err| PipelineError::queue_unavailable(self.queue.name(), &err))?;

        if self.policy == DrainPolicy::DeadLetter {
            self.dead_letter
                .create_if_missing()
                .await
                .map_err(|err| PipelineError::queue_unavailable(self.dead_letter.name(), &err))?;
        }
        Ok(())
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable_labels() {
        let err = PipelineError::CourseNotFound { course_id: 4, message_id: "m1".to_string() };
        assert_eq!(err.reason(), "CourseNotFound");
        assert!(err.to_string().contains("course 4"));

        let err = PipelineError::Decode { message_id: "m2".to_string(), detail: "bad".into() };
        assert_eq!(err.reason(), "DecodeError");
        assert_eq!(PipelineError::DrainInProgress.reason(), "DrainInProgress");
    }

    #[test]
    fn queue_unavailable_names_the_queue() {
        let err = PipelineError::queue_unavailable("exams", &QueueError::NotFound("exams".into()));
        assert_eq!(err.reason(), "QueueUnavailable");
        assert!(err.to_string().starts_with("queue 'exams' is unavailable"));
    }
}
