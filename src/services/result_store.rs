//! Keyed store for graded exams, laid out like a table-entity store: every record is
//! a flat property set addressed by `(partition key, row key)`.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::redis::RedisHandle;
use crate::core::time::{format_offset, parse_offset};
use crate::db::models::GradedExam;

const KEY_NAMESPACE: &str = "exam-ingest:table";

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("result store backend error: {0}")]
    Backend(String),
    #[error("stored entity {row_key} is malformed: {detail}")]
    Corrupt { row_key: String, detail: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ResultFilter {
    pub(crate) student_id: Option<i32>,
    pub(crate) course_id: Option<i32>,
}

impl ResultFilter {
    pub(crate) fn student(student_id: i32) -> Self {
        Self { student_id: Some(student_id), course_id: None }
    }

    pub(crate) fn matches(&self, exam: &GradedExam) -> bool {
        self.student_id.map_or(true, |id| exam.student_id == id)
            && self.course_id.map_or(true, |id| exam.course_id == id)
    }
}

#[async_trait]
pub(crate) trait ResultStore: Send + Sync {
    /// Writes the record, replacing any record with the same keys.
    async fn upsert(&self, exam: &GradedExam) -> Result<(), StoreError>;

    async fn get(&self, row_key: &str) -> Result<Option<GradedExam>, StoreError>;

    /// Records in one partition matching `filter`, oldest first.
    async fn query(
        &self,
        partition_key: &str,
        filter: ResultFilter,
    ) -> Result<Vec<GradedExam>, StoreError>;
}

pub(crate) fn sort_by_grading_time(exams: &mut [GradedExam]) {
    exams.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.row_key.cmp(&b.row_key)));
}

fn to_properties(exam: &GradedExam) -> Vec<(&'static str, String)> {
    vec![
        ("PartitionKey", exam.partition_key.clone()),
        ("RowKey", exam.row_key.clone()),
        ("Timestamp", format_offset(exam.timestamp)),
        ("StudentId", exam.student_id.to_string()),
        ("CourseId", exam.course_id.to_string()),
        ("Points", exam.points.to_string()),
        ("Passed", exam.passed.to_string()),
    ]
}

fn from_properties(
    row_key: &str,
    mut props: HashMap<String, String>,
) -> Result<GradedExam, StoreError> {
    let mut take = |name: &str| {
        props.remove(name).ok_or_else(|| StoreError::Corrupt {
            row_key: row_key.to_string(),
            detail: format!("missing property {name}"),
        })
    };
    let corrupt = |name: &str, value: &str| StoreError::Corrupt {
        row_key: row_key.to_string(),
        detail: format!("invalid {name}: {value}"),
    };

    let partition_key = take("PartitionKey")?;
    let stored_row_key = take("RowKey")?;
    let timestamp = take("Timestamp")?;
    let student_id = take("StudentId")?;
    let course_id = take("CourseId")?;
    let points = take("Points")?;
    let passed = take("Passed")?;

    Ok(GradedExam {
        partition_key,
        timestamp: parse_offset(&timestamp).map_err(|_| corrupt("Timestamp", &timestamp))?,
        student_id: student_id.parse().map_err(|_| corrupt("StudentId", &student_id))?,
        course_id: course_id.parse().map_err(|_| corrupt("CourseId", &course_id))?,
        points: points.parse().map_err(|_| corrupt("Points", &points))?,
        passed: passed.parse().map_err(|_| corrupt("Passed", &passed))?,
        row_key: stored_row_key,
    })
}

/// Result store backed by Redis hashes.
///
/// Each entity is one hash; a set per partition lists its row keys and a table-wide
/// hash maps row keys back to their partition for lookups by id.
#[derive(Clone)]
pub(crate) struct RedisResultStore {
    redis: RedisHandle,
    table: String,
}

impl RedisResultStore {
    pub(crate) fn new(redis: RedisHandle, table: impl Into<String>) -> Self {
        Self { redis, table: table.into() }
    }

    fn entity_key(&self, partition_key: &str, row_key: &str) -> String {
        format!("{KEY_NAMESPACE}:{}:entity:{partition_key}:{row_key}", self.table)
    }

    fn partition_key(&self, partition_key: &str) -> String {
        format!("{KEY_NAMESPACE}:{}:partition:{partition_key}", self.table)
    }

    fn row_index_key(&self) -> String {
        format!("{KEY_NAMESPACE}:{}:rows", self.table)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn upsert(&self, exam: &GradedExam) -> Result<(), StoreError> {
        let mut conn = self.redis.connection().await?;
        let entity_key = self.entity_key(&exam.partition_key, &exam.row_key);

        redis::pipe()
            .atomic()
            .del(&entity_key)
            .ignore()
            .hset_multiple(&entity_key, &to_properties(exam))
            .ignore()
            .sadd(self.partition_key(&exam.partition_key), &exam.row_key)
            .ignore()
            .hset(self.row_index_key(), &exam.row_key, &exam.partition_key)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, row_key: &str) -> Result<Option<GradedExam>, StoreError> {
        let mut conn = self.redis.connection().await?;

        let partition: Option<String> = redis::cmd("HGET")
            .arg(self.row_index_key())
            .arg(row_key)
            .query_async(&mut conn)
            .await?;
        let Some(partition) = partition else {
            return Ok(None);
        };

        let props: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.entity_key(&partition, row_key))
            .query_async(&mut conn)
            .await?;
        if props.is_empty() {
            return Ok(None);
        }

        from_properties(row_key, props).map(Some)
    }

    async fn query(
        &self,
        partition_key: &str,
        filter: ResultFilter,
    ) -> Result<Vec<GradedExam>, StoreError> {
        let mut conn = self.redis.connection().await?;

        let row_keys: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.partition_key(partition_key))
            .query_async(&mut conn)
            .await?;
        if row_keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for row_key in &row_keys {
            pipe.cmd("HGETALL").arg(self.entity_key(partition_key, row_key));
        }
        let entities: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut exams = Vec::with_capacity(entities.len());
        for (row_key, props) in row_keys.iter().zip(entities) {
            if props.is_empty() {
                continue;
            }
            let exam = from_properties(row_key, props)?;
            if filter.matches(&exam) {
                exams.push(exam);
            }
        }

        sort_by_grading_time(&mut exams);
        Ok(exams)
    }
}
