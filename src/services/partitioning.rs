use crate::core::config::{PartitionMode, Settings};

/// Maps a student to the result-store partition holding their graded exams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PartitionStrategy {
    /// Single shared bucket; kept for stores written by earlier deployments.
    Fixed(String),
    /// One partition per student, keyed by the decimal student id.
    PerStudent,
}

impl PartitionStrategy {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let results = settings.results();
        match results.partition_mode {
            PartitionMode::Fixed => Self::Fixed(results.fixed_partition_key.clone()),
            PartitionMode::Student => Self::PerStudent,
        }
    }

    pub(crate) fn partition_for(&self, student_id: i32) -> String {
        match self {
            Self::Fixed(bucket) => bucket.clone(),
            Self::PerStudent => student_id.to_string(),
        }
    }

    /// The partition that holds every record, when there is exactly one.
    pub(crate) fn shared_partition(&self) -> Option<&str> {
        match self {
            Self::Fixed(bucket) => Some(bucket),
            Self::PerStudent => None,
        }
    }
}
