use sqlx::FromRow;
use time::OffsetDateTime;

/// Minimum score needed to pass a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub(crate) struct CourseThreshold {
    pub(crate) course_id: i32,
    pub(crate) threshold: i32,
}

impl CourseThreshold {
    pub(crate) fn is_passing(&self, points: i32) -> bool {
        points >= self.threshold
    }
}

/// One graded exam attempt as held by the result store.
///
/// Records are written once by the drain and replaced wholesale on upsert; the
/// row key is generated at grading time and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GradedExam {
    pub(crate) partition_key: String,
    pub(crate) row_key: String,
    pub(crate) timestamp: OffsetDateTime,
    pub(crate) student_id: i32,
    pub(crate) course_id: i32,
    pub(crate) points: i32,
    pub(crate) passed: bool,
}
