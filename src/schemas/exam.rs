use serde::{Deserialize, Serialize};

use crate::core::time::format_offset;
use crate::db::models::GradedExam;
use crate::services::producer::{EnqueueFailure, EnqueueReport};
use crate::services::submission_queue::MessageEncoding;
use crate::tasks::drain::DrainReport;

/// An exam result as sent by the caller and carried inside queue messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExamSubmission {
    #[serde(alias = "student_id", alias = "StudentId")]
    pub(crate) student_id: i32,
    #[serde(alias = "course_id", alias = "CourseId")]
    pub(crate) course_id: i32,
    #[serde(alias = "Points")]
    pub(crate) points: i32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitQuery {
    #[serde(default)]
    pub(crate) encoding: Option<MessageEncoding>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListExamsQuery {
    #[serde(default, alias = "studentId")]
    pub(crate) student_id: Option<i32>,
    #[serde(default, alias = "courseId")]
    pub(crate) course_id: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradedExamResponse {
    pub(crate) partition_key: String,
    pub(crate) row_key: String,
    pub(crate) timestamp: String,
    pub(crate) student_id: i32,
    pub(crate) course_id: i32,
    pub(crate) points: i32,
    pub(crate) passed: bool,
}

impl GradedExamResponse {
    pub(crate) fn from_db(exam: GradedExam) -> Self {
        Self {
            partition_key: exam.partition_key,
            row_key: exam.row_key,
            timestamp: format_offset(exam.timestamp),
            student_id: exam.student_id,
            course_id: exam.course_id,
            points: exam.points,
            passed: exam.passed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnqueueFailureResponse {
    pub(crate) index: usize,
    pub(crate) detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitExamsResponse {
    pub(crate) queue: String,
    pub(crate) encoding: MessageEncoding,
    pub(crate) enqueued: usize,
    pub(crate) failures: Vec<EnqueueFailureResponse>,
}

impl SubmitExamsResponse {
    pub(crate) fn from_report(
        queue: &str,
        encoding: MessageEncoding,
        report: EnqueueReport,
    ) -> Self {
        Self {
            queue: queue.to_string(),
            encoding,
            enqueued: report.enqueued,
            failures: report
                .failures
                .into_iter()
                .map(|EnqueueFailure { index, error }| EnqueueFailureResponse {
                    index,
                    detail: error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DrainResponse {
    pub(crate) graded: Vec<GradedExamResponse>,
    pub(crate) dead_lettered: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) halted: Option<DrainHaltResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DrainHaltResponse {
    pub(crate) reason: &'static str,
    pub(crate) detail: String,
}

impl DrainResponse {
    pub(crate) fn from_report(report: DrainReport) -> Self {
        Self {
            graded: report.graded.into_iter().map(GradedExamResponse::from_db).collect(),
            dead_lettered: report.dead_lettered,
            halted: report
                .halt
                .map(|err| DrainHaltResponse { reason: err.reason(), detail: err.to_string() }),
        }
    }
}
