use crate::schemas::exam::ExamSubmission;
use crate::services::pipeline::PipelineError;
use crate::services::submission_queue::{
    encode_submission, MessageEncoding, QueueError, SubmissionQueue,
};

#[derive(Debug)]
pub(crate) struct EnqueueFailure {
    /// Position of the submission in the caller's batch.
    pub(crate) index: usize,
    pub(crate) error: QueueError,
}

#[derive(Debug, Default)]
pub(crate) struct EnqueueReport {
    pub(crate) enqueued: usize,
    pub(crate) message_ids: Vec<String>,
    pub(crate) failures: Vec<EnqueueFailure>,
}

/// Sends every submission as its own message, in batch order.
///
/// A missing queue fails the whole call before anything is sent. After that each item
/// stands alone: a rejected item is recorded in the report and the rest still go out.
pub(crate) async fn enqueue_submissions(
    queue: &dyn SubmissionQueue,
    submissions: &[ExamSubmission],
    encoding: MessageEncoding,
) -> Result<EnqueueReport, PipelineError> {
    match queue.exists().await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(queue = queue.name(), "Submission queue does not exist");
            return Err(PipelineError::queue_unavailable(
                queue.name(),
                &QueueError::NotFound(queue.name().to_string()),
            ));
        }
        Err(err) => return Err(PipelineError::queue_unavailable(queue.name(), &err)),
    }

    let mut report = EnqueueReport::default();
    for (index, submission) in submissions.iter().enumerate() {
        let sent = match encode_submission(submission, encoding) {
            Ok(body) => queue.send(body).await,
            Err(err) => Err(QueueError::Encode(err.to_string())),
        };

        match sent {
            Ok(message_id) => {
                tracing::debug!(
                    queue = queue.name(),
                    message_id = %message_id,
                    student_id = submission.student_id,
                    course_id = submission.course_id,
                    "Enqueued exam submission"
                );
                report.enqueued += 1;
                report.message_ids.push(message_id);
            }
            Err(error) => {
                tracing::error!(
                    queue = queue.name(),
                    index,
                    student_id = submission.student_id,
                    error = %error,
                    "Failed to enqueue exam submission"
                );
                metrics::counter!("exam_submissions_enqueue_failed_total").increment(1);
                report.failures.push(EnqueueFailure { index, error });
            }
        }
    }

    metrics::counter!("exam_submissions_enqueued_total", "encoding" => encoding.as_str())
        .increment(report.enqueued as u64);
    tracing::info!(
        queue = queue.name(),
        encoding = encoding.as_str(),
        enqueued = report.enqueued,
        failed = report.failures.len(),
        "Exam submission batch enqueued"
    );

    Ok(report)
}
