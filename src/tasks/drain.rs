//! One pass over the submission queue: peek, claim, decode, grade, store, delete.
//!
//! A message is deleted only after its graded record is stored. Anything that goes
//! wrong in between leaves the message claimed; when it becomes visible again its
//! dequeue count is non-zero and the next drain refuses to grade it a second time.
//!
//! Dead-lettering copies the stalled body first and deletes it from the main queue
//! second. When that delete fails the message stays behind, and a later drain adds a
//! second copy to the dead-letter queue; the failure is logged with the id of the
//! first copy.

use std::time::Instant;

use uuid::Uuid;

use crate::core::config::DrainPolicy;
use crate::core::time::{format_offset, now_utc};
use crate::db::models::GradedExam;
use crate::services::course_lookup::LookupError;
use crate::services::pipeline::{ExamPipeline, PipelineError};
use crate::services::submission_queue::{
    decode_submission, ClaimedMessage, DeliveryState, QueueError,
};

#[derive(Debug, Default)]
pub(crate) struct DrainReport {
    /// Records written by this drain, in queue order.
    pub(crate) graded: Vec<GradedExam>,
    /// Ids of stalled messages moved to the dead-letter queue.
    pub(crate) dead_lettered: Vec<String>,
    /// Why the drain stopped before the queue ran dry.
    pub(crate) halt: Option<PipelineError>,
}

impl DrainReport {
    pub(crate) fn is_clean(&self) -> bool {
        self.halt.is_none()
    }
}

enum Step {
    Graded(GradedExam),
    DeadLettered(String),
    Skipped,
    Exhausted,
}

/// Drains while holding the drain lock; fails fast when another drain holds it.
pub(crate) async fn run_exclusive(pipeline: &ExamPipeline) -> Result<DrainReport, PipelineError> {
    let token = match pipeline.lock().try_acquire().await {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::info!(queue = pipeline.queue().name(), "Drain already in progress");
            metrics::counter!("exam_drain_halts_total", "reason" => "DrainInProgress")
                .increment(1);
            return Err(PipelineError::DrainInProgress);
        }
        Err(err) => {
            return Err(PipelineError::QueueUnavailable {
                queue: pipeline.queue().name().to_string(),
                detail: err.to_string(),
            });
        }
    };

    let report = drain(pipeline).await;

    match pipeline.lock().release(&token).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            queue = pipeline.queue().name(),
            "Drain lock expired before the drain finished"
        ),
        Err(err) => tracing::warn!(error = %err, "Failed to release drain lock"),
    }

    Ok(report)
}

pub(crate) async fn drain(pipeline: &ExamPipeline) -> DrainReport {
    let started = Instant::now();
    let mut report = DrainReport::default();

    if let Err(err) = ensure_queue_exists(pipeline).await {
        report.halt = Some(err);
    }

    while report.halt.is_none() {
        match next_step(pipeline).await {
            Ok(Step::Graded(exam)) => report.graded.push(exam),
            Ok(Step::DeadLettered(message_id)) => report.dead_lettered.push(message_id),
            Ok(Step::Skipped) => {}
            Ok(Step::Exhausted) => break,
            Err((graded, err)) => {
                report.graded.extend(graded);
                report.halt = Some(err);
            }
        }
    }

    metrics::histogram!("exam_drain_duration_seconds").record(started.elapsed().as_secs_f64());
    match &report.halt {
        None => tracing::info!(
            queue = pipeline.queue().name(),
            graded = report.graded.len(),
            dead_lettered = report.dead_lettered.len(),
            "Drain finished"
        ),
        Some(err) => {
            metrics::counter!("exam_drain_halts_total", "reason" => err.reason()).increment(1);
            tracing::warn!(
                queue = pipeline.queue().name(),
                graded = report.graded.len(),
                reason = err.reason(),
                error = %err,
                "Drain halted"
            );
        }
    }

    report
}

async fn ensure_queue_exists(pipeline: &ExamPipeline) -> Result<(), PipelineError> {
    let queue = pipeline.queue();
    match queue.exists().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(PipelineError::QueueUnavailable {
            queue: queue.name().to_string(),
            detail: "queue does not exist".to_string(),
        }),
        Err(err) => Err(PipelineError::queue_unavailable(queue.name(), &err)),
    }
}

/// Processes at most one message. A graded record that was stored before a later
/// failure is handed back alongside the error so the caller still reports it.
async fn next_step(
    pipeline: &ExamPipeline,
) -> Result<Step, (Option<GradedExam>, PipelineError)> {
    let queue = pipeline.queue();
    let unavailable = |err: QueueError| -> (Option<GradedExam>, PipelineError) {
        (None, PipelineError::queue_unavailable(queue.name(), &err))
    };

    let Some(peeked) = queue.peek().await.map_err(unavailable)? else {
        return Ok(Step::Exhausted);
    };
    if let DeliveryState::Stalled { claims } = peeked.delivery_state() {
        if pipeline.policy() == DrainPolicy::Halt {
            tracing::warn!(
                message_id = %peeked.id,
                claims,
                queued_at = %format_offset(peeked.inserted_at),
                "Next submission was claimed before without being deleted"
            );
            return Err((None, PipelineError::AlreadyClaimed { message_id: peeked.id, claims }));
        }
    }

    let Some(claimed) = queue.receive().await.map_err(unavailable)? else {
        // Taken by someone else between peek and receive.
        return Ok(Step::Skipped);
    };
    if let DeliveryState::Stalled { claims } = claimed.prior_state() {
        return match pipeline.policy() {
            DrainPolicy::Halt => {
                Err((None, PipelineError::AlreadyClaimed { message_id: claimed.id, claims }))
            }
            DrainPolicy::DeadLetter => dead_letter(pipeline, claimed, claims)
                .await
                .map(Step::DeadLettered)
                .map_err(|err| (None, err)),
        };
    }

    let exam = grade(pipeline, &claimed).await.map_err(|err| (None, err))?;

    if let Err(err) = queue.delete(&claimed).await {
        tracing::error!(
            message_id = %claimed.id,
            row_key = %exam.row_key,
            error = %err,
            "Graded exam stored but message could not be deleted"
        );
        return Err((Some(exam), PipelineError::queue_unavailable(queue.name(), &err)));
    }

    Ok(Step::Graded(exam))
}

async fn grade(
    pipeline: &ExamPipeline,
    claimed: &ClaimedMessage,
) -> Result<GradedExam, PipelineError> {
    let submission = decode_submission(&claimed.body).map_err(|err| {
        tracing::error!(message_id = %claimed.id, error = %err, "Failed to decode submission");
        PipelineError::Decode { message_id: claimed.id.clone(), detail: err.to_string() }
    })?;

    let threshold =
        pipeline.courses().resolve_threshold(submission.course_id).await.map_err(|err| {
            match err {
                LookupError::NotFound(course_id) => PipelineError::CourseNotFound {
                    course_id,
                    message_id: claimed.id.clone(),
                },
                LookupError::Database(source) => PipelineError::CourseLookup {
                    course_id: submission.course_id,
                    detail: source.to_string(),
                },
            }
        })?;

    let exam = GradedExam {
        partition_key: pipeline.partitions().partition_for(submission.student_id),
        row_key: Uuid::new_v4().to_string(),
        timestamp: now_utc(),
        student_id: submission.student_id,
        course_id: submission.course_id,
        points: submission.points,
        passed: threshold.is_passing(submission.points),
    };

    pipeline.results().upsert(&exam).await.map_err(|source| PipelineError::Store {
        row_key: exam.row_key.clone(),
        source,
    })?;

    let outcome = if exam.passed { "passed" } else { "failed" };
    metrics::counter!("exam_grading_total", "outcome" => outcome).increment(1);
    tracing::info!(
        message_id = %claimed.id,
        queued_at = %format_offset(claimed.inserted_at),
        student_id = exam.student_id,
        course_id = exam.course_id,
        row_key = %exam.row_key,
        points = exam.points,
        threshold = threshold.threshold,
        passed = exam.passed,
        "Graded exam submission"
    );

    Ok(exam)
}

/// Moves a stalled message to the dead-letter queue as-is and drops it from the main
/// queue. The body is never graded.
async fn dead_letter(
    pipeline: &ExamPipeline,
    claimed: ClaimedMessage,
    claims: u32,
) -> Result<String, PipelineError> {
    let poison = pipeline.dead_letter();
    let poison_id = poison
        .send(claimed.body.clone())
        .await
        .map_err(|err| PipelineError::queue_unavailable(poison.name(), &err))?;

    let queue = pipeline.queue();
    if let Err(err) = queue.delete(&claimed).await {
        tracing::error!(
            message_id = %claimed.id,
            dead_letter_id = %poison_id,
            dead_letter_queue = poison.name(),
            error = %err,
            "Stalled submission copied to dead-letter queue but not deleted"
        );
        return Err(PipelineError::queue_unavailable(queue.name(), &err));
    }

    metrics::counter!("exam_dead_lettered_total").increment(1);
    tracing::warn!(
        message_id = %claimed.id,
        dead_letter_id = %poison_id,
        dead_letter_queue = poison.name(),
        claims,
        "Moved stalled submission to dead-letter queue"
    );

    Ok(claimed.id)
}
