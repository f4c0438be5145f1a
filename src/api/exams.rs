use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::errors::{pipeline_status, ApiError};
use crate::core::state::AppState;
use crate::schemas::exam::{
    DrainResponse, ExamSubmission, GradedExamResponse, ListExamsQuery, SubmitExamsResponse,
    SubmitQuery,
};
use crate::services::producer;
use crate::services::result_store::ResultFilter;
use crate::tasks::drain;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_exams).get(list_exams))
        .route("/drain", post(drain_exams))
        .route("/:row_key", get(get_exam))
}

async fn submit_exams(
    State(state): State<AppState>,
    Query(params): Query<SubmitQuery>,
    Json(payload): Json<Vec<ExamSubmission>>,
) -> Result<(StatusCode, Json<SubmitExamsResponse>), ApiError> {
    if payload.is_empty() {
        return Err(ApiError::BadRequest("At least one submission is required".to_string()));
    }

    let encoding = params.encoding.unwrap_or_default();
    let queue = state.pipeline().queue();
    let report = producer::enqueue_submissions(queue, &payload, encoding).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitExamsResponse::from_report(queue.name(), encoding, report)),
    ))
}

/// Runs one drain. A drain that stops early still returns what it graded.
async fn drain_exams(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DrainResponse>), ApiError> {
    let report = drain::run_exclusive(state.pipeline()).await?;

    let status = match &report.halt {
        None => StatusCode::CREATED,
        Some(err) => pipeline_status(err),
    };

    Ok((status, Json(DrainResponse::from_report(report))))
}

async fn list_exams(
    State(state): State<AppState>,
    Query(params): Query<ListExamsQuery>,
) -> Result<Json<Vec<GradedExamResponse>>, ApiError> {
    let partitions = state.pipeline().partitions();
    let partition_key = match (params.student_id, partitions.shared_partition()) {
        (Some(student_id), _) => partitions.partition_for(student_id),
        (None, Some(shared)) => shared.to_string(),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "student_id is required when results are partitioned per student".to_string(),
            ));
        }
    };

    let filter = ResultFilter { student_id: params.student_id, course_id: params.course_id };
    let exams = state
        .pipeline()
        .results()
        .query(&partition_key, filter)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to query graded exams"))?;

    Ok(Json(exams.into_iter().map(GradedExamResponse::from_db).collect()))
}

async fn get_exam(
    State(state): State<AppState>,
    Path(row_key): Path<String>,
) -> Result<Json<GradedExamResponse>, ApiError> {
    let exam = state
        .pipeline()
        .results()
        .get(&row_key)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch graded exam"))?
        .ok_or_else(|| ApiError::NotFound(format!("Graded exam {row_key} not found")))?;

    Ok(Json(GradedExamResponse::from_db(exam)))
}
