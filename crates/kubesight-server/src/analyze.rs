//! `POST /api/analyze`: a streamed, one-off analysis of a posted excerpt

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use kubesight_analysis::{AnalysisBridge, Fragment};
use kubesight_logs::{Redactor, bound_excerpt};
use kubesight_types::AnalysisRequest;

use crate::state::AppState;

pub(crate) async fn analyze_handler(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Response {
    if request.recent_log_chunk.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "recentLogChunk must not be empty").into_response();
    }

    let request = sanitize(&state.redactor, request, state.trigger.max_excerpt_chars);

    let body = match state.reasoning.clone() {
        Some(client) => {
            // Dropping the body (client went away) cancels the call
            let stream = AnalysisBridge::new(client).analyze(request);
            Body::from_stream(stream.into_text_stream().map(Ok::<_, Infallible>))
        }
        None => Body::from(
            Fragment::Error("analysis is not configured".to_string()).into_text(),
        ),
    };

    (
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Redact and bound everything that leaves the process
///
/// The excerpt is redacted before it is cut.
fn sanitize(redactor: &Redactor, mut request: AnalysisRequest, max_chars: usize) -> AnalysisRequest {
    let chunk = redactor.redact(&request.recent_log_chunk).into_owned();
    request.recent_log_chunk = bound_excerpt(&chunk, max_chars);
    request.question = request
        .question
        .map(|question| redactor.redact(&question).into_owned())
        .filter(|question| !question.trim().is_empty());
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_redacts_then_bounds() {
        let request = AnalysisRequest {
            recent_log_chunk: "old line\nlogin password=hunter2\nERROR boom".to_string(),
            question: Some("is token=abc123 valid?".to_string()),
            ..Default::default()
        };

        let request = sanitize(&Redactor::new(), request, 40);
        assert_eq!(request.recent_log_chunk, "login password=[REDACTED]\nERROR boom");
        assert_eq!(request.question.as_deref(), Some("is token=[REDACTED] valid?"));
    }

    #[test]
    fn test_blank_question_dropped() {
        let request = AnalysisRequest {
            recent_log_chunk: "x".to_string(),
            question: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(sanitize(&Redactor::new(), request, 100).question, None);
    }
}
