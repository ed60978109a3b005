//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters (sizes, ids) and basic result info.

use std::sync::Arc;

use axum::{
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::domain::{GradeOutcome, ModelAnswer};
use crate::error::{ProviderError, ServiceError};
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

/// `{ error, details? }` body with the status derived from the failure kind.
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
  fn from(e: ServiceError) -> Self {
    Self(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      ServiceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
      ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
      ServiceError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(target: "eisaku_backend", %status, error = %self.0, "HTTP request failed");
    (status, Json(ProviderError::from(self.0))).into_response()
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, openai: state.openai.is_some() })
}

#[instrument(level = "info", skip(state, body), fields(difficulty = ?body.difficulty, excluded = body.excluded_themes.len()))]
pub async fn http_post_question(
  State(state): State<Arc<AppState>>,
  Json(body): Json<QuestionRequest>,
) -> Result<Json<QuestionOut>, ApiError> {
  let q = logic::fetch_question(&state, &body).await?;
  info!(target: "question", id = %q.id, theme = %q.theme, "HTTP question served");
  Ok(Json(to_out(&q)))
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id, answer_len = body.user_answer.len()))]
pub async fn http_post_correct(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SingleGradeRequest>,
) -> Result<Json<GradeOutcome>, ApiError> {
  Ok(Json(logic::grade_single(&state, &body).await?))
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id, sentences = body.user_sentences.len()))]
pub async fn http_post_correct_multi(
  State(state): State<Arc<AppState>>,
  Json(body): Json<MultiGradeRequest>,
) -> Result<Json<GradeOutcome>, ApiError> {
  Ok(Json(logic::grade_multi(&state, &body).await?))
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id))]
pub async fn http_post_model_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ModelAnswerRequest>,
) -> Result<Json<ModelAnswer>, ApiError> {
  Ok(Json(logic::model_answer(&state, &body).await?))
}

#[instrument(level = "info", skip(body), fields(text_len = body.text.len()))]
pub async fn http_post_inspect(Json(body): Json<InspectIn>) -> impl IntoResponse {
  Json(logic::inspect(&body.text))
}

#[cfg(test)]
mod tests {
  use axum::body::{to_bytes, Body};
  use axum::http::{Request, StatusCode};
  use serde_json::Value;
  use tower::ServiceExt;

  use crate::config::AgentConfig;
  use crate::routes::build_router;
  use crate::state::AppState;

  fn app() -> axum::Router {
    build_router(std::sync::Arc::new(AppState::with_config(AgentConfig::default(), None)))
  }

  async fn post(uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap();
    let res = app().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn health_reports_openai_disabled() {
    let res = app().oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["openai"], false);
  }

  #[tokio::test]
  async fn question_endpoint_returns_question_id() {
    let (status, json) = post("/api/v1/question", serde_json::json!({ "excludedThemes": ["ブログ"] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["theme"], "日常生活");
    assert_eq!(json["questionId"], json["id"]);
    assert!(json.get("modelAnswer").is_none());
  }

  #[tokio::test]
  async fn bad_request_carries_details() {
    let themes: Vec<String> = (0..11).map(|i| format!("t{i}")).collect();
    let (status, json) = post("/api/v1/question", serde_json::json!({ "excludedThemes": themes })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid request");
    assert_eq!(json["details"]["field"], "excludedThemes");
  }

  #[tokio::test]
  async fn unknown_question_is_not_found() {
    let (status, json) = post("/api/v1/model_answer", serde_json::json!({ "questionId": "nope" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nope"));
  }

  #[tokio::test]
  async fn correct_multi_returns_points_and_checks() {
    let (status, json) = post(
      "/api/v1/correct_multi",
      serde_json::json!({
        "questionId": "seed-station-cafe",
        "userSentences": ["A new cafe opened near the station.", "", "The coffee was very good."],
        "sourceSentences": ["駅の近くに新しいカフェができた。", "週末に友達と行ってみた。", "コーヒーがとてもおいしかった。"],
        "targetWordRange": { "min": 15, "max": 40 },
        "wordCount": 12
      }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["points"][0]["level"], "OVERALL");
    assert_eq!(json["points"][2]["level"], "ERROR");
    assert_eq!(json["points"][2]["sentenceNo"], 2);
    assert_eq!(json["constraintChecks"]["wordCount"], 12);
  }

  #[tokio::test]
  async fn inspect_exposes_word_rule() {
    let (status, json) = post("/api/v1/text/inspect", serde_json::json!({ "text": "Hello world．" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["canonical"], "Hello world.");
    assert_eq!(json["wordCount"], 2);
    assert_eq!(json["rule"], "word-rule.v1");
  }
}
