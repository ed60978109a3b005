//! Collaborator operations shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Question provision (generated / bank / fallback)
//!   - Grading of single-paragraph and per-sentence answers
//!   - Model answers
//!   - Text inspection (the shared word and split rules)
//!
//! Every operation prefers OpenAI and falls back to local logic when it is
//! disabled or keeps failing.

use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::domain::{CorrectionPoint, GradeOutcome, Level, ModelAnswer, Question};
use crate::error::ServiceError;
use crate::grading::{
  constraint_checks, local_grade_multi, local_grade_single, normalize_multi, normalize_single, required_points, RawGrade,
};
use crate::protocol::{InspectOut, ModelAnswerRequest, MultiGradeRequest, QuestionRequest, SingleGradeRequest};
use crate::split::{split_english, split_japanese};
use crate::state::AppState;
use crate::text::{canonicalize, count_words, is_english_dominant, WORD_RULE};

fn bad_request(field: &str, message: impl Into<String>) -> ServiceError {
  ServiceError::BadRequest { details: json!({ "field": field, "message": message.into() }) }
}

#[instrument(level = "info", skip(state, req), fields(difficulty = ?req.difficulty, excluded = req.excluded_themes.len()))]
pub async fn fetch_question(state: &AppState, req: &QuestionRequest) -> Result<Question, ServiceError> {
  let max = state.limits.max_excluded_themes;
  if req.excluded_themes.len() > max {
    return Err(bad_request("excludedThemes", format!("at most {max} themes can be excluded")));
  }
  let difficulty = req
    .difficulty
    .as_deref()
    .map(str::trim)
    .filter(|d| !d.is_empty())
    .unwrap_or(&state.limits.default_difficulty);
  let (q, origin) = state.choose_question(difficulty, &req.excluded_themes).await;
  info!(target: "question", id = %q.id, %origin, "Question served");
  Ok(q)
}

/// Japanese source for the grading prompt, preferring what the request carries.
fn single_source(req: &SingleGradeRequest, question: Option<&Question>) -> Option<(String, usize)> {
  if let Some(p) = req.source_paragraphs.as_ref().filter(|p| !p.is_empty()) {
    return Some((p.join("\n\n"), split_japanese(p).len()));
  }
  if let Some(s) = req.source_sentences.as_ref().filter(|s| !s.is_empty()) {
    return Some((s.join("\n"), s.len()));
  }
  if let Some(p) = req.prompt_text.as_ref().filter(|p| !p.trim().is_empty()) {
    return Some((p.clone(), 0));
  }
  question.map(|q| {
    let sentences = match (q.source_paragraphs(), q.source_sentences()) {
      (Some(p), _) => split_japanese(p).len(),
      (_, Some(s)) => s.len(),
      _ => 0,
    };
    (q.source_text(), sentences)
  })
}

fn has_sentence_records(points: &[CorrectionPoint]) -> bool {
  points.iter().any(|p| p.level != Level::Overall)
}

/// Fill the model answer from a follow-up call or the stored reference. Failure is tolerated.
async fn attach_model_answer(state: &AppState, outcome: &mut GradeOutcome, question: Option<&Question>, source: &str) {
  if outcome.model_answer.as_deref().is_some_and(|a| !a.trim().is_empty()) {
    return;
  }
  if let Some(oa) = &state.openai {
    match oa.model_answer(&state.prompts, source).await {
      Ok(ma) => {
        outcome.model_answer = Some(ma.model_answer);
        outcome.model_answer_explanation = Some(ma.model_answer_explanation);
        return;
      }
      Err(e) => warn!(target: "grading", error = %e, "Follow-up model answer failed"),
    }
  }
  if let Some(q) = question {
    outcome.model_answer = q.model_answer.clone();
    outcome.model_answer_explanation = q.model_answer_explanation.clone();
  }
}

#[instrument(level = "info", skip(state, req), fields(question_id = %req.question_id, answer_len = req.user_answer.len()))]
pub async fn grade_single(state: &AppState, req: &SingleGradeRequest) -> Result<GradeOutcome, ServiceError> {
  if req.user_answer.trim().is_empty() {
    return Err(bad_request("userAnswer", "answer is empty"));
  }
  if !req.target_word_range.is_valid() {
    return Err(bad_request("targetWordRange", "min must not exceed max"));
  }
  let question = state.get_question(&req.question_id).await;
  let (source, source_sentences) = single_source(req, question.as_ref())
    .ok_or_else(|| ServiceError::NotFound(format!("Unknown questionId: {}", req.question_id)))?;

  let answer = canonicalize(&req.user_answer);
  let checks = constraint_checks(&answer, req.target_word_range, req.word_count);
  let required = required_points(source_sentences, &answer);

  let mut points = None;
  let mut raw_extra: Option<RawGrade> = None;
  if let Some(oa) = &state.openai {
    for attempt in 1..=state.limits.max_retries.max(1) {
      match oa.grade_single(&state.prompts, &source, &answer, required).await {
        Ok(mut raw) => {
          let normalized = normalize_single(std::mem::take(&mut raw.points));
          if has_sentence_records(&normalized) {
            points = Some(normalized);
            raw_extra = Some(raw);
            break;
          }
          warn!(target: "grading", attempt, "Grader returned no sentence records");
        }
        Err(e) => warn!(target: "grading", attempt, error = %e, "Grading attempt failed"),
      }
    }
    if points.is_none() {
      error!(target: "grading", id = %req.question_id, "OpenAI grading exhausted retries; using local grader");
    }
  }
  let points = points.unwrap_or_else(|| local_grade_single(question.as_ref(), &answer));

  let raw = raw_extra.unwrap_or_default();
  let mut outcome = GradeOutcome {
    points,
    constraint_checks: checks,
    model_answer: raw.model_answer.filter(|a| !a.trim().is_empty()),
    model_answer_explanation: raw.model_answer_explanation,
  };
  attach_model_answer(state, &mut outcome, question.as_ref(), &source).await;
  info!(target: "grading", id = %req.question_id, points = outcome.points.len(), words = outcome.constraint_checks.word_count, "Single answer graded");
  Ok(outcome)
}

#[instrument(level = "info", skip(state, req), fields(question_id = %req.question_id, sentences = req.user_sentences.len()))]
pub async fn grade_multi(state: &AppState, req: &MultiGradeRequest) -> Result<GradeOutcome, ServiceError> {
  if req.source_sentences.is_empty() {
    return Err(bad_request("sourceSentences", "no source sentences"));
  }
  if req.user_sentences.len() != req.source_sentences.len() {
    return Err(bad_request(
      "userSentences",
      format!("expected {} entries, got {}", req.source_sentences.len(), req.user_sentences.len()),
    ));
  }
  if req.user_sentences.iter().all(|s| s.trim().is_empty()) {
    return Err(bad_request("userSentences", "every sentence is empty"));
  }
  if !req.target_word_range.is_valid() {
    return Err(bad_request("targetWordRange", "min must not exceed max"));
  }
  let question = state.get_question(&req.question_id).await;

  let user_sentences: Vec<String> = req.user_sentences.iter().map(|s| canonicalize(s)).collect();
  let joined = user_sentences.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
  let checks = constraint_checks(&joined, req.target_word_range, req.word_count);

  let mut graded = None;
  if let Some(oa) = &state.openai {
    for attempt in 1..=state.limits.max_retries.max(1) {
      match oa.grade_multi(&state.prompts, &req.user_sentences, &req.source_sentences).await {
        Ok(raw) => {
          let points = normalize_multi(raw.points, &req.user_sentences, &req.source_sentences, raw.corrected.as_deref());
          if has_sentence_records(&points) {
            graded = Some((points, raw.model_answer, raw.model_answer_explanation));
            break;
          }
          warn!(target: "grading", attempt, "Grader returned no sentence records");
        }
        Err(e) => warn!(target: "grading", attempt, error = %e, "Grading attempt failed"),
      }
    }
    if graded.is_none() {
      error!(target: "grading", id = %req.question_id, "OpenAI grading exhausted retries; using local grader");
    }
  }
  let (points, model_answer, model_answer_explanation) = graded
    .unwrap_or_else(|| (local_grade_multi(question.as_ref(), &req.user_sentences, &req.source_sentences), None, None));

  let mut outcome = GradeOutcome {
    points,
    constraint_checks: checks,
    model_answer: model_answer.filter(|a| !a.trim().is_empty()),
    model_answer_explanation,
  };
  attach_model_answer(state, &mut outcome, question.as_ref(), &req.source_sentences.join("\n")).await;
  info!(target: "grading", id = %req.question_id, points = outcome.points.len(), words = outcome.constraint_checks.word_count, "Per-sentence answer graded");
  Ok(outcome)
}

#[instrument(level = "info", skip(state, req), fields(question_id = %req.question_id))]
pub async fn model_answer(state: &AppState, req: &ModelAnswerRequest) -> Result<ModelAnswer, ServiceError> {
  let question = state.get_question(&req.question_id).await;
  let source = match (&question, req.prompt_text.as_deref().filter(|p| !p.trim().is_empty())) {
    (Some(q), _) => q.source_text(),
    (None, Some(p)) => p.to_string(),
    (None, None) => return Err(ServiceError::NotFound(format!("Unknown questionId: {}", req.question_id))),
  };

  if let Some(oa) = &state.openai {
    for attempt in 1..=state.limits.max_retries.max(1) {
      match oa.model_answer(&state.prompts, &source).await {
        Ok(ma) => return Ok(ma),
        Err(e) => warn!(target: "grading", attempt, error = %e, "Model answer attempt failed"),
      }
    }
  }

  match question.and_then(|q| q.model_answer.map(|a| (a, q.model_answer_explanation))) {
    Some((model_answer, explanation)) => Ok(ModelAnswer {
      model_answer,
      model_answer_explanation: explanation.unwrap_or_default(),
    }),
    None => {
      error!(target: "grading", id = %req.question_id, "No model answer available");
      Err(ServiceError::Upstream("Model answer unavailable".into()))
    }
  }
}

/// What the shared text rules make of a piece of learner text.
pub fn inspect(text: &str) -> InspectOut {
  let canonical = canonicalize(text);
  InspectOut {
    word_count: count_words(&canonical),
    english_dominant: is_english_dominant(&canonical),
    sentences: split_english(&canonical),
    canonical,
    rule: WORD_RULE,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AgentConfig;
  use crate::domain::TargetWords;

  fn state() -> AppState {
    AppState::with_config(AgentConfig::default(), None)
  }

  fn multi_req(user: &[&str]) -> MultiGradeRequest {
    MultiGradeRequest {
      question_id: "seed-station-cafe".into(),
      user_sentences: user.iter().map(|s| s.to_string()).collect(),
      source_sentences: vec![
        "駅の近くに新しいカフェができた。".into(),
        "週末に友達と行ってみた。".into(),
        "コーヒーがとてもおいしかった。".into(),
      ],
      target_word_range: TargetWords { min: 15, max: 40 },
      word_count: None,
    }
  }

  #[tokio::test]
  async fn too_many_excluded_themes_is_a_bad_request() {
    let s = state();
    let req = QuestionRequest { difficulty: None, excluded_themes: (0..11).map(|i| format!("t{i}")).collect() };
    assert!(matches!(fetch_question(&s, &req).await, Err(ServiceError::BadRequest { .. })));
  }

  #[tokio::test]
  async fn fetched_question_is_stored() {
    let s = state();
    let q = fetch_question(&s, &QuestionRequest::default()).await.unwrap();
    assert_eq!(s.get_question(&q.id).await, Some(q));
  }

  #[tokio::test]
  async fn local_multi_grading_against_reference() {
    let s = state();
    let req = multi_req(&["A new cafe opened near the station.", "I go there with friend at weekend.", ""]);
    let outcome = grade_multi(&s, &req).await.unwrap();
    assert_eq!(outcome.points.len(), 4);
    assert_eq!(outcome.points[1].level, Level::Ok);
    assert_eq!(outcome.points[2].level, Level::Error);
    assert_eq!(outcome.points[3].level, Level::Error);
    assert_eq!(outcome.constraint_checks.word_count, 14);
    assert!(outcome.model_answer.as_deref().is_some_and(|a| a.starts_with("A new cafe")));
  }

  #[tokio::test]
  async fn multi_grading_rejects_mismatched_lengths() {
    let s = state();
    let req = multi_req(&["Only one."]);
    assert!(matches!(grade_multi(&s, &req).await, Err(ServiceError::BadRequest { .. })));
    let req = multi_req(&["", " ", ""]);
    assert!(matches!(grade_multi(&s, &req).await, Err(ServiceError::BadRequest { .. })));
  }

  #[tokio::test]
  async fn single_grading_for_unknown_question_without_source_is_not_found() {
    let s = state();
    let req = SingleGradeRequest {
      question_id: "nope".into(),
      source_sentences: None,
      source_paragraphs: None,
      prompt_text: None,
      user_answer: "I like it.".into(),
      target_word_range: TargetWords::default(),
      word_count: Some(3),
    };
    assert!(matches!(grade_single(&s, &req).await, Err(ServiceError::NotFound(_))));
  }

  #[tokio::test]
  async fn single_grading_with_prompt_text() {
    let s = state();
    let req = SingleGradeRequest {
      question_id: "adhoc".into(),
      source_sentences: None,
      source_paragraphs: None,
      prompt_text: Some("Describe your favourite season.".into()),
      user_answer: "I like spring. It is warm．".into(),
      target_word_range: TargetWords { min: 3, max: 10 },
      word_count: Some(6),
    };
    let outcome = grade_single(&s, &req).await.unwrap();
    assert_eq!(outcome.points[0].level, Level::Overall);
    assert_eq!(outcome.points.len(), 3);
    assert!(outcome.constraint_checks.within_word_range);
    assert!(outcome.model_answer.is_none());
  }

  #[tokio::test]
  async fn model_answer_from_stored_reference() {
    let s = state();
    let ma = model_answer(&s, &ModelAnswerRequest { question_id: "seed-station-cafe".into(), prompt_text: None }).await.unwrap();
    assert!(ma.model_answer.contains("near the station"));
    assert!(ma.model_answer_explanation.contains("1文目:"));

    let missing = model_answer(&s, &ModelAnswerRequest { question_id: "nope".into(), prompt_text: None }).await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));

    let no_reference = model_answer(&s, &ModelAnswerRequest { question_id: "nope".into(), prompt_text: Some("Write.".into()) }).await;
    assert!(matches!(no_reference, Err(ServiceError::Upstream(_))));
  }

  #[test]
  fn inspect_reports_shared_rules() {
    let out = inspect("I think it's great！ Really.");
    assert_eq!(out.canonical, "I think it's great! Really.");
    assert_eq!(out.word_count, 5);
    assert!(out.english_dominant);
    assert_eq!(out.sentences, vec!["I think it's great!", "Really."]);
    assert_eq!(out.rule, WORD_RULE);
  }
}
