//! Domain models: questions, hints, correction records and grading outcomes.
//!
//! Wire names are camelCase; the grader and the interactive client exchange
//! these structs verbatim.

use serde::{Deserialize, Serialize};

/// Where did we get the question from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrigin {
  Generated,  // produced by the LLM for this request
  LocalBank,  // from the TOML question bank
  Seed,       // built-in seeds (last resort)
}

/// Source material the learner works from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum SourceMaterial {
  /// Japanese paragraphs; split into sentences with `。`.
  Paragraphs(Vec<String>),
  /// Japanese sentences, already one per entry.
  Sentences(Vec<String>),
  /// Free-form English writing prompt (no per-sentence material).
  Prompt(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
  pub en: String,
  pub ja: String,
  #[serde(default, alias = "pos")]
  pub part_of_speech: String,
  #[serde(default, alias = "usage", skip_serializing_if = "Option::is_none")]
  pub usage_example: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetWords {
  pub min: usize,
  pub max: usize,
}

impl Default for TargetWords {
  fn default() -> Self {
    Self { min: 100, max: 120 }
  }
}

impl TargetWords {
  pub fn is_valid(&self) -> bool {
    self.min <= self.max
  }
}

/// A question as issued to a session. Immutable once issued.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: String,
  pub theme: String,
  pub difficulty: String,
  pub origin: QuestionOrigin,
  pub source: SourceMaterial,
  pub hints: Vec<Hint>,
  pub target_word_range: TargetWords,
  /// Reference translation; used by the local grader and model-answer fallback.
  /// Never sent to the learner before they ask for it.
  #[serde(default, skip_serializing)]
  pub model_answer: Option<String>,
  #[serde(default, skip_serializing)]
  pub model_answer_explanation: Option<String>,
}

impl Question {
  pub fn source_paragraphs(&self) -> Option<&[String]> {
    match &self.source {
      SourceMaterial::Paragraphs(p) => Some(p),
      _ => None,
    }
  }

  pub fn source_sentences(&self) -> Option<&[String]> {
    match &self.source {
      SourceMaterial::Sentences(s) => Some(s),
      _ => None,
    }
  }

  pub fn prompt_text(&self) -> Option<&str> {
    match &self.source {
      SourceMaterial::Prompt(p) => Some(p),
      _ => None,
    }
  }

  /// Japanese source as one block of text (paragraphs separated by blank lines).
  pub fn source_text(&self) -> String {
    match &self.source {
      SourceMaterial::Paragraphs(p) => p.join("\n\n"),
      SourceMaterial::Sentences(s) => s.join("\n"),
      SourceMaterial::Prompt(p) => p.clone(),
    }
  }
}

/// One source sentence's worth of learner input in multi-sentence mode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SentenceSlot {
  pub index: usize,
  pub source_text: String,
  pub draft_text: String,
  pub word_count: usize,
  pub filled: bool,
}

impl SentenceSlot {
  pub fn empty(index: usize, source_text: impl Into<String>) -> Self {
    Self { index, source_text: source_text.into(), draft_text: String::new(), word_count: 0, filled: false }
  }
}

/// Verdict tag supplied by the grader.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
  Ok,
  Error,
  Overall,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionPoint {
  pub level: Level,
  pub before: String,
  pub after: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub original_before: Option<String>,
  #[serde(default)]
  pub reason: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sentence_no: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_sentence_text: Option<String>,
}

impl CorrectionPoint {
  pub fn new(level: Level, before: impl Into<String>, after: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      level,
      before: before.into(),
      after: after.into(),
      original_before: None,
      reason: reason.into(),
      sentence_no: None,
      source_sentence_text: None,
    }
  }

  /// The learner's own wording, preferring the verbatim (pre-normalization) text.
  pub fn learner_text(&self) -> &str {
    self.original_before.as_deref().unwrap_or(&self.before)
  }
}

/// Deterministic checks the grader runs next to the LLM verdict.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintChecks {
  pub word_count: usize,
  pub within_word_range: bool,
  pub sentence_count: usize,
  #[serde(default)]
  pub notes: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
  pub points: Vec<CorrectionPoint>,
  pub constraint_checks: ConstraintChecks,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_answer: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_answer_explanation: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelAnswer {
  pub model_answer: String,
  pub model_answer_explanation: String,
}
