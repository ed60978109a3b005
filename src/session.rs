//! Session state machine: question issuance, drafting, submission, correction
//! and model-answer viewing for one learner connection.
//!
//! The machine is synchronous and owns its `Session`. Transitions that need a
//! collaborator return a `Command` carrying a `Ticket`; the caller runs the
//! call and hands the result back together with that ticket. A result whose
//! ticket is no longer the outstanding one (the learner asked for a new
//! question meanwhile, or a newer call replaced it) is rejected as stale and
//! leaves the session untouched.
//!
//! ```text
//! NoQuestion ─┐
//!             ├─ request_question ─> QuestionLoading ─> QuestionReady ─ submit ─> Submitting ─> CorrectionReady
//! (any stage) ┘                                          │                                      │
//!                                                        └──── request_model_answer ────────────┴─> ModelAnswerLoading ─> ModelAnswerReady
//! ```

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::align::{align, AlignMode, AlignedResult};
use crate::config::Limits;
use crate::domain::{ConstraintChecks, GradeOutcome, ModelAnswer, Question, SentenceSlot, SourceMaterial};
use crate::error::{ProviderError, SessionError};
use crate::protocol::{GradeRequest, ModelAnswerRequest, MultiGradeRequest, QuestionRequest, SingleGradeRequest};
use crate::split::split_japanese;
use crate::text::{assess, canonicalize, count_words, DraftStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  NoQuestion,
  QuestionLoading,
  QuestionReady,
  Submitting,
  CorrectionReady,
  ModelAnswerLoading,
  ModelAnswerReady,
}

/// Fixed per question when it becomes ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
  /// One free-form paragraph.
  Single,
  /// One draft per source sentence.
  Multi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionDraft {
  Paragraph { text: String, word_count: usize },
  Sentences(Vec<SentenceSlot>),
}

impl SubmissionDraft {
  fn mode(&self) -> InputMode {
    match self {
      SubmissionDraft::Paragraph { .. } => InputMode::Single,
      SubmissionDraft::Sentences(_) => InputMode::Multi,
    }
  }
}

/// A graded submission, ready to render.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
  pub result: AlignedResult,
  pub constraint_checks: ConstraintChecks,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_answer: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_answer_explanation: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Session {
  pub question: Option<Question>,
  pub draft: Option<SubmissionDraft>,
  /// Some iff the current question is in multi-sentence mode.
  pub sentence_count: Option<usize>,
  pub correction: Option<Correction>,
  pub model_answer: Option<ModelAnswer>,
}

/// Identity of one outstanding collaborator call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
  /// Bumped by every `request_question`.
  pub epoch: u64,
  pub seq: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
  FetchQuestion { ticket: Ticket, request: QuestionRequest },
  Grade { ticket: Ticket, request: GradeRequest },
  FetchModelAnswer { ticket: Ticket, request: ModelAnswerRequest },
}

/// What changed after a collaborator response was applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
  QuestionReady { question: Question, mode: InputMode, slots: Vec<SentenceSlot> },
  Corrected(Correction),
  ModelAnswerReady(ModelAnswer),
  /// The call failed; the session went back to `stage`.
  Failed { error: ProviderError, stage: Stage },
}

/// Live feedback for one keystroke.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftFeedback {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slot: Option<usize>,
  /// Canonicalized text; the client swaps it in when it differs.
  pub text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slot_word_count: Option<usize>,
  /// Status of the whole draft (all slots together in multi mode).
  pub status: DraftStatus,
  pub submittable: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct Pending {
  question: Option<Ticket>,
  grade: Option<Ticket>,
  model_answer: Option<Ticket>,
}

pub struct SessionMachine {
  session: Session,
  stage: Stage,
  /// Where a failed model-answer call returns to.
  resume: Stage,
  pending: Pending,
  epoch: u64,
  seq: u64,
  min_words: usize,
  max_words: usize,
  default_difficulty: String,
}

impl SessionMachine {
  pub fn new(limits: &Limits) -> Self {
    Self {
      session: Session::default(),
      stage: Stage::NoQuestion,
      resume: Stage::NoQuestion,
      pending: Pending::default(),
      epoch: 0,
      seq: 0,
      min_words: limits.min_words,
      max_words: limits.max_words,
      default_difficulty: limits.default_difficulty.clone(),
    }
  }

  pub fn stage(&self) -> Stage { self.stage }

  pub fn session(&self) -> &Session { &self.session }

  pub fn mode(&self) -> Option<InputMode> {
    self.session.draft.as_ref().map(SubmissionDraft::mode)
  }

  pub fn slots(&self) -> &[SentenceSlot] {
    match &self.session.draft {
      Some(SubmissionDraft::Sentences(slots)) => slots,
      _ => &[],
    }
  }

  fn issue(&mut self) -> Ticket {
    self.seq += 1;
    Ticket { epoch: self.epoch, seq: self.seq }
  }

  fn invalid(&self, action: &'static str) -> SessionError {
    SessionError::InvalidTransition { action, stage: self.stage }
  }

  /// Always allowed. Drops the current question, draft and any outstanding
  /// grading or model-answer call.
  #[instrument(level = "info", target = "session", skip(self, excluded_themes), fields(excluded = excluded_themes.len()))]
  pub fn request_question(&mut self, difficulty: Option<String>, excluded_themes: Vec<String>) -> Command {
    self.epoch += 1;
    self.session = Session::default();
    self.pending = Pending::default();
    let ticket = self.issue();
    self.pending.question = Some(ticket);
    self.stage = Stage::QuestionLoading;
    info!(target: "session", epoch = ticket.epoch, "Requesting new question");

    let request = QuestionRequest {
      difficulty: Some(difficulty.unwrap_or_else(|| self.default_difficulty.clone())),
      excluded_themes,
    };
    Command::FetchQuestion { ticket, request }
  }

  pub fn on_question(&mut self, ticket: Ticket, result: Result<Question, ProviderError>) -> Result<Update, SessionError> {
    if self.pending.question != Some(ticket) {
      debug!(target: "session", ?ticket, "Discarding stale question response");
      return Err(SessionError::StaleResponse);
    }
    self.pending.question = None;

    let question = match result {
      Ok(q) => q,
      Err(error) => {
        warn!(target: "session", error = %error, "Question fetch failed");
        self.stage = Stage::NoQuestion;
        return Ok(Update::Failed { error, stage: Stage::NoQuestion });
      }
    };

    let slots: Vec<SentenceSlot> = sentence_sources(&question.source)
      .into_iter()
      .enumerate()
      .map(|(i, src)| SentenceSlot::empty(i, src))
      .collect();

    let (mode, draft) = if slots.is_empty() {
      (InputMode::Single, SubmissionDraft::Paragraph { text: String::new(), word_count: 0 })
    } else {
      (InputMode::Multi, SubmissionDraft::Sentences(slots.clone()))
    };
    self.session.sentence_count = (mode == InputMode::Multi).then_some(slots.len());
    self.session.draft = Some(draft);
    self.session.question = Some(question.clone());
    self.stage = Stage::QuestionReady;
    info!(target: "session", id = %question.id, ?mode, sentences = slots.len(), "Question ready");

    Ok(Update::QuestionReady { question, mode, slots })
  }

  /// Replace the paragraph draft (single mode).
  pub fn update_draft(&mut self, text: &str) -> Result<DraftFeedback, SessionError> {
    if self.stage != Stage::QuestionReady {
      return Err(self.invalid("update_draft"));
    }
    let (min, max) = (self.min_words, self.max_words);
    match self.session.draft.as_mut() {
      Some(SubmissionDraft::Paragraph { text: draft, word_count }) => {
        let canonical = canonicalize(text);
        let status = assess(&canonical, min, max);
        *word_count = status.word_count;
        *draft = canonical.clone();
        let submittable = status.submittable();
        Ok(DraftFeedback { slot: None, text: canonical, slot_word_count: None, status, submittable })
      }
      _ => Err(SessionError::WrongInputMode { expected: "per-sentence" }),
    }
  }

  /// Replace the draft of one sentence slot (multi mode).
  pub fn update_slot(&mut self, index: usize, text: &str) -> Result<DraftFeedback, SessionError> {
    if self.stage != Stage::QuestionReady {
      return Err(self.invalid("update_slot"));
    }
    let (min, max) = (self.min_words, self.max_words);
    let slots = match self.session.draft.as_mut() {
      Some(SubmissionDraft::Sentences(slots)) => slots,
      _ => return Err(SessionError::WrongInputMode { expected: "paragraph" }),
    };
    let count = slots.len();
    let slot = slots.get_mut(index).ok_or(SessionError::NoSuchSlot { index, count })?;

    let canonical = canonicalize(text);
    slot.word_count = count_words(&canonical);
    slot.filled = !canonical.trim().is_empty();
    slot.draft_text = canonical.clone();
    let slot_word_count = slot.word_count;

    let status = assess(&joined_drafts(slots), min, max);
    let submittable = status.submittable();
    Ok(DraftFeedback { slot: Some(index), text: canonical, slot_word_count: Some(slot_word_count), status, submittable })
  }

  /// Freeze the draft and ask for grading. `Ok(None)` when a grading call is
  /// already outstanding.
  #[instrument(level = "info", target = "session", skip(self), fields(stage = ?self.stage))]
  pub fn submit(&mut self) -> Result<Option<Command>, SessionError> {
    match self.stage {
      Stage::Submitting => {
        debug!(target: "session", "Submit ignored: grading already in flight");
        return Ok(None);
      }
      Stage::QuestionReady => {}
      _ => return Err(self.invalid("submit")),
    }
    let (question, draft) = match (&self.session.question, &self.session.draft) {
      (Some(q), Some(d)) => (q, d),
      _ => return Err(self.invalid("submit")),
    };

    let request = match draft {
      SubmissionDraft::Paragraph { text, .. } => {
        let status = assess(text, self.min_words, self.max_words);
        if let Some(problem) = status.problem {
          return Err(problem.into());
        }
        GradeRequest::Single(SingleGradeRequest {
          question_id: question.id.clone(),
          source_sentences: question.source_sentences().map(<[String]>::to_vec),
          source_paragraphs: question.source_paragraphs().map(<[String]>::to_vec),
          prompt_text: question.prompt_text().map(str::to_string),
          user_answer: text.clone(),
          target_word_range: question.target_word_range,
          word_count: Some(status.word_count),
        })
      }
      SubmissionDraft::Sentences(slots) => {
        let status = assess(&joined_drafts(slots), self.min_words, self.max_words);
        if let Some(problem) = status.problem {
          return Err(problem.into());
        }
        GradeRequest::Multi(MultiGradeRequest {
          question_id: question.id.clone(),
          user_sentences: slots.iter().map(|s| s.draft_text.clone()).collect(),
          source_sentences: slots.iter().map(|s| s.source_text.clone()).collect(),
          target_word_range: question.target_word_range,
          word_count: Some(status.word_count),
        })
      }
    };

    let ticket = self.issue();
    self.pending.grade = Some(ticket);
    self.stage = Stage::Submitting;
    info!(target: "session", seq = ticket.seq, "Submitted for grading");
    Ok(Some(Command::Grade { ticket, request }))
  }

  pub fn on_graded(&mut self, ticket: Ticket, result: Result<GradeOutcome, ProviderError>) -> Result<Update, SessionError> {
    if self.pending.grade != Some(ticket) {
      debug!(target: "session", ?ticket, "Discarding stale grading response");
      return Err(SessionError::StaleResponse);
    }
    self.pending.grade = None;

    let outcome = match result {
      Ok(o) => o,
      Err(error) => {
        warn!(target: "session", error = %error, "Grading failed; draft kept for retry");
        self.stage = Stage::QuestionReady;
        return Ok(Update::Failed { error, stage: Stage::QuestionReady });
      }
    };

    let mode = match &self.session.draft {
      Some(SubmissionDraft::Sentences(slots)) => AlignMode::Multi(slots),
      _ => AlignMode::Single,
    };
    let result = align(&outcome.points, mode);
    if let Some(e) = &result.error {
      warn!(target: "session", error = %e, "Correction rendered with unresolved sentences");
    }

    let correction = Correction {
      result,
      constraint_checks: outcome.constraint_checks,
      model_answer: outcome.model_answer,
      model_answer_explanation: outcome.model_answer_explanation,
    };
    self.session.correction = Some(correction.clone());
    self.stage = Stage::CorrectionReady;
    info!(target: "session", items = correction.result.items.len(), "Correction ready");
    Ok(Update::Corrected(correction))
  }

  pub fn request_model_answer(&mut self) -> Result<Command, SessionError> {
    if !matches!(self.stage, Stage::QuestionReady | Stage::CorrectionReady) {
      return Err(self.invalid("request_model_answer"));
    }
    let question = self.session.question.as_ref().ok_or_else(|| self.invalid("request_model_answer"))?;
    let request = ModelAnswerRequest {
      question_id: question.id.clone(),
      prompt_text: question.prompt_text().map(str::to_string),
    };

    let ticket = self.issue();
    self.pending.model_answer = Some(ticket);
    self.resume = self.stage;
    self.stage = Stage::ModelAnswerLoading;
    info!(target: "session", from = ?self.resume, "Requesting model answer");
    Ok(Command::FetchModelAnswer { ticket, request })
  }

  pub fn on_model_answer(&mut self, ticket: Ticket, result: Result<ModelAnswer, ProviderError>) -> Result<Update, SessionError> {
    if self.pending.model_answer != Some(ticket) {
      debug!(target: "session", ?ticket, "Discarding stale model answer");
      return Err(SessionError::StaleResponse);
    }
    self.pending.model_answer = None;

    match result {
      Ok(answer) => {
        self.session.model_answer = Some(answer.clone());
        self.stage = Stage::ModelAnswerReady;
        Ok(Update::ModelAnswerReady(answer))
      }
      Err(error) => {
        warn!(target: "session", error = %error, "Model answer failed");
        self.stage = self.resume;
        Ok(Update::Failed { error, stage: self.resume })
      }
    }
  }
}

/// Japanese sentences of the question, one per slot. Free-form prompts have none.
pub fn sentence_sources(source: &SourceMaterial) -> Vec<String> {
  match source {
    SourceMaterial::Paragraphs(paragraphs) => split_japanese(paragraphs),
    // Split each entry on its own so an entry missing its `。` is not merged into the next one.
    SourceMaterial::Sentences(sentences) => sentences.iter().flat_map(|s| split_japanese(&[s])).collect(),
    SourceMaterial::Prompt(_) => Vec::new(),
  }
}

fn joined_drafts(slots: &[SentenceSlot]) -> String {
  slots
    .iter()
    .filter(|s| s.filled)
    .map(|s| s.draft_text.trim())
    .collect::<Vec<_>>()
    .join(" ")
}
