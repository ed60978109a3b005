//! Grader-side shaping of correction records.
//!
//! LLM output is loose: levels come as emoji, Japanese labels or English words,
//! `after` is sometimes rewritten on sentences that were fine, and multi-sentence
//! answers occasionally skip records. Everything here turns that into
//! `CorrectionPoint`s the aligner can bind by emission order.
//! The local grader at the bottom is used when no LLM is configured or it failed.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::compare::same_sentence;
use crate::domain::{ConstraintChecks, CorrectionPoint, Level, Question, TargetWords};
use crate::split::{split_english, split_english_by_count};
use crate::text::{canonicalize, count_words};

pub const VERDICT_FITS: &str = "問題文の趣旨に合っています";
pub const VERDICT_PARTIAL: &str = "部分的に合っています";

/// One point as the LLM emits it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawPoint {
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default)]
  pub before: String,
  #[serde(default)]
  pub after: String,
  #[serde(default)]
  pub reason: String,
}

/// The grading JSON object as the LLM emits it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawGrade {
  #[serde(default)]
  pub points: Vec<RawPoint>,
  #[serde(default)]
  pub corrected: Option<String>,
  #[serde(default)]
  pub model_answer: Option<String>,
  #[serde(default)]
  pub model_answer_explanation: Option<String>,
}

pub fn normalize_level(raw: Option<&str>) -> Level {
  let Some(raw) = raw.map(str::trim) else { return Level::Ok };
  let lower = raw.to_lowercase();
  if raw.contains("内容評価") || lower == "overall" {
    Level::Overall
  } else if raw.contains('❌') || lower.contains("error") {
    Level::Error
  } else {
    Level::Ok
  }
}

fn to_point(raw: RawPoint) -> CorrectionPoint {
  let level = normalize_level(raw.level.as_deref());
  let before = raw.before.trim().to_string();
  // An accepted sentence keeps the learner's wording.
  let after = match level {
    Level::Ok => before.clone(),
    _ => raw.after.trim().to_string(),
  };
  CorrectionPoint::new(level, before, after, raw.reason.trim())
}

/// Single-paragraph answers: map levels and drop sentence records without a `before`.
pub fn normalize_single(raw: Vec<RawPoint>) -> Vec<CorrectionPoint> {
  let total = raw.len();
  let points: Vec<CorrectionPoint> = raw
    .into_iter()
    .map(to_point)
    .filter(|p| p.level == Level::Overall || !p.before.is_empty())
    .collect();
  if points.len() != total {
    debug!(target: "grading", dropped = total - points.len(), "Dropped records without learner text");
  }
  points
}

/// Multi-sentence answers. Sentence records are numbered in emission order and
/// tied to the learner's verbatim sentence; records missing at the end are
/// rebuilt from the grader's `corrected` text when it is available.
pub fn normalize_multi(
  raw: Vec<RawPoint>,
  user_sentences: &[String],
  source_sentences: &[String],
  corrected: Option<&str>,
) -> Vec<CorrectionPoint> {
  let (overall, mut sentences): (Vec<_>, Vec<_>) = raw.into_iter().map(to_point).partition(|p| p.level == Level::Overall);

  let expected = user_sentences.len();
  if sentences.len() < expected {
    match corrected.filter(|c| !c.trim().is_empty()) {
      Some(corrected) => {
        let pieces = split_english_by_count(corrected, expected);
        info!(target: "grading", expected, received = sentences.len(), "Filling missing sentence records from corrected text");
        for i in sentences.len()..expected {
          let learner = user_sentences[i].trim();
          let after = pieces.get(i).cloned().unwrap_or_default();
          let level = if !learner.is_empty() && same_sentence(learner, &after) { Level::Ok } else { Level::Error };
          let after = if level == Level::Ok { learner.to_string() } else { after };
          sentences.push(CorrectionPoint::new(level, learner, after, ""));
        }
      }
      None => warn!(target: "grading", expected, received = sentences.len(), "Grader returned too few sentence records"),
    }
  }

  for (i, p) in sentences.iter_mut().enumerate() {
    p.sentence_no = Some(i + 1);
    p.source_sentence_text = source_sentences.get(i).cloned();
    if let Some(learner) = user_sentences.get(i) {
      if p.before.is_empty() {
        p.before = learner.trim().to_string();
        if p.level == Level::Ok {
          p.after = p.before.clone();
        }
      }
      p.original_before = Some(learner.clone());
    }
  }

  overall.into_iter().take(1).chain(sentences).collect()
}

/// How many sentence records the grader is asked for.
pub fn required_points(source_sentence_count: usize, answer: &str) -> usize {
  if source_sentence_count > 0 {
    return source_sentence_count;
  }
  match split_english(&canonicalize(answer)).len() {
    0 => 3,
    n => n,
  }
}

/// Deterministic checks reported next to the grader's verdict.
pub fn constraint_checks(answer: &str, target: TargetWords, client_count: Option<usize>) -> ConstraintChecks {
  let canonical = canonicalize(answer);
  let word_count = count_words(&canonical);
  if let Some(client) = client_count.filter(|c| *c != word_count) {
    warn!(target: "grading", client, server = word_count, "Client word count differs; reporting server count");
  }
  let within_word_range = target.min <= word_count && word_count <= target.max;
  let mut notes = Vec::new();
  if !within_word_range {
    notes.push(format!("語数が目安（{}〜{}語）の範囲外です（{}語）", target.min, target.max, word_count));
  }
  ConstraintChecks {
    word_count,
    within_word_range,
    sentence_count: split_english(&canonical).len(),
    notes,
  }
}

//
// Local grader
//

fn overall_point(all_match: bool, has_reference: bool) -> CorrectionPoint {
  let (after, reason) = match (has_reference, all_match) {
    (false, _) => ("判定できません", "全体評価\n参照訳がないため、自動判定は行っていません。"),
    (true, true) => (VERDICT_FITS, "全体評価\n模範解答とほぼ同じ英文です。"),
    (true, false) => (VERDICT_PARTIAL, "全体評価\n簡易採点です。模範解答と異なる文を確認してください。"),
  };
  CorrectionPoint::new(Level::Overall, "", after, reason)
}

fn compare_one(learner: &str, reference: Option<&str>) -> CorrectionPoint {
  match reference {
    _ if learner.trim().is_empty() => {
      CorrectionPoint::new(Level::Error, "", reference.unwrap_or_default(), "未回答です。")
    }
    Some(r) if same_sentence(learner, r) => CorrectionPoint::new(Level::Ok, learner, learner, "模範解答と一致しています。"),
    Some(r) => CorrectionPoint::new(Level::Error, learner, r, "模範解答の表現と異なります。"),
    None => CorrectionPoint::new(Level::Ok, learner, learner, ""),
  }
}

/// Compare each learner sentence with the matching sentence of the reference answer.
pub fn local_grade_single(question: Option<&Question>, answer: &str) -> Vec<CorrectionPoint> {
  let learner = split_english(&canonicalize(answer));
  let reference = question.and_then(|q| q.model_answer.as_deref()).map(|r| split_english_by_count(r, learner.len()));

  let records: Vec<CorrectionPoint> = learner
    .iter()
    .enumerate()
    .map(|(i, s)| compare_one(s, reference.as_ref().and_then(|r| r.get(i)).map(String::as_str)))
    .collect();
  let all_match = records.iter().all(|p| p.level == Level::Ok);
  info!(target: "grading", sentences = records.len(), has_reference = reference.is_some(), "Local grading (single)");

  std::iter::once(overall_point(all_match, reference.is_some())).chain(records).collect()
}

pub fn local_grade_multi(question: Option<&Question>, user_sentences: &[String], source_sentences: &[String]) -> Vec<CorrectionPoint> {
  let reference = question
    .and_then(|q| q.model_answer.as_deref())
    .map(|r| split_english_by_count(r, user_sentences.len()));

  let mut records = Vec::with_capacity(user_sentences.len());
  for (i, learner) in user_sentences.iter().enumerate() {
    let mut p = compare_one(&canonicalize(learner), reference.as_ref().and_then(|r| r.get(i)).map(String::as_str));
    p.sentence_no = Some(i + 1);
    p.source_sentence_text = source_sentences.get(i).cloned();
    p.original_before = Some(learner.clone());
    records.push(p);
  }
  let all_match = records.iter().all(|p| p.level == Level::Ok);
  info!(target: "grading", sentences = records.len(), has_reference = reference.is_some(), "Local grading (multi)");

  std::iter::once(overall_point(all_match, reference.is_some())).chain(records).collect()
}
