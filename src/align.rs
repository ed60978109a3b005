//! Binding of a grader's flat, ordered correction list to what the learner wrote.
//!
//! The grader's emission order is the alignment key in multi-sentence mode:
//! the i-th non-OVERALL record belongs to slot i, whatever its `sentenceNo`
//! says. The `level` tag is trusted as-is; a disagreement between an OK tag
//! and the comparison normal form is only logged.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compare::same_sentence;
use crate::domain::{CorrectionPoint, Level, SentenceSlot};
use crate::error::AlignmentError;

#[derive(Clone, Copy, Debug)]
pub enum AlignMode<'a> {
  /// One free-form paragraph; records are numbered in order.
  Single,
  /// One slot per source sentence.
  Multi(&'a [SentenceSlot]),
}

/// How the overall (content-fit) record judges the answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
  Fits,
  PartiallyFits,
  DoesNotFit,
  Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallFeedback {
  pub verdict: Verdict,
  pub text: String,
  pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Display {
  /// OK: only the accepted sentence.
  Accepted { text: String },
  /// ERROR: learner text → corrected text.
  Corrected { original: String, corrected: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedItem {
  /// 1-based number shown to the learner.
  pub number: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slot: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source_text: Option<String>,
  pub level: Level,
  pub display: Display,
  pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedSlot {
  pub index: usize,
  pub source_text: String,
  pub draft_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedResult {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub overall: Option<OverallFeedback>,
  pub items: Vec<AlignedItem>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub unresolved: Vec<UnresolvedSlot>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<AlignmentError>,
}

pub fn align(points: &[CorrectionPoint], mode: AlignMode<'_>) -> AlignedResult {
  let mut result = AlignedResult::default();
  let mut records: Vec<&CorrectionPoint> = Vec::with_capacity(points.len());

  for p in points {
    if p.level == Level::Overall {
      if result.overall.is_none() {
        result.overall = Some(overall_feedback(p));
      } else {
        debug!(target: "grading", "Ignoring additional OVERALL record");
      }
    } else {
      records.push(p);
    }
  }

  match mode {
    AlignMode::Single => {
      result.items = records
        .iter()
        .enumerate()
        .map(|(i, p)| bind(i + 1, None, p, p.learner_text()))
        .collect();
    }
    AlignMode::Multi(slots) => {
      result.items = slots
        .iter()
        .zip(records.iter())
        .map(|(slot, p)| bind(slot.index + 1, Some(slot), p, &slot.draft_text))
        .collect();

      if records.len() < slots.len() {
        warn!(target: "grading", expected = slots.len(), received = records.len(), "Grader returned too few sentence records");
        result.unresolved = slots[records.len()..]
          .iter()
          .map(|s| UnresolvedSlot { index: s.index, source_text: s.source_text.clone(), draft_text: s.draft_text.clone() })
          .collect();
        result.error = Some(AlignmentError::MissingRecords { expected: slots.len(), received: records.len() });
      } else if records.len() > slots.len() {
        warn!(target: "grading", expected = slots.len(), received = records.len(), "Dropping surplus sentence records");
      }
    }
  }
  result
}

fn bind(number: usize, slot: Option<&SentenceSlot>, p: &CorrectionPoint, learner: &str) -> AlignedItem {
  let display = match p.level {
    Level::Error => {
      let original = if p.learner_text().trim().is_empty() { learner } else { p.learner_text() };
      Display::Corrected { original: original.to_string(), corrected: p.after.clone() }
    }
    _ => {
      let text = if p.after.trim().is_empty() { p.before.clone() } else { p.after.clone() };
      if !learner.trim().is_empty() && !same_sentence(&text, learner) {
        warn!(target: "grading", number, "OK record does not match the learner's sentence; keeping grader verdict");
      }
      Display::Accepted { text }
    }
  };

  AlignedItem {
    number,
    slot: slot.map(|s| s.index),
    source_text: slot.map(|s| s.source_text.clone()).or_else(|| p.source_sentence_text.clone()),
    level: p.level,
    display,
    reason: clean_item_reason(&p.reason),
  }
}

fn overall_feedback(p: &CorrectionPoint) -> OverallFeedback {
  OverallFeedback {
    verdict: classify_verdict(&p.after),
    text: p.after.clone(),
    reason: clean_overall_reason(&p.reason),
  }
}

pub fn classify_verdict(text: &str) -> Verdict {
  let lower = text.to_lowercase();
  if text.contains("合っていません") || lower.contains("does not fit") {
    Verdict::DoesNotFit
  } else if text.contains("部分的に") || lower.contains("partially") {
    Verdict::PartiallyFits
  } else if text.contains("合っています") || lower.contains("fits") {
    Verdict::Fits
  } else {
    Verdict::Unknown
  }
}

fn overall_heading() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^全体評価\n?").expect("static regex"))
}

fn echoed_sentence_line() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^\d+文目:\s+[A-Z]").expect("static regex"))
}

fn clean_overall_reason(reason: &str) -> String {
  overall_heading().replace(reason, "").into_owned()
}

/// Drop `N文目: <English sentence>` lines; the sentence is already displayed.
fn clean_item_reason(reason: &str) -> String {
  reason
    .lines()
    .filter(|line| !echoed_sentence_line().is_match(line))
    .collect::<Vec<_>>()
    .join("\n")
}

/// One line of a model-answer explanation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ExplanationLine {
  /// An English model sentence (`N文目:` prefix removed).
  Sentence(String),
  Plain(String),
}

fn explanation_heading() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^文法・表現のポイント解説\s*").expect("static regex"))
}

fn numbered_sentence() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^\d+文目:\s*(.+)$").expect("static regex"))
}

pub fn explanation_lines(explanation: &str) -> Vec<ExplanationLine> {
  let body = explanation_heading().replace(explanation, "");
  body
    .lines()
    .map(|line| match numbered_sentence().captures(line) {
      Some(c) => ExplanationLine::Sentence(c[1].trim().to_string()),
      None => ExplanationLine::Plain(line.to_string()),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slot(i: usize, src: &str, draft: &str) -> SentenceSlot {
    SentenceSlot { index: i, source_text: src.into(), draft_text: draft.into(), word_count: 0, filled: !draft.is_empty() }
  }

  fn point(level: Level, before: &str, after: &str) -> CorrectionPoint {
    CorrectionPoint::new(level, before, after, "reason")
  }

  #[test]
  fn multi_binds_by_emission_order_not_sentence_no() {
    let slots = vec![slot(0, "一。", "One."), slot(1, "二。", "Two."), slot(2, "三。", "Three.")];
    let mut p1 = point(Level::Ok, "One.", "One.");
    p1.sentence_no = Some(3);
    let mut p2 = point(Level::Error, "Two.", "Two!");
    p2.sentence_no = Some(1);
    let mut p3 = point(Level::Ok, "Three.", "Three.");
    p3.sentence_no = Some(2);
    let points = vec![point(Level::Overall, "", "問題文の趣旨に合っています"), p1, p2, p3];

    let r = align(&points, AlignMode::Multi(&slots));
    assert_eq!(r.overall.as_ref().map(|o| o.verdict), Some(Verdict::Fits));
    assert_eq!(r.items.len(), 3);
    assert!(r.error.is_none());
    for (i, item) in r.items.iter().enumerate() {
      assert_eq!(item.slot, Some(i));
      assert_eq!(item.number, i + 1);
    }
    assert_eq!(r.items[0].display, Display::Accepted { text: "One.".into() });
    assert_eq!(r.items[1].display, Display::Corrected { original: "Two.".into(), corrected: "Two!".into() });
    assert_eq!(r.items[1].source_text.as_deref(), Some("二。"));
  }

  #[test]
  fn multi_flags_missing_records() {
    let slots = vec![slot(0, "一。", "One."), slot(1, "二。", "Two."), slot(2, "三。", "")];
    let points = vec![point(Level::Ok, "One.", "One.")];
    let r = align(&points, AlignMode::Multi(&slots));
    assert_eq!(r.items.len(), 1);
    assert_eq!(r.unresolved.iter().map(|u| u.index).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(r.error, Some(AlignmentError::MissingRecords { expected: 3, received: 1 }));
  }

  #[test]
  fn multi_drops_surplus_records() {
    let slots = vec![slot(0, "一。", "One.")];
    let points = vec![point(Level::Ok, "One.", "One."), point(Level::Error, "x", "y")];
    let r = align(&points, AlignMode::Multi(&slots));
    assert_eq!(r.items.len(), 1);
    assert!(r.error.is_none());
  }

  #[test]
  fn single_numbers_records_and_keeps_first_overall() {
    let points = vec![
      point(Level::Error, "i go school", "I go to school."),
      point(Level::Overall, "", "部分的に合っています"),
      point(Level::Ok, "It was fun.", "It was fun."),
      point(Level::Overall, "", "問題文の趣旨に合っていません"),
    ];
    let r = align(&points, AlignMode::Single);
    assert_eq!(r.overall.map(|o| o.verdict), Some(Verdict::PartiallyFits));
    assert_eq!(r.items.iter().map(|i| i.number).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(r.items[0].slot, None);
  }

  #[test]
  fn error_display_prefers_verbatim_learner_text() {
    let mut p = point(Level::Error, "I go to school.", "I went to school.");
    p.original_before = Some("i go to school".into());
    let r = align(&[p], AlignMode::Single);
    assert_eq!(
      r.items[0].display,
      Display::Corrected { original: "i go to school".into(), corrected: "I went to school.".into() }
    );
  }

  #[test]
  fn ok_tag_is_trusted_even_when_text_differs() {
    let slots = vec![slot(0, "一。", "one")];
    let r = align(&[point(Level::Ok, "One.", "Uno.")], AlignMode::Multi(&slots));
    assert_eq!(r.items[0].level, Level::Ok);
    assert_eq!(r.items[0].display, Display::Accepted { text: "Uno.".into() });
  }

  #[test]
  fn reasons_are_cleaned() {
    let mut overall = point(Level::Overall, "", "Fits the prompt");
    overall.reason = "全体評価\n内容は十分です。".into();
    let mut item = point(Level::Ok, "I ran.", "I ran.");
    item.reason = "1文目: I ran.\n（私は走った。）\nrun は不規則動詞です。".into();
    let r = align(&[overall, item], AlignMode::Single);
    assert_eq!(r.overall.unwrap().reason, "内容は十分です。");
    assert_eq!(r.items[0].reason, "（私は走った。）\nrun は不規則動詞です。");
  }

  #[test]
  fn verdict_classification() {
    assert_eq!(classify_verdict("✅ 問題文の趣旨に合っています"), Verdict::Fits);
    assert_eq!(classify_verdict("❌ 問題文の趣旨に合っていません"), Verdict::DoesNotFit);
    assert_eq!(classify_verdict("⚠️ 部分的に合っています"), Verdict::PartiallyFits);
    assert_eq!(classify_verdict("Partially fits the source"), Verdict::PartiallyFits);
    assert_eq!(classify_verdict("???"), Verdict::Unknown);
  }

  #[test]
  fn explanation_lines_strip_heading_and_flag_sentences() {
    let lines = explanation_lines("文法・表現のポイント解説\n1文目: I went home.\n（私は家に帰った。）");
    assert_eq!(
      lines,
      vec![
        ExplanationLine::Sentence("I went home.".into()),
        ExplanationLine::Plain("（私は家に帰った。）".into()),
      ]
    );
  }
}
