//! Text canonicalization, word counting and the English-dominance gate.
//!
//! These rules are shared verbatim by the session (live draft feedback) and the
//! grader endpoints (constraint checks). They are versioned: changing what a
//! "word" is changes both sides of the wire at once, so bump `WORD_RULE`.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ValidationError;

/// Version tag of the tokenization rule, reported by `/api/v1/text/inspect`.
pub const WORD_RULE: &str = "word-rule.v1";

/// Full-width (and typographic) punctuation mapped to its ASCII form.
const FULL_TO_HALF: &[(char, char)] = &[
  ('\u{3000}', ' '), // ideographic space
  ('ー', '-'),
  ('－', '-'),
  ('—', '-'),
  ('–', '-'),
  ('！', '!'),
  ('？', '?'),
  ('．', '.'),
  ('。', '.'),
  ('，', ','),
  ('、', ','),
  ('：', ':'),
  ('；', ';'),
  ('“', '"'),
  ('”', '"'),
  ('＂', '"'),
  ('‘', '\''),
  ('’', '\''),
  ('＇', '\''),
  ('（', '('),
  ('）', ')'),
  ('［', '['),
  ('］', ']'),
];

fn half_width(ch: char) -> Option<char> {
  FULL_TO_HALF.iter().find(|(full, _)| *full == ch).map(|(_, half)| *half)
}

/// Map full-width punctuation to half-width ASCII. Everything else is kept.
pub fn canonicalize(text: &str) -> String {
  text.chars().map(|ch| half_width(ch).unwrap_or(ch)).collect()
}

fn word_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\b[\w'-]+\b").expect("static word regex"))
}

/// Count English words: tokens of word characters, apostrophes and hyphens
/// that contain at least one Latin letter. Numerals alone are not words.
pub fn count_words(text: &str) -> usize {
  if text.trim().is_empty() {
    return 0;
  }
  let canonical = canonicalize(text);
  word_regex()
    .find_iter(&canonical)
    .filter(|m| m.as_str().chars().any(|c| c.is_ascii_alphabetic()))
    .count()
}

/// True iff at least half of the non-whitespace characters are Latin letters.
pub fn is_english_dominant(text: &str) -> bool {
  let mut letters = 0usize;
  let mut total = 0usize;
  for ch in text.chars() {
    if ch.is_whitespace() { continue; }
    total += 1;
    if ch.is_ascii_alphabetic() { letters += 1; }
  }
  if total == 0 {
    return false;
  }
  letters * 2 >= total
}

/// Live status of a draft, as shown next to the input box.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftStatus {
  pub word_count: usize,
  pub english_dominant: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub problem: Option<ValidationError>,
}

impl DraftStatus {
  pub fn submittable(&self) -> bool {
    self.problem.is_none()
  }
}

/// Assess a draft against the submission bounds `[min_words, max_words]`.
pub fn assess(text: &str, min_words: usize, max_words: usize) -> DraftStatus {
  let word_count = count_words(text);
  let english_dominant = is_english_dominant(text);
  let problem = if text.trim().is_empty() {
    Some(ValidationError::Empty)
  } else if !english_dominant {
    Some(ValidationError::NotEnglish)
  } else if word_count < min_words {
    Some(ValidationError::TooFewWords { count: word_count, min: min_words })
  } else if word_count > max_words {
    Some(ValidationError::TooManyWords { count: word_count, max: max_words })
  } else {
    None
  };
  DraftStatus { word_count, english_dominant, problem }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn canonicalize_maps_full_width_punctuation() {
    assert_eq!(canonicalize("Hello！　How are you？"), "Hello! How are you?");
    assert_eq!(canonicalize("（well—being）"), "(well-being)");
    assert_eq!(canonicalize("“it’s”"), "\"it's\"");
    assert_eq!(canonicalize("a，b、c：d；e．"), "a,b,c:d;e.");
  }

  #[test]
  fn canonicalize_keeps_japanese_letters() {
    assert_eq!(canonicalize("今日は晴れです"), "今日は晴れです");
    assert_eq!(canonicalize("今日は晴れです。"), "今日は晴れです.");
  }

  #[test]
  fn word_count_examples() {
    assert_eq!(count_words("I think it's great."), 4);
    assert_eq!(count_words(""), 0);
    assert_eq!(count_words("   \n\t"), 0);
    assert_eq!(count_words("42 times"), 1);
    assert_eq!(count_words("well-being matters"), 2);
    assert_eq!(count_words("It’s fine ... really !"), 3);
  }

  #[test]
  fn word_count_ignores_japanese_and_numbers() {
    assert_eq!(count_words("今日は sunny です 2025"), 1);
  }

  #[test]
  fn english_gate_examples() {
    assert!(!is_english_dominant("こんにちは"));
    assert!(is_english_dominant("Hello world"));
    assert!(!is_english_dominant(""));
    assert!(!is_english_dominant("   "));
    // 4 letters out of 8 non-space characters: exactly half passes.
    assert!(is_english_dominant("abcd1234"));
    assert!(!is_english_dominant("abc12345"));
  }

  #[test]
  fn assess_reports_first_problem() {
    assert_eq!(assess("", 10, 160).problem, Some(ValidationError::Empty));
    assert_eq!(assess("今日は晴れです", 10, 160).problem, Some(ValidationError::NotEnglish));
    assert_eq!(
      assess("I went home.", 10, 160).problem,
      Some(ValidationError::TooFewWords { count: 3, min: 10 })
    );
    assert_eq!(
      assess("one two three four", 1, 3).problem,
      Some(ValidationError::TooManyWords { count: 4, max: 3 })
    );
    let ok = assess("I went to the park with my friends and we played tennis.", 10, 160);
    assert!(ok.submittable());
    assert_eq!(ok.word_count, 12);
  }

  proptest! {
    #[test]
    fn canonicalize_is_idempotent(s in "\\PC{0,40}") {
      let once = canonicalize(&s);
      prop_assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn canonicalize_keeps_unmapped_chars(s in "[a-zA-Z0-9 あ-ん漢字]{0,30}") {
      prop_assert_eq!(canonicalize(&s), s);
    }

    #[test]
    fn canonical_form_has_same_word_count(s in "[a-z！？。、 ]{0,40}") {
      prop_assert_eq!(count_words(&s), count_words(&canonicalize(&s)));
    }
  }
}
