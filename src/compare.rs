//! Comparison normal form for English sentences.
//!
//! Only used to check whether a grader-approved sentence and the learner's
//! verbatim input say the same thing modulo spacing, final punctuation and
//! sentence-initial capitals. Never applied to text shown to the learner.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn space_before_mark() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\s+([.!?])").expect("static regex"))
}

fn mark_then_upper() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"([.!?])([A-Z])").expect("static regex"))
}

fn mark_space_lower() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"([.!?] +)([a-z])").expect("static regex"))
}

fn multi_space() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r" {2,}").expect("static regex"))
}

fn capitalize_first(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

pub fn normalize_for_comparison(text: &str) -> String {
  let s = text.trim();
  if s.is_empty() {
    return String::new();
  }

  let mut s = space_before_mark().replace_all(s, "$1").into_owned();
  if !s.ends_with(['.', '!', '?']) {
    s.push('.');
  }
  let s = mark_then_upper().replace_all(&s, "$1 $2");
  let s = capitalize_first(&s);
  let s = mark_space_lower().replace_all(&s, |c: &Captures| format!("{}{}", &c[1], c[2].to_uppercase()));
  multi_space().replace_all(&s, " ").into_owned()
}

/// Same sentence modulo the comparison normal form.
pub fn same_sentence(a: &str, b: &str) -> bool {
  normalize_for_comparison(a) == normalize_for_comparison(b)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn removes_space_before_period_and_capitalizes() {
    assert_eq!(normalize_for_comparison("the cat sat ."), "The cat sat.");
  }

  #[test]
  fn appends_terminal_mark() {
    assert_eq!(normalize_for_comparison("  hello world "), "Hello world.");
    assert_eq!(normalize_for_comparison("is it?"), "Is it?");
  }

  #[test]
  fn splits_glued_sentences_and_capitalizes_each() {
    assert_eq!(normalize_for_comparison("i went.Then i ate.  so good!"), "I went. Then i ate. So good!");
  }

  #[test]
  fn collapses_spaces() {
    assert_eq!(normalize_for_comparison("a  b   c"), "A b c.");
  }

  #[test]
  fn empty_stays_empty() {
    assert_eq!(normalize_for_comparison("   "), "");
  }

  #[test]
  fn same_sentence_ignores_cosmetics() {
    assert!(same_sentence("the cat sat .", "The cat sat."));
    assert!(!same_sentence("The cat sat.", "The cat sat down."));
  }
}
