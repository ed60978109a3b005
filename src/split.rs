//! Sentence splitting for Japanese source text and English answers.
//!
//! Japanese: sentences end with `。`. English: a boundary is a run of one or
//! more terminal marks (`.`, `!`, `?`) followed by whitespace. Neither rule
//! knows about abbreviations; "Mr. Smith" splits after "Mr.".

use std::sync::OnceLock;

use regex::Regex;

pub const JA_TERMINAL: char = '。';

/// Concatenate the paragraphs and split on `。`, re-appending the mark to
/// every retained sentence (including a trailing fragment that had none).
pub fn split_japanese<S: AsRef<str>>(paragraphs: &[S]) -> Vec<String> {
  let joined: String = paragraphs.iter().map(|p| p.as_ref()).collect();
  joined
    .split(JA_TERMINAL)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|s| format!("{s}{JA_TERMINAL}"))
    .collect()
}

fn boundary_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("static boundary regex"))
}

/// Split into at most `n` pieces using the first `n - 1` boundaries. The last
/// piece absorbs whatever text remains, so a merged sentence in the input
/// never makes this fail; it only yields fewer pieces.
pub fn split_english_by_count(text: &str, n: usize) -> Vec<String> {
  if n == 0 {
    return Vec::new();
  }
  let text = text.trim();
  if text.is_empty() {
    return Vec::new();
  }

  let mut pieces = Vec::new();
  let mut start = 0usize;
  for m in boundary_regex().find_iter(text).take(n - 1) {
    // Keep the terminal marks with the sentence, drop the whitespace.
    let marks_end = m.start() + m.as_str().trim_end().len();
    let piece = text[start..marks_end].trim();
    if !piece.is_empty() {
      pieces.push(piece.to_string());
    }
    start = m.end();
  }
  let rest = text[start..].trim();
  if !rest.is_empty() {
    pieces.push(rest.to_string());
  }
  pieces
}

/// Split on every boundary.
pub fn split_english(text: &str) -> Vec<String> {
  split_english_by_count(text, usize::MAX)
}
