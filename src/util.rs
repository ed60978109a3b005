//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// True for kana, kanji and the CJK punctuation block.
/// Used to check that generated source material is actually Japanese.
pub fn is_japanese(ch: char) -> bool {
  matches!(ch,
    '\u{3000}'..='\u{303F}'   // CJK symbols and punctuation
    | '\u{3040}'..='\u{309F}' // hiragana
    | '\u{30A0}'..='\u{30FF}' // katakana
    | '\u{3400}'..='\u{4DBF}'
    | '\u{4E00}'..='\u{9FFF}'
    | '\u{F900}'..='\u{FAFF}'
    | '\u{FF66}'..='\u{FF9F}' // half-width katakana
  )
}

/// Log-safe truncation for large strings (char boundary aware).
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let total = s.chars().count();
  if total <= max_chars {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_chars).collect();
    format!("{}… ({} chars total)", head, total)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_all_keys() {
    let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y and x");
  }

  #[test]
  fn japanese_detection() {
    assert!(is_japanese('今'));
    assert!(is_japanese('は'));
    assert!(is_japanese('ス'));
    assert!(is_japanese('。'));
    assert!(!is_japanese('a'));
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("abc", 5), "abc");
    assert_eq!(trunc_for_log("今日は晴れです", 3), "今日は… (7 chars total)");
  }
}
