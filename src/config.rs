//! Loading agent configuration (prompts, limits, optional question bank) from TOML.
//!
//! See `AgentConfig`, `Prompts` and `Limits` for the expected schema:
//!
//! ```toml
//! [limits]
//! min_words = 10
//! max_words = 160
//!
//! [[questions]]
//! theme = "ブログ"
//! sentences = ["今日は晴れです。", "公園に行った。"]
//! model_answer = "It is sunny today. I went to the park."
//! ```

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Hint, TargetWords};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub limits: Limits,
  #[serde(default)]
  pub questions: Vec<QuestionCfg>,
}

/// Submission bounds and service knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
  /// A draft below this many words cannot be submitted.
  pub min_words: usize,
  /// A draft above this many words cannot be submitted.
  pub max_words: usize,
  pub default_difficulty: String,
  pub max_excluded_themes: usize,
  /// LLM attempts per question / grading / model-answer request.
  pub max_retries: usize,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      min_words: 10,
      max_words: 160,
      default_difficulty: "intermediate".into(),
      max_excluded_themes: 10,
      max_retries: 3,
    }
  }
}

/// Question bank entry accepted in TOML configuration.
/// Exactly one of `paragraphs`, `sentences` or `prompt` should be filled.
#[derive(Clone, Debug, Deserialize)]
pub struct QuestionCfg {
  #[serde(default)] pub id: Option<String>,
  pub theme: String,
  #[serde(default)] pub difficulty: Option<String>,
  #[serde(default)] pub paragraphs: Option<Vec<String>>,
  #[serde(default)] pub sentences: Option<Vec<String>>,
  #[serde(default)] pub prompt: Option<String>,
  #[serde(default)] pub hints: Vec<Hint>,
  #[serde(default)] pub target_words: Option<TargetWords>,
  #[serde(default)] pub model_answer: Option<String>,
  #[serde(default)] pub model_answer_explanation: Option<String>,
}

/// Prompts used by the OpenAI client. Defaults target Japanese → English
/// translation drills; override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub question_system: String,
  pub question_user_template: String,
  pub grade_system: String,
  pub grade_user_template: String,
  pub grade_multi_user_template: String,
  pub model_answer_system: String,
  pub model_answer_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      question_system: "You write Japanese-to-English translation exercises for Japanese university applicants. Respond ONLY with strict JSON.".into(),
      question_user_template: "Difficulty: {difficulty}\nAvoid these themes: {excluded_themes}\n\nWrite a short Japanese passage (3-6 sentences, each ending with '。') on one theme. Return JSON with fields: theme (string), japanese_paragraphs (array of strings), hints (3-10 objects with en, ja, pos, usage), target_words ({min, max}), model_answer (natural English translation).".into(),
      grade_system: "You are a strict but kind English composition corrector for Japanese learners. Output JSON only.".into(),
      grade_user_template: "Source:\n{source}\n\nLearner answer:\n{answer}\n\nReturn JSON {\"points\": [...], \"corrected\": string, \"model_answer\": string, \"model_answer_explanation\": string}. The first point has level \"内容評価\" and judges content fit (after = \"問題文の趣旨に合っています\" / \"部分的に合っています\" / \"問題文の趣旨に合っていません\"). Then give at least {required_points} points, one per learner sentence in order, each {\"level\": \"❌\" or \"✅\", \"before\": learner sentence, \"after\": corrected sentence, \"reason\": explanation in Japanese}.".into(),
      grade_multi_user_template: "Source sentences and the learner's translation of each:\n{pairs}\n\nReturn JSON {\"points\": [...], \"corrected\": string}. The first point has level \"内容評価\". Then EXACTLY {required_points} points, one per numbered sentence in the same order, each {\"level\": \"❌\" or \"✅\", \"before\": learner sentence, \"after\": corrected sentence, \"reason\": explanation in Japanese}. For an empty learner sentence use level \"❌\" and give a model translation as after.".into(),
      model_answer_system: "You translate Japanese passages into model English answers and explain key grammar in Japanese. Output JSON only.".into(),
      model_answer_user_template: "Passage:\n{source}\n\nReturn JSON {\"model_answer\": string, \"model_answer_explanation\": string}. In the explanation, start each sentence line with 'N文目: ' followed by the English sentence, then the Japanese and the grammar notes.".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "eisaku_backend", %path, questions = cfg.questions.len(), "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "eisaku_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "eisaku_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  toml::from_str::<AgentConfig>(s)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse_agent_config("").unwrap();
    assert_eq!(cfg.limits.min_words, 10);
    assert_eq!(cfg.limits.max_words, 160);
    assert!(cfg.questions.is_empty());
    assert!(cfg.prompts.grade_user_template.contains("{answer}"));
  }

  #[test]
  fn partial_limits_and_bank() {
    let cfg = parse_agent_config(
      r#"
      [limits]
      max_words = 200

      [prompts]
      grade_system = "custom"

      [[questions]]
      theme = "ブログ"
      sentences = ["今日は晴れです。"]
      hints = [{ en = "sunny", ja = "晴れ", pos = "形容詞" }]
      target_words = { min = 10, max = 20 }
      "#,
    )
    .unwrap();
    assert_eq!(cfg.limits.max_words, 200);
    assert_eq!(cfg.limits.min_words, 10);
    assert_eq!(cfg.prompts.grade_system, "custom");
    assert!(cfg.prompts.question_system.contains("JSON"));
    assert_eq!(cfg.questions[0].hints[0].part_of_speech, "形容詞");
    assert_eq!(cfg.questions[0].target_words, Some(TargetWords { min: 10, max: 20 }));
  }
}
