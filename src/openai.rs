//! Minimal OpenAI client for our use-cases.
//!
//! We only call chat.completions and request a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::Prompts;
use crate::domain::{Hint, ModelAnswer, TargetWords};
use crate::grading::RawGrade;
use crate::util::{fill_template, trunc_for_log};

#[derive(Debug, Error)]
pub enum OpenAiError {
  #[error("OpenAI HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("JSON parse error: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("invalid model output: {0}")]
  Invalid(String),
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
}

/// Question JSON as the generator emits it.
#[derive(Clone, Debug, Deserialize)]
pub struct GeneratedQuestion {
  #[serde(default)]
  pub theme: String,
  #[serde(default, alias = "japanese_sentences")]
  pub japanese_paragraphs: Vec<String>,
  #[serde(default)]
  pub hints: Vec<Hint>,
  #[serde(default)]
  pub target_words: Option<TargetWords>,
  #[serde(default)]
  pub model_answer: Option<String>,
  #[serde(default)]
  pub model_answer_explanation: Option<String>,
}

#[derive(Deserialize)]
struct RawModelAnswer {
  #[serde(default)]
  model_answer: String,
  #[serde(default)]
  model_answer_explanation: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(60);

    let client = match reqwest::Client::builder().timeout(Duration::from_secs(timeout_secs)).build() {
      Ok(c) => c,
      Err(e) => {
        error!(target: "eisaku_backend", error = %e, "Failed to build HTTP client; OpenAI disabled");
        return None;
      }
    };

    Some(Self { client, api_key, base_url, fast_model, strong_model })
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %model, user_len = user.len()))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    model: &str,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, OpenAiError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "eisaku-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(OpenAiError::Http { status, message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, elapsed = ?start.elapsed(), "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    debug!(preview = %trunc_for_log(&text, 80), "OpenAI response");

    Ok(serde_json::from_str::<T>(strip_code_fence(&text))?)
  }

  // --- High-level helpers (domain-specialized) ---

  #[instrument(level = "info", skip(self, prompts, difficulty, excluded_themes), fields(%difficulty, excluded = excluded_themes.len(), model = %self.strong_model))]
  pub async fn generate_question(
    &self,
    prompts: &Prompts,
    difficulty: &str,
    excluded_themes: &[String],
  ) -> Result<GeneratedQuestion, OpenAiError> {
    let excluded = if excluded_themes.is_empty() { "なし".to_string() } else { excluded_themes.join("、") };
    let user = fill_template(
      &prompts.question_user_template,
      &[("difficulty", difficulty), ("excluded_themes", &excluded)],
    );
    let gen: GeneratedQuestion = self.chat_json(&self.strong_model, &prompts.question_system, &user, 0.9).await?;
    info!(theme = %gen.theme, paragraphs = gen.japanese_paragraphs.len(), hints = gen.hints.len(), "Question generated");
    Ok(gen)
  }

  #[instrument(level = "info", skip(self, prompts, source, answer), fields(source_len = source.len(), answer_len = answer.len()))]
  pub async fn grade_single(
    &self,
    prompts: &Prompts,
    source: &str,
    answer: &str,
    required_points: usize,
  ) -> Result<RawGrade, OpenAiError> {
    let required = required_points.to_string();
    let user = fill_template(
      &prompts.grade_user_template,
      &[("source", source), ("answer", answer), ("required_points", &required)],
    );
    self.chat_json(&self.strong_model, &prompts.grade_system, &user, 0.2).await
  }

  #[instrument(level = "info", skip(self, prompts, user_sentences, source_sentences), fields(sentences = user_sentences.len()))]
  pub async fn grade_multi(
    &self,
    prompts: &Prompts,
    user_sentences: &[String],
    source_sentences: &[String],
  ) -> Result<RawGrade, OpenAiError> {
    let pairs = numbered_pairs(user_sentences, source_sentences);
    let required = user_sentences.len().to_string();
    let user = fill_template(
      &prompts.grade_multi_user_template,
      &[("pairs", &pairs), ("required_points", &required)],
    );
    self.chat_json(&self.strong_model, &prompts.grade_system, &user, 0.2).await
  }

  #[instrument(level = "info", skip(self, prompts, source), fields(source_len = source.len()))]
  pub async fn model_answer(&self, prompts: &Prompts, source: &str) -> Result<ModelAnswer, OpenAiError> {
    let user = fill_template(&prompts.model_answer_user_template, &[("source", source)]);
    let raw: RawModelAnswer = self.chat_json(&self.strong_model, &prompts.model_answer_system, &user, 0.3).await?;
    if raw.model_answer.trim().is_empty() {
      return Err(OpenAiError::Invalid("empty model answer".into()));
    }
    Ok(ModelAnswer {
      model_answer: raw.model_answer.trim().to_string(),
      model_answer_explanation: raw.model_answer_explanation.trim().to_string(),
    })
  }
}

/// `1. 原文 / 学習者: ...` lines for the multi-sentence grading prompt.
fn numbered_pairs(user_sentences: &[String], source_sentences: &[String]) -> String {
  user_sentences
    .iter()
    .enumerate()
    .map(|(i, user)| {
      let source = source_sentences.get(i).map(String::as_str).unwrap_or("");
      let user = if user.trim().is_empty() { "(未回答)" } else { user.trim() };
      format!("{}. 原文: {}\n   学習者: {}", i + 1, source, user)
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Some models wrap JSON in ```json fences even in json_object mode.
fn strip_code_fence(text: &str) -> &str {
  let t = text.trim();
  let Some(rest) = t.strip_prefix("```") else { return t };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
