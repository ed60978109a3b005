//! Application state: in-memory question store, prompts, limits, OpenAI client, and selection logic.
//!
//! This module owns:
//!   - the issued-question store (by id), read by graders and the model-answer provider
//!   - the local bank (TOML entries + built-in seeds)
//!   - the prompts and limits (from TOML or defaults)
//!   - optional OpenAI client
//!
//! Selection generates a fresh question via OpenAI when available, then falls
//! back to a random bank entry, and finally to a hard-coded question.

use std::{collections::HashMap, sync::Arc};

use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_agent_config_from_env, AgentConfig, Limits, Prompts};
use crate::domain::{Question, QuestionOrigin, SourceMaterial};
use crate::openai::{GeneratedQuestion, OpenAI};
use crate::seeds::{hard_fallback_question, question_from_cfg, seed_questions};
use crate::util::is_japanese;

#[derive(Clone)]
pub struct AppState {
    pub by_id: Arc<RwLock<HashMap<String, Question>>>,
    pub bank: Vec<Question>,
    pub last_served: Arc<RwLock<Option<String>>>,
    pub openai: Option<OpenAI>,
    pub prompts: Prompts,
    pub limits: Limits,
}

impl AppState {
    /// Build state from env: load config, build the bank, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_agent_config_from_env().unwrap_or_default();

        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "eisaku_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
        } else {
            info!(target: "eisaku_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local bank and local grading.");
        }

        Self::with_config(cfg, openai)
    }

    pub fn with_config(cfg: AgentConfig, openai: Option<OpenAI>) -> Self {
        let mut bank: Vec<Question> = cfg
            .questions
            .iter()
            .filter_map(|qc| question_from_cfg(qc, &cfg.limits.default_difficulty))
            .collect();

        // Built-in seeds never overwrite configured ids.
        for seed in seed_questions() {
            if !bank.iter().any(|q| q.id == seed.id) {
                bank.push(seed);
            }
        }

        let mut count_by_origin: HashMap<QuestionOrigin, usize> = HashMap::new();
        for q in &bank {
            *count_by_origin.entry(q.origin).or_default() += 1;
        }
        info!(
            target: "question",
            local_bank = count_by_origin.get(&QuestionOrigin::LocalBank).copied().unwrap_or(0),
            seed = count_by_origin.get(&QuestionOrigin::Seed).copied().unwrap_or(0),
            "Startup question inventory"
        );

        let by_id = bank.iter().map(|q| (q.id.clone(), q.clone())).collect();
        Self {
            by_id: Arc::new(RwLock::new(by_id)),
            bank,
            last_served: Arc::new(RwLock::new(None)),
            openai,
            prompts: cfg.prompts,
            limits: cfg.limits,
        }
    }

    /// Insert question into the by-id store.
    #[instrument(level = "debug", skip(self, q), fields(id = %q.id))]
    pub async fn insert_question(&self, q: Question) {
        self.by_id.write().await.insert(q.id.clone(), q);
    }

    /// Read-only access to an issued question by id.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_question(&self, id: &str) -> Option<Question> {
        self.by_id.read().await.get(id).cloned()
    }

    /// Selection policy: generated → random bank entry → hard fallback.
    /// Returns the question and a short origin label for logs.
    #[instrument(level = "info", skip(self, difficulty, excluded_themes), fields(%difficulty, excluded = excluded_themes.len()))]
    pub async fn choose_question(&self, difficulty: &str, excluded_themes: &[String]) -> (Question, &'static str) {
        // 1) Fresh generation, validated, with retries.
        if let Some(oa) = &self.openai {
            for attempt in 1..=self.limits.max_retries.max(1) {
                let result = oa
                    .generate_question(&self.prompts, difficulty, excluded_themes)
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|gen| validate_generated(gen, difficulty, excluded_themes));
                match result {
                    Ok(q) => {
                        self.remember(&q).await;
                        info!(target: "question", %difficulty, chosen = %q.id, theme = %q.theme, attempt, source = "openai_generated", "Generated fresh question");
                        return (q, "openai_generated");
                    }
                    Err(e) => warn!(target: "question", attempt, error = %e, "Question generation attempt failed"),
                }
            }
            error!(target: "question", %difficulty, "OpenAI generation exhausted retries; using local bank");
        }

        // 2) Random bank entry with an allowed theme.
        let last = self.last_served.read().await.clone();
        if let Some(q) = pick_from_bank(&self.bank, difficulty, excluded_themes, last.as_deref()) {
            self.remember(&q).await;
            info!(target: "question", %difficulty, chosen = %q.id, theme = %q.theme, source = "local_bank", "Serving bank question");
            return (q, "local_bank");
        }

        // 3) Absolute last resort: hard fallback.
        let q = hard_fallback_question(difficulty.to_string());
        self.remember(&q).await;
        warn!(target: "question", %difficulty, chosen = %q.id, source = "hard_fallback", "Every bank theme excluded; inserted hard fallback question");
        (q, "hard_fallback")
    }

    async fn remember(&self, q: &Question) {
        self.insert_question(q.clone()).await;
        *self.last_served.write().await = Some(q.id.clone());
    }
}

fn is_excluded(theme: &str, excluded_themes: &[String]) -> bool {
    excluded_themes.iter().any(|t| t.trim() == theme.trim())
}

/// Random bank entry whose theme is not excluded. Avoids repeating the last
/// served question when there is a choice and prefers the requested difficulty.
fn pick_from_bank(bank: &[Question], difficulty: &str, excluded_themes: &[String], last: Option<&str>) -> Option<Question> {
    let mut candidates: Vec<&Question> = bank.iter().filter(|q| !is_excluded(&q.theme, excluded_themes)).collect();
    if candidates.len() > 1 {
        candidates.retain(|q| Some(q.id.as_str()) != last);
    }
    let same_level: Vec<&Question> = candidates.iter().copied().filter(|q| q.difficulty == difficulty).collect();
    let pool = if same_level.is_empty() { candidates } else { same_level };
    pool.choose(&mut rand::thread_rng()).map(|q| (*q).clone())
}

/// Accept a generated question only if it is usable as a drill.
pub fn validate_generated(gen: GeneratedQuestion, difficulty: &str, excluded_themes: &[String]) -> Result<Question, String> {
    if gen.theme.trim().is_empty() {
        return Err("missing theme".into());
    }
    if is_excluded(&gen.theme, excluded_themes) {
        return Err(format!("theme {} is excluded", gen.theme));
    }
    if !(3..=10).contains(&gen.hints.len()) {
        return Err(format!("expected 3-10 hints, got {}", gen.hints.len()));
    }
    let paragraphs: Vec<String> = gen
        .japanese_paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if !paragraphs.iter().any(|p| p.chars().any(is_japanese)) {
        return Err("no Japanese source text".into());
    }
    let target_word_range = gen.target_words.unwrap_or_default();
    if !target_word_range.is_valid() {
        return Err(format!("invalid word range {}-{}", target_word_range.min, target_word_range.max));
    }

    Ok(Question {
        id: Uuid::new_v4().to_string(),
        theme: gen.theme.trim().to_string(),
        difficulty: difficulty.to_string(),
        origin: QuestionOrigin::Generated,
        source: SourceMaterial::Paragraphs(paragraphs),
        hints: gen.hints,
        target_word_range,
        model_answer: gen.model_answer.filter(|a| !a.trim().is_empty()),
        model_answer_explanation: gen.model_answer_explanation.filter(|a| !a.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Hint, TargetWords};

    fn state() -> AppState {
        AppState::with_config(AgentConfig::default(), None)
    }

    fn generated(theme: &str, hints: usize) -> GeneratedQuestion {
        GeneratedQuestion {
            theme: theme.into(),
            japanese_paragraphs: vec!["今日は晴れです。".into()],
            hints: (0..hints)
                .map(|i| Hint { en: format!("w{i}"), ja: "語".into(), part_of_speech: "名詞".into(), usage_example: None })
                .collect(),
            target_words: Some(TargetWords { min: 80, max: 100 }),
            model_answer: Some("It is sunny today.".into()),
            model_answer_explanation: None,
        }
    }

    #[test]
    fn generated_questions_are_validated() {
        let q = validate_generated(generated("旅行", 3), "intermediate", &[]).unwrap();
        assert_eq!(q.origin, QuestionOrigin::Generated);
        assert_eq!(q.target_word_range, TargetWords { min: 80, max: 100 });

        assert!(validate_generated(generated("旅行", 2), "intermediate", &[]).is_err());
        assert!(validate_generated(generated("旅行", 11), "intermediate", &[]).is_err());
        assert!(validate_generated(generated("旅行", 3), "intermediate", &["旅行".into()]).is_err());

        let mut english_only = generated("旅行", 3);
        english_only.japanese_paragraphs = vec!["It is sunny.".into()];
        assert!(validate_generated(english_only, "intermediate", &[]).is_err());

        let mut bad_range = generated("旅行", 3);
        bad_range.target_words = Some(TargetWords { min: 120, max: 100 });
        assert!(validate_generated(bad_range, "intermediate", &[]).is_err());
    }

    #[tokio::test]
    async fn bank_selection_respects_excluded_themes() {
        let s = state();
        let (q, origin) = s.choose_question("intermediate", &["ブログ".into()]).await;
        assert_eq!(origin, "local_bank");
        assert_eq!(q.theme, "日常生活");
        assert!(s.get_question(&q.id).await.is_some());
    }

    #[tokio::test]
    async fn bank_selection_avoids_repeating_last_question() {
        let s = state();
        let (first, _) = s.choose_question("advanced", &[]).await;
        let (second, _) = s.choose_question("advanced", &[]).await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn hard_fallback_when_every_theme_is_excluded() {
        let s = state();
        let (q, origin) = s.choose_question("intermediate", &["ブログ".into(), "日常生活".into()]).await;
        assert_eq!(origin, "hard_fallback");
        assert_eq!(s.get_question(&q.id).await.map(|q| q.theme), Some("自己紹介".to_string()));
    }
}
