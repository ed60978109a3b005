//! Built-in questions and conversion of TOML bank entries.

use tracing::error;
use uuid::Uuid;

use crate::config::QuestionCfg;
use crate::domain::{Hint, Question, QuestionOrigin, SourceMaterial, TargetWords};

fn hint(en: &str, ja: &str, pos: &str, usage: &str) -> Hint {
  Hint { en: en.into(), ja: ja.into(), part_of_speech: pos.into(), usage_example: Some(usage.into()) }
}

/// Built-in questions that keep the app usable without config or OpenAI.
pub fn seed_questions() -> Vec<Question> {
  vec![
    Question {
      id: "seed-sleep-blog".into(),
      theme: "ブログ".into(),
      difficulty: "intermediate".into(),
      origin: QuestionOrigin::Seed,
      source: SourceMaterial::Paragraphs(vec![
        "最近、睡眠の質を改善したいと思っていた。夜遅くまでスマホを見る習慣があり、なかなか寝付けないことが多かった。".into(),
        "そこで、寝る1時間前にはスマホを触らないというルールを設けた。代わりに本を読んだり、軽いストレッチをしたりするようにした。".into(),
        "この習慣を続けてから、以前よりもスムーズに眠れるようになった。朝の目覚めも良くなり、日中の集中力も向上した気がする。忙しい人にもぜひ試してほしい。".into(),
      ]),
      hints: vec![
        hint("sleep quality", "睡眠の質", "名詞", "improve sleep quality「睡眠の質を改善する」"),
        hint("fall asleep", "眠りにつく", "動詞句", "have trouble falling asleep「眠りにつくのに苦労する」"),
        hint("set a rule", "ルールを設ける", "動詞句", "set a rule for oneself「自分にルールを課す」"),
        hint("concentration", "集中力", "名詞", "improve concentration「集中力を向上させる」"),
        hint("worth trying", "試す価値がある", "形容詞句", "be worth trying「試す価値がある」"),
      ],
      target_word_range: TargetWords { min: 100, max: 120 },
      model_answer: Some(
        "Recently, I had been wanting to improve the quality of my sleep. \
         I had a habit of looking at my smartphone until late at night. \
         I often had trouble falling asleep. \
         So I set a rule not to touch my smartphone for an hour before going to bed. \
         Instead, I started reading books and doing light stretches. \
         Since I kept up this habit, I have been able to fall asleep more smoothly than before. \
         I wake up feeling better in the morning, and I feel my concentration during the day has improved. \
         I would really like busy people to try it too."
          .into(),
      ),
      model_answer_explanation: Some(
        "文法・表現のポイント解説\n\
         1文目: Recently, I had been wanting to improve the quality of my sleep.\n\
         過去完了進行形で「ずっと〜したいと思っていた」を表します。\n\
         4文目: So I set a rule not to touch my smartphone for an hour before going to bed.\n\
         set a rule not to do で「〜しないというルールを設ける」。\n\
         6文目: Since I kept up this habit, I have been able to fall asleep more smoothly than before.\n\
         keep up「続ける」と現在完了で、習慣の効果が今も続いていることを示します。"
          .into(),
      ),
    },
    Question {
      id: "seed-station-cafe".into(),
      theme: "日常生活".into(),
      difficulty: "beginner".into(),
      origin: QuestionOrigin::Seed,
      source: SourceMaterial::Sentences(vec![
        "駅の近くに新しいカフェができた。".into(),
        "週末に友達と行ってみた。".into(),
        "コーヒーがとてもおいしかった。".into(),
      ]),
      hints: vec![
        hint("open", "開店する", "動詞", "A new cafe opened.「新しいカフェが開店した」"),
        hint("near the station", "駅の近くに", "前置詞句", "live near the station「駅の近くに住む」"),
        hint("on the weekend", "週末に", "前置詞句", "go out on the weekend「週末に出かける」"),
      ],
      target_word_range: TargetWords { min: 15, max: 40 },
      model_answer: Some(
        "A new cafe opened near the station. I went there with a friend on the weekend. The coffee was very good.".into(),
      ),
      model_answer_explanation: Some(
        "文法・表現のポイント解説\n\
         1文目: A new cafe opened near the station.\n\
         「できた」は open で自然に表せます。\n\
         2文目: I went there with a friend on the weekend.\n\
         there は「そこに」で、to は不要です。\n\
         3文目: The coffee was very good.\n\
         「おいしい」は good や delicious で表します。"
          .into(),
      ),
    },
  ]
}

/// Absolute last resort when generation failed and every bank entry is excluded.
pub fn hard_fallback_question(difficulty: String) -> Question {
  Question {
    id: Uuid::new_v4().to_string(),
    theme: "自己紹介".into(),
    difficulty,
    origin: QuestionOrigin::Seed,
    source: SourceMaterial::Sentences(vec!["私は大学で医学を学びたい。".into(), "人の役に立つ仕事がしたいからだ。".into()]),
    hints: vec![hint("medicine", "医学", "名詞", "study medicine「医学を学ぶ」")],
    target_word_range: TargetWords { min: 10, max: 30 },
    model_answer: Some("I want to study medicine at university. This is because I want a job that helps people.".into()),
    model_answer_explanation: None,
  }
}

/// Turn a TOML bank entry into a question. Entries without source material are skipped.
pub fn question_from_cfg(cfg: &QuestionCfg, default_difficulty: &str) -> Option<Question> {
  let id = cfg.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
  let source = match (&cfg.paragraphs, &cfg.sentences, &cfg.prompt) {
    (Some(p), _, _) if !p.is_empty() => SourceMaterial::Paragraphs(p.clone()),
    (_, Some(s), _) if !s.is_empty() => SourceMaterial::Sentences(s.clone()),
    (_, _, Some(p)) if !p.trim().is_empty() => SourceMaterial::Prompt(p.clone()),
    _ => {
      error!(target: "question", %id, theme = %cfg.theme, "Skipping bank item: no paragraphs, sentences or prompt");
      return None;
    }
  };
  let target_word_range = cfg.target_words.filter(TargetWords::is_valid).unwrap_or_default();

  Some(Question {
    id,
    theme: cfg.theme.clone(),
    difficulty: cfg.difficulty.clone().unwrap_or_else(|| default_difficulty.to_string()),
    origin: QuestionOrigin::LocalBank,
    source,
    hints: cfg.hints.clone(),
    target_word_range,
    model_answer: cfg.model_answer.clone(),
    model_answer_explanation: cfg.model_answer_explanation.clone(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::parse_agent_config;
  use crate::session::sentence_sources;

  #[test]
  fn seeds_have_sentence_material_and_references() {
    for q in seed_questions() {
      assert!(!sentence_sources(&q.source).is_empty(), "{}", q.id);
      assert!(q.model_answer.is_some());
      assert!(q.target_word_range.is_valid());
    }
    assert_eq!(sentence_sources(&seed_questions()[0].source).len(), 7);
  }

  #[test]
  fn bank_entries_convert() {
    let cfg = parse_agent_config(
      r#"
      [[questions]]
      id = "bank-1"
      theme = "旅行"
      prompt = "Write about a trip you enjoyed."

      [[questions]]
      theme = "空"
      "#,
    )
    .unwrap();
    let q = question_from_cfg(&cfg.questions[0], "intermediate").unwrap();
    assert_eq!(q.id, "bank-1");
    assert_eq!(q.origin, QuestionOrigin::LocalBank);
    assert_eq!(q.prompt_text(), Some("Write about a trip you enjoyed."));
    assert_eq!(q.difficulty, "intermediate");
    assert!(question_from_cfg(&cfg.questions[1], "intermediate").is_none());
  }
}
