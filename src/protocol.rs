//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::align::ExplanationLine;
use crate::domain::{Question, SentenceSlot, TargetWords};
use crate::error::ValidationError;
use crate::session::{Correction, DraftFeedback, InputMode, Stage};

//
// Collaborator requests (used by the session and accepted over HTTP)
//

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub excluded_themes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleGradeRequest {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sentences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_paragraphs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    pub user_answer: String,
    #[serde(default)]
    pub target_word_range: TargetWords,
    #[serde(default)]
    pub word_count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiGradeRequest {
    pub question_id: String,
    /// One entry per source sentence; "" marks an unanswered slot.
    pub user_sentences: Vec<String>,
    pub source_sentences: Vec<String>,
    #[serde(default)]
    pub target_word_range: TargetWords,
    #[serde(default)]
    pub word_count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GradeRequest {
    Single(SingleGradeRequest),
    Multi(MultiGradeRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAnswerRequest {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
}

//
// WebSocket session protocol
//

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    NewQuestion {
        #[serde(default)]
        difficulty: Option<String>,
        #[serde(default, rename = "excludedThemes")]
        excluded_themes: Vec<String>,
    },
    UpdateDraft {
        text: String,
    },
    UpdateSlot {
        index: usize,
        text: String,
    },
    Submit,
    ModelAnswer,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Stage {
        stage: Stage,
    },
    Question {
        question: Question,
        mode: InputMode,
        slots: Vec<SentenceSlot>,
    },
    DraftStatus {
        feedback: DraftFeedback,
    },
    ValidationError {
        message: String,
        problem: ValidationError,
    },
    Correction {
        correction: Correction,
    },
    ModelAnswer {
        #[serde(rename = "modelAnswer")]
        model_answer: String,
        explanation: Vec<ExplanationLine>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

//
// HTTP-only DTOs
//

/// Question as delivered by the Question Provider endpoint.
#[derive(Debug, Serialize)]
pub struct QuestionOut {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(flatten)]
    pub question: Question,
}

pub fn to_out(q: &Question) -> QuestionOut {
    QuestionOut {
        question_id: q.id.clone(),
        question: q.clone(),
    }
}

#[derive(Deserialize)]
pub struct InspectIn {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectOut {
    pub canonical: String,
    pub word_count: usize,
    pub english_dominant: bool,
    pub sentences: Vec<String>,
    pub rule: &'static str,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub openai: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse() {
        let m: ClientWsMessage =
            serde_json::from_str(r#"{"type":"new_question","excludedThemes":["ブログ"]}"#).unwrap();
        match m {
            ClientWsMessage::NewQuestion { difficulty, excluded_themes } => {
                assert!(difficulty.is_none());
                assert_eq!(excluded_themes, vec!["ブログ".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"update_slot","index":2,"text":"Hi."}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::UpdateSlot { index: 2, .. }));
        let m: ClientWsMessage = serde_json::from_str(r#"{"type":"submit"}"#).unwrap();
        assert!(matches!(m, ClientWsMessage::Submit));
    }

    #[test]
    fn grade_requests_use_camel_case() {
        let req: MultiGradeRequest = serde_json::from_str(
            r#"{"questionId":"q1","userSentences":["I went.",""],"sourceSentences":["行った。","食べた。"],"targetWordRange":{"min":10,"max":20},"wordCount":2}"#,
        )
        .unwrap();
        assert_eq!(req.user_sentences[1], "");
        assert_eq!(req.word_count, Some(2));

        let single = SingleGradeRequest {
            question_id: "q1".into(),
            source_sentences: None,
            source_paragraphs: None,
            prompt_text: Some("Describe".into()),
            user_answer: "I agree.".into(),
            target_word_range: TargetWords::default(),
            word_count: Some(2),
        };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["userAnswer"], "I agree.");
        assert!(json.get("sourceSentences").is_none());
    }

    #[test]
    fn server_error_message_shape() {
        let msg = ServerWsMessage::Error { message: "boom".into(), details: None };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
        assert!(json.get("details").is_none());
    }
}
