//! WebSocket upgrade + session loop. Each connection owns one `SessionMachine`;
//! client messages drive its transitions and collaborator calls run as tasks
//! whose results come back through a channel to the same loop.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::align::explanation_lines;
use crate::domain::{GradeOutcome, ModelAnswer, Question};
use crate::error::{ProviderError, SessionError};
use crate::logic;
use crate::protocol::{ClientWsMessage, GradeRequest, ServerWsMessage};
use crate::session::{Command, SessionMachine, Stage, Ticket, Update};
use crate::state::AppState;

/// Result of a collaborator call, tagged with the ticket it was issued under.
#[derive(Debug)]
enum Completion {
  Question(Ticket, Result<Question, ProviderError>),
  Graded(Ticket, Result<GradeOutcome, ProviderError>),
  ModelAnswer(Ticket, Result<ModelAnswer, ProviderError>),
}

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "eisaku_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "eisaku_backend", "WebSocket connected");
  let mut machine = SessionMachine::new(&state.limits);
  let (tx, mut rx) = mpsc::channel::<Completion>(16);

  loop {
    let replies = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => {
          let (replies, command) = match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(msg) => {
              debug!(target: "session", ?msg, "WS received");
              handle_client(msg, &mut machine)
            }
            Err(e) => (vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e), details: None }], None),
          };
          if let Some(cmd) = command {
            dispatch(cmd, &state, &tx);
          }
          replies
        }
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
          continue;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Err(e)) => {
          warn!(target: "eisaku_backend", error = %e, "WS receive error");
          break;
        }
        Some(Ok(_)) => continue,
      },
      Some(done) = rx.recv() => apply_completion(&mut machine, done),
    };

    for reply in replies {
      let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = socket.send(Message::Text(out)).await {
        error!(target: "eisaku_backend", error = %e, "WS send error");
        info!(target: "eisaku_backend", "WebSocket disconnected");
        return;
      }
    }
  }
  info!(
    target: "eisaku_backend",
    stage = ?machine.stage(),
    mode = ?machine.mode(),
    slots = machine.slots().len(),
    question = ?machine.session().question.as_ref().map(|q| q.id.as_str()),
    "WebSocket disconnected"
  );
}

/// Run a collaborator call off the session loop.
fn dispatch(cmd: Command, state: &Arc<AppState>, tx: &mpsc::Sender<Completion>) {
  let state = state.clone();
  let tx = tx.clone();
  tokio::spawn(async move {
    let done = match cmd {
      Command::FetchQuestion { ticket, request } => {
        Completion::Question(ticket, logic::fetch_question(&state, &request).await.map_err(ProviderError::from))
      }
      Command::Grade { ticket, request } => {
        let result = match &request {
          GradeRequest::Single(r) => logic::grade_single(&state, r).await,
          GradeRequest::Multi(r) => logic::grade_multi(&state, r).await,
        };
        Completion::Graded(ticket, result.map_err(ProviderError::from))
      }
      Command::FetchModelAnswer { ticket, request } => {
        Completion::ModelAnswer(ticket, logic::model_answer(&state, &request).await.map_err(ProviderError::from))
      }
    };
    if tx.send(done).await.is_err() {
      debug!(target: "session", "Connection closed before the call completed");
    }
  });
}

fn stage(stage: Stage) -> ServerWsMessage {
  ServerWsMessage::Stage { stage }
}

fn session_error(e: SessionError) -> ServerWsMessage {
  match e {
    SessionError::Validation(problem) => ServerWsMessage::ValidationError { message: problem.to_string(), problem },
    other => ServerWsMessage::Error { message: other.to_string(), details: None },
  }
}

/// Apply one client message. Returns the replies and at most one call to start.
fn handle_client(msg: ClientWsMessage, machine: &mut SessionMachine) -> (Vec<ServerWsMessage>, Option<Command>) {
  match msg {
    ClientWsMessage::Ping => (vec![ServerWsMessage::Pong], None),

    ClientWsMessage::NewQuestion { difficulty, excluded_themes } => {
      let cmd = machine.request_question(difficulty, excluded_themes);
      (vec![stage(machine.stage())], Some(cmd))
    }

    ClientWsMessage::UpdateDraft { text } => match machine.update_draft(&text) {
      Ok(feedback) => (vec![ServerWsMessage::DraftStatus { feedback }], None),
      Err(e) => (vec![session_error(e)], None),
    },

    ClientWsMessage::UpdateSlot { index, text } => match machine.update_slot(index, &text) {
      Ok(feedback) => (vec![ServerWsMessage::DraftStatus { feedback }], None),
      Err(e) => (vec![session_error(e)], None),
    },

    ClientWsMessage::Submit => match machine.submit() {
      Ok(Some(cmd)) => (vec![stage(machine.stage())], Some(cmd)),
      Ok(None) => (vec![], None),
      Err(e) => (vec![session_error(e)], None),
    },

    ClientWsMessage::ModelAnswer => match machine.request_model_answer() {
      Ok(cmd) => (vec![stage(machine.stage())], Some(cmd)),
      Err(e) => (vec![session_error(e)], None),
    },
  }
}

fn apply_completion(machine: &mut SessionMachine, done: Completion) -> Vec<ServerWsMessage> {
  let applied = match done {
    Completion::Question(ticket, result) => machine.on_question(ticket, result),
    Completion::Graded(ticket, result) => machine.on_graded(ticket, result),
    Completion::ModelAnswer(ticket, result) => machine.on_model_answer(ticket, result),
  };
  match applied {
    Ok(update) => render_update(update),
    Err(SessionError::StaleResponse) => vec![],
    Err(e) => vec![session_error(e)],
  }
}

fn render_update(update: Update) -> Vec<ServerWsMessage> {
  match update {
    Update::QuestionReady { question, mode, slots } => {
      vec![ServerWsMessage::Question { question, mode, slots }, stage(Stage::QuestionReady)]
    }
    Update::Corrected(correction) => {
      vec![ServerWsMessage::Correction { correction }, stage(Stage::CorrectionReady)]
    }
    Update::ModelAnswerReady(answer) => vec![
      ServerWsMessage::ModelAnswer {
        explanation: explanation_lines(&answer.model_answer_explanation),
        model_answer: answer.model_answer,
      },
      stage(Stage::ModelAnswerReady),
    ],
    Update::Failed { error, stage: back_to } => {
      vec![ServerWsMessage::Error { message: error.error, details: error.details }, stage(back_to)]
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Limits;
  use crate::seeds::seed_questions;

  fn ticket(cmd: &Command) -> Ticket {
    match cmd {
      Command::FetchQuestion { ticket, .. } | Command::Grade { ticket, .. } | Command::FetchModelAnswer { ticket, .. } => *ticket,
    }
  }

  fn types(msgs: &[ServerWsMessage]) -> Vec<String> {
    msgs
      .iter()
      .map(|m| serde_json::to_value(m).unwrap()["type"].as_str().unwrap_or_default().to_string())
      .collect()
  }

  #[test]
  fn question_flow_renders_question_then_stage() {
    let mut m = SessionMachine::new(&Limits::default());
    let (replies, cmd) = handle_client(ClientWsMessage::NewQuestion { difficulty: None, excluded_themes: vec![] }, &mut m);
    assert_eq!(types(&replies), vec!["stage"]);
    let cmd = cmd.unwrap();

    let replies = apply_completion(&mut m, Completion::Question(ticket(&cmd), Ok(seed_questions()[1].clone())));
    assert_eq!(types(&replies), vec!["question", "stage"]);
    let json = serde_json::to_value(&replies[0]).unwrap();
    assert_eq!(json["mode"], "multi");
    assert_eq!(json["slots"].as_array().map(Vec::len), Some(3));
  }

  #[test]
  fn validation_errors_are_reported_without_a_call() {
    let mut m = SessionMachine::new(&Limits::default());
    let (_, cmd) = handle_client(ClientWsMessage::NewQuestion { difficulty: None, excluded_themes: vec![] }, &mut m);
    apply_completion(&mut m, Completion::Question(ticket(&cmd.unwrap()), Ok(seed_questions()[1].clone())));

    let (replies, _) = handle_client(ClientWsMessage::UpdateSlot { index: 0, text: "Hello there．".into() }, &mut m);
    assert_eq!(types(&replies), vec!["draft_status"]);
    let (replies, cmd) = handle_client(ClientWsMessage::Submit, &mut m);
    assert!(cmd.is_none());
    assert_eq!(types(&replies), vec!["validation_error"]);
    let json = serde_json::to_value(&replies[0]).unwrap();
    assert_eq!(json["problem"]["kind"], "too_few_words");
  }

  #[test]
  fn stale_completion_is_silent() {
    let mut m = SessionMachine::new(&Limits::default());
    let (_, first) = handle_client(ClientWsMessage::NewQuestion { difficulty: None, excluded_themes: vec![] }, &mut m);
    let (_, _second) = handle_client(ClientWsMessage::NewQuestion { difficulty: None, excluded_themes: vec![] }, &mut m);
    let replies = apply_completion(&mut m, Completion::Question(ticket(&first.unwrap()), Ok(seed_questions()[0].clone())));
    assert!(replies.is_empty());
  }

  #[test]
  fn failed_call_reports_error_and_stage() {
    let mut m = SessionMachine::new(&Limits::default());
    let (_, cmd) = handle_client(ClientWsMessage::NewQuestion { difficulty: None, excluded_themes: vec![] }, &mut m);
    let replies = apply_completion(&mut m, Completion::Question(ticket(&cmd.unwrap()), Err(ProviderError::new("no questions"))));
    assert_eq!(types(&replies), vec!["error", "stage"]);
    assert_eq!(serde_json::to_value(&replies[1]).unwrap()["stage"], "no_question");
  }

  #[test]
  fn submit_without_question_is_an_error() {
    let mut m = SessionMachine::new(&Limits::default());
    let (replies, cmd) = handle_client(ClientWsMessage::Submit, &mut m);
    assert!(cmd.is_none());
    assert_eq!(types(&replies), vec!["error"]);
  }
}
