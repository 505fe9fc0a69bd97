//! WebSocket session loop and the single-question interaction turn.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::protocol::{ClientMessage, ServerEvent, SourceExcerpt};
use crate::answer::AnswerPipeline;
use crate::index::engine::Retriever;
use crate::session::SessionContext;
use crate::state::AppState;
use crate::view::{self, ViewState};

const EMPTY_INPUT_NOTICE: &str = "Please enter a question.";
const NO_HISTORY_NOTICE: &str = "No questions yet.";

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (events, mut events_rx) = mpsc::channel::<ServerEvent>(64);
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("Failed to serialize event: {}", err);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // History and active question live exactly as long as this socket.
    let mut session = SessionContext::new();

    let _ = events.send(ServerEvent::state(ViewState::Idle)).await;
    let _ = events.send(ServerEvent::history_snapshot(&session)).await;

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let incoming = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(incoming) => incoming,
                    Err(err) => {
                        let _ = events
                            .send(ServerEvent::Error {
                                message: format!("unrecognized message: {}", err),
                            })
                            .await;
                        continue;
                    }
                };
                handle_message(&state, &mut session, incoming, &events).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(events);
    let _ = writer.await;
}

async fn handle_message(
    state: &Arc<AppState>,
    session: &mut SessionContext,
    incoming: ClientMessage,
    events: &mpsc::Sender<ServerEvent>,
) {
    match incoming {
        ClientMessage::Ask { question } => {
            run_question_turn(
                state.index.as_ref(),
                &state.pipeline,
                session,
                &question,
                events,
            )
            .await;
        }
        ClientMessage::SelectHistory { index } => match session.select(index) {
            Some(question) => {
                let _ = events.send(ServerEvent::ActiveQuestion { question }).await;
            }
            None => {
                let _ = events
                    .send(ServerEvent::Notice {
                        message: NO_HISTORY_NOTICE.to_string(),
                    })
                    .await;
            }
        },
        ClientMessage::ClearHistory => {
            session.clear();
            let _ = events.send(ServerEvent::history_snapshot(session)).await;
            let _ = events.send(ServerEvent::state(ViewState::Idle)).await;
        }
        ClientMessage::GetHistory => {
            let _ = events.send(ServerEvent::history_snapshot(session)).await;
        }
    }
}

/// One complete question interaction.
///
/// Empty input never reaches retrieval or generation. The question is
/// recorded into history after retrieval succeeds and before the answer
/// attempt, so a generation failure leaves history and the active
/// question intact.
pub async fn run_question_turn(
    retriever: &dyn Retriever,
    pipeline: &AnswerPipeline,
    session: &mut SessionContext,
    input: &str,
    events: &mpsc::Sender<ServerEvent>,
) {
    let question = input.trim();
    if question.is_empty() {
        let _ = events
            .send(ServerEvent::Notice {
                message: EMPTY_INPUT_NOTICE.to_string(),
            })
            .await;
        let _ = events.send(ServerEvent::state(ViewState::Idle)).await;
        return;
    }

    let _ = events
        .send(ServerEvent::state(ViewState::AwaitingAnswer))
        .await;

    let retrieved = match retriever.retrieve(question).await {
        Ok(retrieved) => retrieved,
        Err(err) => {
            tracing::warn!("Retrieval failed for question: {}", err);
            let _ = events
                .send(ServerEvent::Error {
                    message: err.to_string(),
                })
                .await;
            let _ = events.send(ServerEvent::state(ViewState::ShowingError)).await;
            return;
        }
    };

    session.add(question);
    session.set_active(question);
    let _ = events.send(ServerEvent::history_snapshot(session)).await;
    let _ = events
        .send(ServerEvent::ActiveQuestion {
            question: question.to_string(),
        })
        .await;

    let (display, mut display_rx) = mpsc::channel::<String>(32);
    let chunk_events = events.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(buffer) = display_rx.recv().await {
            let _ = chunk_events
                .send(ServerEvent::AnswerChunk { text: buffer })
                .await;
        }
    });

    let answered = pipeline.answer(question, &retrieved, &display).await;
    drop(display);
    let _ = forwarder.await;

    match answered {
        Ok(text) => {
            let _ = events.send(ServerEvent::AnswerComplete { text }).await;

            if !retrieved.passages.is_empty() {
                let items: Vec<SourceExcerpt> = retrieved
                    .passages
                    .iter()
                    .map(|p| SourceExcerpt {
                        rank: p.rank,
                        source: p.source.clone(),
                        excerpt: view::excerpt(&p.text),
                    })
                    .collect();
                let _ = events.send(ServerEvent::Sources { items }).await;
            }

            let _ = events
                .send(ServerEvent::state(ViewState::ShowingAnswer))
                .await;
        }
        Err(err) => {
            tracing::warn!("Answer generation failed: {}", err);
            let _ = events
                .send(ServerEvent::Error {
                    message: err.to_string(),
                })
                .await;
            let _ = events.send(ServerEvent::state(ViewState::ShowingError)).await;
        }
    }
}
