//! WebSocket protocol between the page and the server.

use serde::{Deserialize, Serialize};

use crate::session::SessionContext;
use crate::view::{self, ViewState};

/// Messages the page sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit a question.
    Ask { question: String },
    /// Re-select a previous question; `index` is 1-based in display order
    /// (most recent first).
    SelectHistory { index: usize },
    /// Empty the session history.
    ClearHistory,
    /// Request a fresh history snapshot.
    GetHistory,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub index: usize,
    pub label: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceExcerpt {
    pub rank: usize,
    pub source: String,
    pub excerpt: String,
}

/// Events the server pushes to the page.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    State { value: ViewState },
    /// The question the input box should show.
    ActiveQuestion { question: String },
    /// Full visible answer buffer after one more streamed chunk.
    AnswerChunk { text: String },
    AnswerComplete { text: String },
    Sources { items: Vec<SourceExcerpt> },
    History { items: Vec<HistoryEntry> },
    Notice { message: String },
    Error { message: String },
}

impl ServerEvent {
    pub fn state(value: ViewState) -> Self {
        ServerEvent::State { value }
    }

    /// Snapshot of the sidebar: most-recent-first, 1-based indices,
    /// truncated labels.
    pub fn history_snapshot(session: &SessionContext) -> Self {
        let items = session
            .entries()
            .enumerate()
            .map(|(i, question)| HistoryEntry {
                index: i + 1,
                label: view::history_label(question),
                question: question.to_string(),
            })
            .collect();
        ServerEvent::History { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse() {
        let ask: ClientMessage =
            serde_json::from_str(r#"{"type":"ask","question":"what is spalling?"}"#).unwrap();
        assert!(matches!(ask, ClientMessage::Ask { question } if question == "what is spalling?"));

        let select: ClientMessage =
            serde_json::from_str(r#"{"type":"select_history","index":2}"#).unwrap();
        assert!(matches!(select, ClientMessage::SelectHistory { index: 2 }));

        let clear: ClientMessage = serde_json::from_str(r#"{"type":"clear_history"}"#).unwrap();
        assert!(matches!(clear, ClientMessage::ClearHistory));
    }

    #[test]
    fn server_events_serialize_with_a_type_tag() {
        let json =
            serde_json::to_value(ServerEvent::state(ViewState::AwaitingAnswer)).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["value"], "awaiting_answer");

        let json = serde_json::to_value(ServerEvent::AnswerChunk {
            text: "partial".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "answer_chunk");
        assert_eq!(json["text"], "partial");
    }

    #[test]
    fn history_snapshot_is_most_recent_first() {
        let mut session = SessionContext::new();
        session.add("a");
        session.add("b");

        let ServerEvent::History { items } = ServerEvent::history_snapshot(&session) else {
            panic!("expected history event");
        };

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 1);
        assert_eq!(items[0].question, "b");
        assert_eq!(items[1].index, 2);
        assert_eq!(items[1].question, "a");
    }
}
