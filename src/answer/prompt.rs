//! Prompt construction for the completion call.

use crate::index::engine::RetrievedPassage;
use crate::llm::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are an expert mining engineering assistant. \
Answer in technical, professional language, grounding your response in the provided context.";

/// Fixed text shown when retrieval produced nothing usable.
pub const INSUFFICIENT_CONTEXT: &str =
    "The indexed documents do not contain enough information to answer this question.";

/// Concatenates the retrieved passages into the context block of the user
/// message.
pub fn build_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The system + user message pair sent to the completion endpoint.
pub fn build_messages(context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion:\n{}",
            context, question
        )),
    ]
}
