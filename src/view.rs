//! Presentation formatting shared by the WS protocol and the page.

use serde::Serialize;

/// Character budget for one rendered source excerpt.
pub const EXCERPT_BUDGET: usize = 300;

/// Prefix length for history sidebar labels.
pub const HISTORY_LABEL_PREFIX: usize = 50;

pub const ELLIPSIS: &str = "…";

/// View state of the single-question interaction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    Idle,
    AwaitingAnswer,
    ShowingAnswer,
    ShowingError,
}

/// Flattens embedded line breaks to spaces and truncates to the excerpt
/// budget, appending an ellipsis when anything was cut.
pub fn excerpt(text: &str) -> String {
    truncate_flat(text, EXCERPT_BUDGET)
}

/// Sidebar label for a history entry: the question's leading characters.
pub fn history_label(question: &str) -> String {
    truncate_flat(question, HISTORY_LABEL_PREFIX)
}

fn truncate_flat(text: &str, budget: usize) -> String {
    let flat: String = text
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    if flat.chars().count() <= budget {
        return flat;
    }

    let mut out: String = flat.chars().take(budget).collect();
    out.push_str(ELLIPSIS);
    out
}
