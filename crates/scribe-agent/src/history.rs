//! History persistence seam

use scribe_ai::Turn;

use crate::error::Result;

/// Stores conversations by id. Implementations live outside the core.
pub trait HistoryStore: Send + Sync {
    /// Turns of conversation `id`; an unknown id yields an empty history
    fn load_history(&self, id: &str) -> Result<Vec<Turn>>;

    /// Persist `turns` under `id` and return the conversation title
    fn save_history(&self, id: &str, turns: &[Turn]) -> Result<String>;
}
