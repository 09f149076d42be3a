//! Banned-word entity.

use serde::Serialize;
use sqlx::FromRow;

use glimmer_core::guard::BannedEntry;
use glimmer_core::types::TimestampMs;

/// A row from the `banned_words` table. `word` is unique
/// case-insensitively; `partial` selects substring matching over
/// whole-word matching.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct BannedWord {
    pub word: String,
    pub partial: bool,
    pub added_by: String,
    pub added_at: TimestampMs,
}

impl BannedWord {
    /// The matcher's view of this row.
    pub fn to_entry(&self) -> BannedEntry {
        BannedEntry {
            word: self.word.clone(),
            partial: self.partial,
        }
    }
}
