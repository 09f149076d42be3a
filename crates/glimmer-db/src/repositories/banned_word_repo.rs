//! Repository for the `banned_words` table.
//!
//! Uniqueness and lookups are case-insensitive: the primary key carries
//! `COLLATE NOCASE`, so plain equality comparisons follow the column
//! collation.

use glimmer_core::types::now_ms;

use crate::models::banned_word::BannedWord;
use crate::DbPool;

pub struct BannedWordRepo;

impl BannedWordRepo {
    /// Add a word. Returns `false` when an entry with the same word (any
    /// casing) already exists.
    pub async fn add(
        pool: &DbPool,
        word: &str,
        partial: bool,
        added_by: &str,
    ) -> Result<bool, sqlx::Error> {
        let inserted = sqlx::query(
            "INSERT INTO banned_words (word, partial, added_by, added_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(word) DO NOTHING",
        )
        .bind(word)
        .bind(partial)
        .bind(added_by)
        .bind(now_ms())
        .execute(pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Remove a word, matching case-insensitively. Returns `false` when no
    /// entry matched.
    pub async fn remove(pool: &DbPool, word: &str) -> Result<bool, sqlx::Error> {
        let removed = sqlx::query("DELETE FROM banned_words WHERE word = ?")
            .bind(word)
            .execute(pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    /// All entries, alphabetically.
    pub async fn list(pool: &DbPool) -> Result<Vec<BannedWord>, sqlx::Error> {
        sqlx::query_as::<_, BannedWord>(
            "SELECT word, partial, added_by, added_at FROM banned_words ORDER BY word",
        )
        .fetch_all(pool)
        .await
    }
}
