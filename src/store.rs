//! Corpus store access and the two lookup queries
//!
//! `CorpusStore` is an explicit capability around the bundled SQLite file:
//! callers hold one and pass it where lookups happen, so the dependency is
//! visible at every call site. Opening the store verifies the corpus table
//! is actually there; every query then runs on a fresh read-only connection.

use crate::error::LexicaError;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Token table shipped inside the corpus database.
pub(crate) const TOKEN_TABLE: &str = "macula_greek_sblgnt";

/// Fixed cap on word-candidate results.
pub const WORD_LIMIT: usize = 10;

/// Default page size for verse assembly.
pub const DEFAULT_VERSE_PAGE: usize = 25;

/// A distinct surface form matching the current query substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
}

/// One verse, reference trimmed to its canonical segment, text rebuilt
/// from the verse's tokens in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    #[serde(rename = "ref")]
    pub reference: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub tokens: i64,
    pub distinct_words: i64,
    pub verses: i64,
}

/// Lookup seam between the view-state and the corpus store. The session
/// depends on this trait; tests substitute it.
pub trait Lookup: Send + Sync {
    fn find_words(&self, partial: &str) -> Result<Vec<Word>, LexicaError>;

    fn find_verses(
        &self,
        word: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Verse>, LexicaError>;
}

#[derive(Debug)]
pub struct CorpusStore {
    db_path: PathBuf,
}

impl CorpusStore {
    /// Open the store, verifying the database file and corpus table exist.
    /// This is the readiness gate: everything downstream may assume the
    /// table is queryable.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, LexicaError> {
        let db_path = db_path.into();
        if !db_path.exists() {
            return Err(LexicaError::CorpusNotReady(format!(
                "database file not found at {}",
                db_path.display()
            )));
        }

        let store = Self { db_path };
        let conn = store.connect()?;
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            [TOKEN_TABLE],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(LexicaError::CorpusNotReady(format!(
                "table {TOKEN_TABLE} missing from {}",
                store.db_path.display()
            )));
        }

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Each call gets its own read-only connection.
    fn connect(&self) -> Result<Connection, LexicaError> {
        Ok(Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    pub fn stats(&self) -> Result<CorpusStats, LexicaError> {
        let conn = self.connect()?;
        let tokens = conn.query_row(
            &format!("SELECT COUNT(*) FROM {TOKEN_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        let distinct_words = conn.query_row(
            &format!("SELECT COUNT(DISTINCT text) FROM {TOKEN_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        let verses = conn.query_row(
            &format!("SELECT COUNT(DISTINCT substr(id, 1, 8)) FROM {TOKEN_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(CorpusStats {
            tokens,
            distinct_words,
            verses,
        })
    }
}

impl Lookup for CorpusStore {
    /// Up to [`WORD_LIMIT`] distinct surface forms whose normalized form
    /// contains `partial`. The caller supplies the substring already
    /// lowercased; LIKE metacharacters are passed through unescaped.
    fn find_words(&self, partial: &str) -> Result<Vec<Word>, LexicaError> {
        if partial.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(partial, "finding words");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT text FROM {TOKEN_TABLE} WHERE text_nfd LIKE ?1 LIMIT {WORD_LIMIT}"
        ))?;
        let pattern = format!("%{partial}%");
        let words = stmt
            .query_map([&pattern], |row| Ok(Word { text: row.get(0)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(words)
    }

    /// One row per verse containing at least one token whose surface form
    /// equals `word`, text rebuilt by concatenating every token of the verse
    /// (surface form plus trailing separator) in ascending id order.
    fn find_verses(
        &self,
        word: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Verse>, LexicaError> {
        if word.is_empty() {
            return Err(LexicaError::InvalidQuery(
                "verse lookup requires a word".to_string(),
            ));
        }
        tracing::debug!(word, limit, offset, "finding verses");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "WITH matching_verses AS (
                 SELECT DISTINCT substr(id, 1, 9) AS verse_id
                 FROM {TOKEN_TABLE}
                 WHERE text = ?1
             )
             SELECT m.ref,
                    GROUP_CONCAT(m.text || COALESCE(m.after, ''), '' ORDER BY m.id) AS text
             FROM {TOKEN_TABLE} m
             JOIN matching_verses mv ON substr(m.id, 1, 9) = mv.verse_id
             GROUP BY substr(m.id, 1, 8)
             ORDER BY m.id
             LIMIT ?2 OFFSET ?3"
        ))?;
        let verses = stmt
            .query_map(
                rusqlite::params![word, limit as i64, offset as i64],
                |row| {
                    let reference: String = row.get(0)?;
                    let text: String = row.get(1)?;
                    Ok(Verse {
                        reference: canonical_ref(&reference),
                        text,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(verses)
    }
}

/// First `!`-delimited segment of a token reference.
fn canonical_ref(reference: &str) -> String {
    reference
        .split('!')
        .next()
        .unwrap_or(reference)
        .to_string()
}
