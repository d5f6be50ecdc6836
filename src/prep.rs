//! Corpus preparation
//!
//! Build-time tooling that derives the normalized matching column from the
//! surface forms. Runs against a writable copy of the database; the search
//! path never writes.

use crate::error::LexicaError;
use crate::store::TOKEN_TABLE;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// NFD-decompose, drop combining marks, lowercase. This is the matching
/// form stored in `text_nfd`: "Χριστός" becomes "χριστος".
pub fn fold_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Add the `text_nfd` column when missing and fill it from the surface
/// form. Idempotent; safe to rerun after corpus updates.
pub fn populate_text_nfd(db_path: &Path) -> Result<usize, LexicaError> {
    let conn = open_existing(db_path)?;
    register_fold(&conn)?;

    let has_column: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM pragma_table_info('{TOKEN_TABLE}') WHERE name = 'text_nfd'"
        ),
        [],
        |row| row.get(0),
    )?;
    if has_column == 0 {
        conn.execute(
            &format!("ALTER TABLE {TOKEN_TABLE} ADD COLUMN text_nfd TEXT"),
            [],
        )?;
    }

    let updated = conn.execute(
        &format!("UPDATE {TOKEN_TABLE} SET text_nfd = fold_diacritics(text)"),
        [],
    )?;
    tracing::info!(updated, "text_nfd populated");
    Ok(updated)
}

/// Convenience view exposing the diacritic-free form next to each raw row.
pub fn create_diacritic_free_view(db_path: &Path) -> Result<(), LexicaError> {
    let conn = open_existing(db_path)?;
    conn.execute_batch(&format!(
        "CREATE VIEW IF NOT EXISTS {TOKEN_TABLE}_normalized AS
         SELECT *, text_nfd AS text_no_diacritics
         FROM {TOKEN_TABLE};"
    ))?;
    Ok(())
}

/// Opening a missing path would silently create an empty database; refuse
/// instead so a bad `--db` argument surfaces as a readiness error.
fn open_existing(db_path: &Path) -> Result<Connection, LexicaError> {
    if !db_path.exists() {
        return Err(LexicaError::CorpusNotReady(format!(
            "database file not found at {}",
            db_path.display()
        )));
    }
    Ok(Connection::open(db_path)?)
}

fn register_fold(conn: &Connection) -> Result<(), LexicaError> {
    conn.create_scalar_function(
        "fold_diacritics",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold_diacritics(&t)))
        },
    )?;
    Ok(())
}
