//! Keyword leg of recall: BM25-equivalent ranking over `memories_fts`
//! (spec §4.5, §4.6). The virtual table and its sync triggers live in
//! `db::schema`; this module only ever queries it.

use libsql::{Connection, params};

use crate::error::AccessorError;

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub memory_id: String,
    /// fts5 `rank` is negative-is-better; this is negated so higher means
    /// more relevant, matching the other scorers' convention.
    pub score: f64,
}

/// Rank live, non-empty-query matches by BM25. Soft-deleted memories never
/// surface here because `memories_fts` mirrors only what's visible through
/// the triggers — callers still must filter `is_deleted` at the candidate
/// stage since the FTS row itself does not track deletion.
pub async fn keyword_search(conn: &Connection, query: &str, limit: i64) -> Result<Vec<KeywordHit>, AccessorError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let fts_query = escape_fts_query(query);

    let mut rows = conn
        .query(
            "SELECT m.id, bm25(memories_fts) AS rank
             FROM memories_fts
             JOIN memories m ON m.rowid = memories_fts.rowid
             WHERE memories_fts MATCH ?1 AND m.is_deleted = 0
             ORDER BY rank
             LIMIT ?2",
            params![fts_query, limit],
        )
        .await?;

    let mut hits = Vec::new();
    while let Some(row) = rows.next().await? {
        let memory_id: String = row.get(0)?;
        let rank: f64 = row.get(1)?;
        hits.push(KeywordHit { memory_id, score: -rank });
    }
    Ok(hits)
}

/// Quote each whitespace-separated term so punctuation inside the query
/// (apostrophes, hyphens) can't be misread as FTS5 query syntax.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_joins_terms() {
        assert_eq!(escape_fts_query("dark mode"), "\"dark\" \"mode\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn empty_query_escapes_to_empty() {
        assert_eq!(escape_fts_query(""), "");
    }
}
