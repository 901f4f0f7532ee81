//! Vector leg of recall: nearest-neighbour lookup over libsql's native
//! `F32_BLOB` vector index, with graceful absence when the host build lacks
//! the extension (spec §4.1 `vector_index`, §4.5, §4.6).

use libsql::{Connection, params};

use crate::db::schema::DEFAULT_VECTOR_DIM;
use crate::error::AccessorError;

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub content_hash: String,
    pub memory_id: String,
    /// Cosine similarity, higher is better.
    pub score: f64,
}

/// Whether `try_create_vector_index` succeeded on this database, cached in
/// `engine_settings` at migration time so hot paths never probe for it.
pub async fn vector_available(conn: &Connection) -> Result<bool, AccessorError> {
    let mut rows = conn
        .query("SELECT value FROM engine_settings WHERE key = 'vector_available'", ())
        .await?;
    match rows.next().await? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value == "1")
        }
        None => Ok(false),
    }
}

/// Store (or replace) the embedding for `content_hash` and mirror it into
/// the ANN index, plus a row in `embeddings` carrying provenance (spec §4.5
/// "Embedding chunks are produced by ... the embed job" / "document worker").
pub async fn upsert_embedding(
    conn: &Connection,
    content_hash: &str,
    vector: &[f32],
    source_type: &str,
    source_id: &str,
    chunk_text: &str,
) -> Result<(), AccessorError> {
    use chrono::Utc;
    use uuid::Uuid;

    let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
    let now = Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO embeddings (id, content_hash, vector, dimensions, source_type, source_id, chunk_text, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(content_hash) DO UPDATE SET
            vector = excluded.vector, dimensions = excluded.dimensions,
            source_type = excluded.source_type, source_id = excluded.source_id,
            chunk_text = excluded.chunk_text",
        params![id, content_hash, bytes.clone(), vector.len() as i64, source_type, source_id, chunk_text, now],
    )
    .await?;

    if vector_available(conn).await? {
        let vector_literal = vector32_literal(vector);
        let sql = format!(
            "INSERT INTO vector_index (content_hash, embedding) VALUES (?1, vector32('{vector_literal}'))
             ON CONFLICT(content_hash) DO UPDATE SET embedding = excluded.embedding"
        );
        // Best-effort: the embeddings row above is the durable source of
        // truth; the ANN index is a derived accelerator.
        let _ = conn.execute(&sql, params![content_hash]).await;
    }
    Ok(())
}

/// Nearest neighbours to `query_vector`, joined back to the owning memory
/// through `embeddings.source_id` (embed jobs key by memory id; document
/// chunks key by their own memory row, spec §4.5).
pub async fn nearest_neighbors(conn: &Connection, query_vector: &[f32], limit: i64) -> Result<Vec<VectorHit>, AccessorError> {
    if !vector_available(conn).await? || query_vector.len() != DEFAULT_VECTOR_DIM {
        return Ok(Vec::new());
    }
    let vector_literal = vector32_literal(query_vector);
    let sql = format!(
        "SELECT e.content_hash, e.source_id, 1.0 - vector_distance_cos(v.embedding, vector32('{vector_literal}')) AS score
         FROM vector_index v
         JOIN embeddings e ON e.content_hash = v.content_hash
         ORDER BY vector_distance_cos(v.embedding, vector32('{vector_literal}'))
         LIMIT ?1"
    );
    let mut rows = conn.query(&sql, params![limit]).await?;
    let mut hits = Vec::new();
    while let Some(row) = rows.next().await? {
        hits.push(VectorHit {
            content_hash: row.get(0)?,
            memory_id: row.get(1)?,
            score: row.get(2)?,
        });
    }
    Ok(hits)
}

fn vector32_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_vector_literal() {
        assert_eq!(vector32_literal(&[1.0, 0.5, -2.0]), "[1,0.5,-2]");
    }
}
