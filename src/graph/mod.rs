//! Entity graph: canonical entities, typed relations between them, and the
//! mention links that tie a memory to the entities it references (spec §4.7).

use chrono::Utc;
use libsql::{Connection, params};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AccessorError, GraphError};

#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub canonical_name: String,
    pub entity_type: String,
    pub mention_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Relation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: String,
    pub strength: f64,
    pub confidence: f64,
    pub mention_count: i64,
}

/// Case-fold and collapse whitespace, but keep punctuation (spec §4.7):
/// "Dr. Smith" and "dr.  smith" canonicalise to the same entity, "Smith's"
/// stays distinct from "Smith".
pub fn canonicalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = false;
    for ch in name.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    out
}

/// Find-or-create an entity by canonical name, returning its id.
pub async fn upsert_entity(conn: &Connection, name: &str, entity_type: &str) -> Result<String, GraphError> {
    let canonical = canonicalize_name(name);
    let now = Utc::now().to_rfc3339();

    let mut rows = conn
        .query("SELECT id FROM entities WHERE canonical_name = ?1", params![canonical.clone()])
        .await
        .map_err(AccessorError::from)?;
    if let Some(row) = rows.next().await.map_err(AccessorError::from)? {
        let id: String = row.get(0).map_err(|e| GraphError::Database(e.into()))?;
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO entities (id, name, canonical_name, entity_type, mention_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![id.clone(), name, canonical, entity_type, now],
    )
    .await
    .map_err(AccessorError::from)?;
    Ok(id)
}

/// Link a memory to an entity with the text it was mentioned as, bumping
/// the entity's mention count. A repeat link for the same (memory, entity)
/// pair is a no-op on the count (spec §4.7 "distinct memories referencing it").
pub async fn link_mention(
    conn: &Connection,
    memory_id: &str,
    entity_id: &str,
    mention_text: &str,
    confidence: f64,
) -> Result<(), GraphError> {
    let now = Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO memory_entity_mentions (memory_id, entity_id, mention_text, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![memory_id, entity_id, mention_text, confidence, now.clone()],
        )
        .await
        .map_err(AccessorError::from)?;
    if inserted > 0 {
        conn.execute(
            "UPDATE entities SET mention_count = mention_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now, entity_id],
        )
        .await
        .map_err(AccessorError::from)?;
    }
    Ok(())
}

/// Upsert a relation keyed by `(source, target, relation_type)`. On repeat,
/// increment mention count and keep the higher observed confidence (spec §4.7).
pub async fn upsert_relation(
    conn: &Connection,
    source_entity_id: &str,
    target_entity_id: &str,
    relation_type: &str,
    confidence: f64,
) -> Result<String, GraphError> {
    let now = Utc::now().to_rfc3339();

    let mut rows = conn
        .query(
            "SELECT id, confidence FROM relations WHERE source_entity_id = ?1 AND target_entity_id = ?2 AND relation_type = ?3",
            params![source_entity_id, target_entity_id, relation_type],
        )
        .await
        .map_err(AccessorError::from)?;
    if let Some(row) = rows.next().await.map_err(AccessorError::from)? {
        let id: String = row.get(0).map_err(|e| GraphError::Database(e.into()))?;
        let existing_confidence: f64 = row.get(1).map_err(|e| GraphError::Database(e.into()))?;
        conn.execute(
            "UPDATE relations SET mention_count = mention_count + 1, confidence = ?1, updated_at = ?2 WHERE id = ?3",
            params![confidence.max(existing_confidence), now, id.clone()],
        )
        .await
        .map_err(AccessorError::from)?;
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO relations
            (id, source_entity_id, target_entity_id, relation_type, strength, confidence, mention_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1.0, ?5, 1, ?6, ?6)",
        params![id.clone(), source_entity_id, target_entity_id, relation_type, confidence, now],
    )
    .await
    .map_err(AccessorError::from)?;
    Ok(id)
}

/// Remove `memory_id`'s mention links and delete any entity whose mention
/// count drops to zero as a result, in the caller's transaction (spec §4.7
/// "Orphan cleanup", invoked by the retention sweep).
pub async fn unlink_memory(conn: &Connection, memory_id: &str) -> Result<OrphanCleanup, GraphError> {
    let mut rows = conn
        .query("SELECT entity_id FROM memory_entity_mentions WHERE memory_id = ?1", params![memory_id])
        .await
        .map_err(AccessorError::from)?;
    let mut entity_ids = Vec::new();
    while let Some(row) = rows.next().await.map_err(AccessorError::from)? {
        entity_ids.push(row.get::<String>(0).map_err(|e| GraphError::Database(e.into()))?);
    }

    let links_purged = conn
        .execute("DELETE FROM memory_entity_mentions WHERE memory_id = ?1", params![memory_id])
        .await
        .map_err(AccessorError::from)? as i64;

    let mut entities_orphaned = 0i64;
    for entity_id in &entity_ids {
        conn.execute(
            "UPDATE entities SET mention_count = mention_count - 1 WHERE id = ?1",
            params![entity_id.clone()],
        )
        .await
        .map_err(AccessorError::from)?;
        let removed = conn
            .execute("DELETE FROM entities WHERE id = ?1 AND mention_count <= 0", params![entity_id.clone()])
            .await
            .map_err(AccessorError::from)?;
        if removed > 0 {
            entities_orphaned += 1;
        }
    }

    Ok(OrphanCleanup { links_purged, entities_orphaned })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrphanCleanup {
    pub links_purged: i64,
    pub entities_orphaned: i64,
}

/// Entities linked to a memory, used by the recall engine's graph-boost leg
/// to find entities a candidate shares with the rest of the pool (spec §4.6).
pub async fn entities_for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<String>, GraphError> {
    let mut rows = conn
        .query("SELECT entity_id FROM memory_entity_mentions WHERE memory_id = ?1", params![memory_id])
        .await
        .map_err(AccessorError::from)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(AccessorError::from)? {
        out.push(row.get(0).map_err(|e| GraphError::Database(e.into()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case_and_whitespace() {
        assert_eq!(canonicalize_name("Dr.   Smith"), "dr. smith");
        assert_eq!(canonicalize_name("  ACME Corp "), "acme corp");
    }

    #[test]
    fn preserves_punctuation() {
        assert_ne!(canonicalize_name("Smith's"), canonicalize_name("Smith"));
    }
}
