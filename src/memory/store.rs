//! Memory Store: CRUD over memory records with idempotency, versioning,
//! soft-delete, and history (spec §4.3).

use std::sync::Arc;

use chrono::Utc;
use libsql::{Connection, params};
use uuid::Uuid;

use crate::config::ConfigHandle;
use crate::db::Accessor;
use crate::error::{AccessorError, StoreError};
use crate::jobs::{JobType, Queue};
use crate::memory::history::{self, ActorType, ChangeContext, EventKind};
use crate::memory::model::{
    self, BatchItemResult, BatchItemStatus, ExtractionStatus, Memory, ModifyPatch, RememberOptions,
    RememberOutcome,
};
use crate::signing::{self, Signer};

pub struct MemoryStore {
    accessor: Arc<Accessor>,
    jobs: Arc<Queue>,
    config: Arc<ConfigHandle>,
    signer: Option<Arc<dyn Signer>>,
}

impl MemoryStore {
    pub fn new(
        accessor: Arc<Accessor>,
        jobs: Arc<Queue>,
        config: Arc<ConfigHandle>,
        signer: Option<Arc<dyn Signer>>,
    ) -> Self {
        Self { accessor, jobs, config, signer }
    }

    /// Create a memory, or return the existing row's id if an equivalent one
    /// already exists (spec §4.3 `remember`).
    pub async fn remember(
        &self,
        content: &str,
        opts: RememberOptions,
        ctx: ChangeContext,
    ) -> Result<RememberOutcome, StoreError> {
        let cfg = self.config.current().await;
        if !cfg.writes_allowed() {
            return Err(StoreError::Forbidden);
        }

        let normalized = model::normalize_content(content);
        if normalized.is_empty() {
            return Err(StoreError::InvalidPayload("content must not be empty after normalization".into()));
        }
        let hash = model::content_hash(&normalized);
        let tags = model::normalize_tags(&opts.tags.clone().unwrap_or_default());

        let idempotency_key = opts.idempotency_key.clone();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        // Signing happens pre-transaction (spec §4.4): the canonical payload
        // is built from fields already fixed at this point, so the signature
        // itself never needs to enter the write transaction's retry path.
        // A signing failure is non-fatal — the memory is still stored unsigned.
        let mut signature = None;
        let mut signer_did = None;
        if opts.auto_sign.unwrap_or(false) {
            if let Some(signer) = &self.signer {
                if let Some(did) = signer.did().await {
                    if let Ok(canonical) = signing::canonical_payload_v2(&id, &hash, &now, &did) {
                        if let Ok((sig, did)) = signer.sign(&canonical).await {
                            signature = Some(sig);
                            signer_did = Some(did);
                        }
                    }
                }
            }
        }
        let kind = opts.kind.clone().unwrap_or_else(|| "fact".to_string());
        let importance = opts.importance.unwrap_or(0.5).clamp(0.0, 1.0);
        let confidence = opts.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        let who = opts.who.clone();
        let project = opts.project.clone();
        let pinned = opts.pinned.unwrap_or(false);
        let runtime_path = opts.runtime_path.clone();
        let source_type = opts.source_type.clone();
        let source_path = opts.source_path.clone();
        let source_section = opts.source_section.clone();
        let source_id = opts.source_id.clone();
        let shadow_mode = cfg.shadow_mode;
        let jobs = Arc::clone(&self.jobs);

        let normalized_for_tx = normalized.clone();
        let ctx_for_tx = ctx.clone();

        let outcome = self
            .accessor
            .with_write_tx::<RememberOutcome, StoreError, _>(move |conn| {
                Box::pin(async move {
                    if let Some(key) = &idempotency_key {
                        if let Some(existing) = find_by_idempotency_key(conn, key).await? {
                            return Ok(RememberOutcome {
                                id: existing,
                                version: 0,
                                embedded: false,
                                deduped: true,
                            });
                        }
                    }

                    if let Some(existing_id) = find_live_by_hash(conn, &hash).await? {
                        merge_duplicate(conn, &existing_id, &tags, importance, &now).await?;
                        return Ok(RememberOutcome {
                            id: existing_id,
                            version: 0,
                            embedded: false,
                            deduped: true,
                        });
                    }

                    conn.execute(
                        "INSERT INTO memories
                            (id, content, type, importance, confidence, tags, who, project, pinned,
                             is_deleted, content_hash, idempotency_key, runtime_path, signature, signer_did,
                             version, created_at, updated_at, source_type, source_path, source_section, source_id,
                             access_count, extraction_status)
                         VALUES
                            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, ?12, ?13, ?14,
                             1, ?15, ?15, ?16, ?17, ?18, ?19, 0, 'none')",
                        params![
                            id.clone(),
                            normalized_for_tx.clone(),
                            kind,
                            importance,
                            confidence,
                            model::join_tags(&tags),
                            who,
                            project,
                            pinned,
                            hash,
                            idempotency_key,
                            runtime_path,
                            signature,
                            signer_did,
                            now.clone(),
                            source_type,
                            source_path,
                            source_section,
                            source_id,
                        ],
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    history::append(
                        conn,
                        &id,
                        EventKind::Created,
                        None,
                        Some(&normalized_for_tx),
                        None,
                        &ctx_for_tx,
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    Ok(RememberOutcome { id, version: 1, embedded: false, deduped: false })
                })
            })
            .await?;

        if !outcome.deduped && !shadow_mode {
            let _ = jobs
                .enqueue(JobType::Embed, Some(outcome.id.clone()), serde_json::json!({}), 3)
                .await;
            let _ = jobs
                .enqueue(JobType::Extract, Some(outcome.id.clone()), serde_json::json!({}), 3)
                .await;
        }

        Ok(outcome)
    }

    /// Apply a sparse patch (spec §4.3 `modify`).
    pub async fn modify(
        &self,
        id: &str,
        patch: ModifyPatch,
        reason: Option<String>,
        if_version: Option<i64>,
        ctx: ChangeContext,
    ) -> Result<i64, StoreError> {
        let cfg = self.config.current().await;
        if !cfg.update_delete_allowed() {
            return Err(StoreError::Forbidden);
        }
        if patch.is_empty() {
            let current = self.get(id).await?;
            return Ok(current.version);
        }

        let id = id.to_string();
        let jobs = Arc::clone(&self.jobs);
        let shadow_mode = cfg.shadow_mode;

        let (new_version, content_changed, new_id) = self
            .accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let current = load_row(conn, &id).await?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                    if let Some(expected) = if_version {
                        if expected != current.version {
                            return Err(StoreError::VersionConflict {
                                id: id.clone(),
                                expected,
                                actual: current.version,
                            });
                        }
                    }
                    if current.is_deleted {
                        return Err(StoreError::Deleted { id: id.clone() });
                    }

                    let new_content = patch.content.as_deref().map(model::normalize_content);
                    let content_changed = new_content.as_deref().is_some_and(|c| c != current.content);
                    let new_hash = new_content.as_deref().map(model::content_hash);

                    let kind = patch.kind.clone().unwrap_or(current.kind.clone());
                    let importance = patch.importance.unwrap_or(current.importance).clamp(0.0, 1.0);
                    let confidence = patch.confidence.unwrap_or(current.confidence).clamp(0.0, 1.0);
                    let tags = patch
                        .tags
                        .as_ref()
                        .map(|t| model::normalize_tags(t))
                        .unwrap_or(current.tags.clone());
                    let who = patch.who.clone().or(current.who.clone());
                    let project = patch.project.clone().or(current.project.clone());
                    let pinned = patch.pinned.unwrap_or(current.pinned);
                    let new_version = current.version + 1;
                    let now = Utc::now().to_rfc3339();
                    let content_for_row = new_content.clone().unwrap_or(current.content.clone());
                    let extraction_status = if content_changed {
                        ExtractionStatus::None.as_str()
                    } else {
                        current.extraction_status.as_str()
                    };

                    conn.execute(
                        "UPDATE memories SET content = ?1, type = ?2, importance = ?3, confidence = ?4, tags = ?5,
                            who = ?6, project = ?7, pinned = ?8, version = ?9, updated_at = ?10,
                            content_hash = COALESCE(?11, content_hash), extraction_status = ?12,
                            embedding_model = CASE WHEN ?13 THEN NULL ELSE embedding_model END
                         WHERE id = ?14",
                        params![
                            content_for_row.clone(),
                            kind,
                            importance,
                            confidence,
                            model::join_tags(&tags),
                            who,
                            project,
                            pinned,
                            new_version,
                            now,
                            new_hash,
                            extraction_status,
                            content_changed,
                            id.clone(),
                        ],
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    history::append(
                        conn,
                        &id,
                        EventKind::Updated,
                        Some(&current.content),
                        Some(&content_for_row),
                        reason.as_deref(),
                        &ctx,
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    Ok((new_version, content_changed, id.clone()))
                })
            })
            .await?;

        if content_changed && !shadow_mode {
            let _ = jobs.enqueue(JobType::Embed, Some(new_id), serde_json::json!({}), 3).await;
        }

        Ok(new_version)
    }

    /// Soft-delete a memory (spec §4.3 `forget`).
    pub async fn forget(
        &self,
        id: &str,
        reason: Option<String>,
        force: bool,
        if_version: Option<i64>,
        ctx: ChangeContext,
    ) -> Result<i64, StoreError> {
        let cfg = self.config.current().await;
        if !cfg.update_delete_allowed() {
            return Err(StoreError::Forbidden);
        }
        let id = id.to_string();

        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let current = load_row(conn, &id).await?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                    if let Some(expected) = if_version {
                        if expected != current.version {
                            return Err(StoreError::VersionConflict {
                                id: id.clone(),
                                expected,
                                actual: current.version,
                            });
                        }
                    }
                    if current.is_deleted {
                        return Err(StoreError::Deleted { id: id.clone() });
                    }
                    if current.pinned && !force {
                        return Err(StoreError::PinnedRequiresForce { id: id.clone() });
                    }

                    let new_version = current.version + 1;
                    let now = Utc::now().to_rfc3339();
                    conn.execute(
                        "UPDATE memories SET is_deleted = 1, deleted_at = ?1, version = ?2, updated_at = ?1
                         WHERE id = ?3",
                        params![now, new_version, id.clone()],
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    history::append(conn, &id, EventKind::Deleted, Some(&current.content), None, reason.as_deref(), &ctx)
                        .await
                        .map_err(AccessorError::from)?;

                    Ok(new_version)
                })
            })
            .await
    }

    /// Undelete a still-retained tombstone (spec §4.3 `recover`).
    pub async fn recover(
        &self,
        id: &str,
        reason: Option<String>,
        if_version: Option<i64>,
        ctx: ChangeContext,
    ) -> Result<i64, StoreError> {
        let cfg = self.config.current().await;
        if !cfg.update_delete_allowed() {
            return Err(StoreError::Forbidden);
        }
        let id = id.to_string();

        self.accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    let current = load_row(conn, &id).await?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                    if let Some(expected) = if_version {
                        if expected != current.version {
                            return Err(StoreError::VersionConflict {
                                id: id.clone(),
                                expected,
                                actual: current.version,
                            });
                        }
                    }
                    if !current.is_deleted {
                        return Ok(current.version);
                    }

                    let new_version = current.version + 1;
                    let now = Utc::now().to_rfc3339();
                    conn.execute(
                        "UPDATE memories SET is_deleted = 0, deleted_at = NULL, version = ?1, updated_at = ?2
                         WHERE id = ?3",
                        params![new_version, now, id.clone()],
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    history::append(
                        conn,
                        &id,
                        EventKind::Recovered,
                        None,
                        Some(&current.content),
                        reason.as_deref(),
                        &ctx,
                    )
                    .await
                    .map_err(AccessorError::from)?;

                    Ok(new_version)
                })
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Memory, StoreError> {
        let id_for_lookup = id.to_string();
        let id_for_err = id.to_string();
        let found = self
            .accessor
            .with_read(move |conn| async move { load_row(&conn, &id_for_lookup).await })
            .await
            .map_err(StoreError::Database)?;
        found.ok_or(StoreError::NotFound { id: id_for_err })
    }

    /// Record an access for recency/frequency scoring (spec §3 access_count,
    /// last_accessed). Best-effort: failures are logged, never surfaced.
    pub async fn touch_access(&self, id: &str) {
        let id = id.to_string();
        let result = self
            .accessor
            .with_write_tx(move |conn| {
                Box::pin(async move {
                    conn.execute(
                        "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                        params![Utc::now().to_rfc3339(), id],
                    )
                    .await
                    .map_err(AccessorError::from)
                })
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to record memory access touch");
        }
    }

    pub async fn list(&self, filter: ListFilter) -> Result<Vec<Memory>, StoreError> {
        self.accessor
            .with_read(move |conn| async move { list_rows(&conn, &filter).await.map_err(AccessorError::from) })
            .await
            .map_err(StoreError::Database)
    }

    /// Newest-first history events for a memory (spec §6 `GET /api/memory/:id/history`).
    pub async fn history(&self, id: &str) -> Result<Vec<history::HistoryEvent>, StoreError> {
        let id = id.to_string();
        self.accessor
            .with_read(move |conn| async move { history::list_for_memory(&conn, &id).await.map_err(AccessorError::from) })
            .await
            .map_err(StoreError::Database)
    }

    pub async fn batch_modify(&self, ids: Vec<String>, patch: ModifyPatch, reason: Option<String>, ctx: ChangeContext) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.modify(&id, patch.clone(), reason.clone(), None, ctx.clone()).await;
            results.push(match outcome {
                Ok(version) => BatchItemResult { id, status: BatchItemStatus::Updated, version: Some(version) },
                Err(StoreError::NotFound { .. }) => BatchItemResult { id, status: BatchItemStatus::NotFound, version: None },
                Err(StoreError::VersionConflict { actual, .. }) => {
                    BatchItemResult { id, status: BatchItemStatus::VersionConflict, version: Some(actual) }
                }
                Err(StoreError::Deleted { .. }) => BatchItemResult { id, status: BatchItemStatus::NotFound, version: None },
                Err(StoreError::Forbidden) => BatchItemResult { id, status: BatchItemStatus::Forbidden, version: None },
                Err(_) => BatchItemResult { id, status: BatchItemStatus::NotFound, version: None },
            });
        }
        results
    }

    pub async fn batch_forget(&self, ids: Vec<String>, reason: Option<String>, force: bool, ctx: ChangeContext) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.forget(&id, reason.clone(), force, None, ctx.clone()).await;
            results.push(match outcome {
                Ok(version) => BatchItemResult { id, status: BatchItemStatus::Deleted, version: Some(version) },
                Err(StoreError::NotFound { .. }) => BatchItemResult { id, status: BatchItemStatus::NotFound, version: None },
                Err(StoreError::VersionConflict { actual, .. }) => {
                    BatchItemResult { id, status: BatchItemStatus::VersionConflict, version: Some(actual) }
                }
                Err(StoreError::PinnedRequiresForce { .. }) => {
                    BatchItemResult { id, status: BatchItemStatus::Forbidden, version: None }
                }
                Err(StoreError::Forbidden) => BatchItemResult { id, status: BatchItemStatus::Forbidden, version: None },
                Err(_) => BatchItemResult { id, status: BatchItemStatus::NotFound, version: None },
            });
        }
        results
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub who: Option<String>,
    pub project: Option<String>,
    pub kind: Option<String>,
    pub pinned: Option<bool>,
    pub include_deleted: bool,
    pub limit: i64,
    pub offset: i64,
}

async fn find_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<String>, AccessorError> {
    let mut rows = conn.query("SELECT id FROM memories WHERE idempotency_key = ?1", params![key]).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

async fn find_live_by_hash(conn: &Connection, hash: &str) -> Result<Option<String>, AccessorError> {
    let mut rows = conn
        .query("SELECT id FROM memories WHERE content_hash = ?1 AND is_deleted = 0", params![hash])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

async fn merge_duplicate(conn: &Connection, id: &str, tags: &[String], importance: f64, now: &str) -> Result<(), AccessorError> {
    conn.execute(
        "UPDATE memories SET
            tags = (SELECT CASE WHEN tags = '' THEN ?1 ELSE tags || ',' || ?1 END FROM memories WHERE id = ?2),
            importance = MAX(importance, ?3),
            updated_at = ?4
         WHERE id = ?2",
        params![model::join_tags(tags), id, importance, now],
    )
    .await?;
    Ok(())
}

async fn load_row(conn: &Connection, id: &str) -> Result<Option<Memory>, AccessorError> {
    let mut rows = conn
        .query(&format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS), params![id])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_memory(&row)?)),
        None => Ok(None),
    }
}

async fn list_rows(conn: &Connection, filter: &ListFilter) -> Result<Vec<Memory>, libsql::Error> {
    let mut sql = format!("SELECT {} FROM memories WHERE 1 = 1", MEMORY_COLUMNS);
    if !filter.include_deleted {
        sql.push_str(" AND is_deleted = 0");
    }
    if filter.who.is_some() {
        sql.push_str(" AND who = ?1");
    }
    if filter.project.is_some() {
        sql.push_str(" AND project = ?2");
    }
    if filter.kind.is_some() {
        sql.push_str(" AND type = ?3");
    }
    if filter.pinned.is_some() {
        sql.push_str(" AND pinned = ?4");
    }
    sql.push_str(" ORDER BY updated_at DESC LIMIT ?5 OFFSET ?6");

    let params = params![
        filter.who.clone().unwrap_or_default(),
        filter.project.clone().unwrap_or_default(),
        filter.kind.clone().unwrap_or_default(),
        filter.pinned.unwrap_or(false),
        if filter.limit > 0 { filter.limit } else { 50 },
        filter.offset.max(0),
    ];
    let mut rows = conn.query(&sql, params).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_memory(&row)?);
    }
    Ok(out)
}

const MEMORY_COLUMNS: &str = "id, content, type, importance, confidence, tags, who, project, pinned, \
    is_deleted, deleted_at, content_hash, idempotency_key, runtime_path, signature, signer_did, version, \
    created_at, updated_at, source_type, source_path, source_section, source_id, access_count, last_accessed, \
    extraction_status, embedding_model";

fn row_to_memory(row: &libsql::Row) -> Result<Memory, libsql::Error> {
    let tags_raw: String = row.get(5)?;
    let deleted_at: Option<String> = row.get(10)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;
    let last_accessed: Option<String> = row.get(24)?;
    let extraction_status: String = row.get(25)?;

    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        kind: row.get(2)?,
        importance: row.get(3)?,
        confidence: row.get(4)?,
        tags: model::split_tags(&tags_raw),
        who: row.get(6)?,
        project: row.get(7)?,
        pinned: row.get(8)?,
        is_deleted: row.get(9)?,
        deleted_at: parse_ts(deleted_at),
        content_hash: row.get(11)?,
        idempotency_key: row.get(12)?,
        runtime_path: row.get(13)?,
        signature: row.get(14)?,
        signer_did: row.get(15)?,
        version: row.get(16)?,
        created_at: parse_ts(Some(created_at)).unwrap_or_else(Utc::now),
        updated_at: parse_ts(Some(updated_at)).unwrap_or_else(Utc::now),
        source_type: row.get(19)?,
        source_path: row.get(20)?,
        source_section: row.get(21)?,
        source_id: row.get(22)?,
        access_count: row.get(23)?,
        last_accessed: parse_ts(last_accessed),
        extraction_status: ExtractionStatus::parse(&extraction_status),
        embedding_model: row.get(26)?,
    })
}

fn parse_ts(raw: Option<String>) -> Option<chrono::DateTime<Utc>> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc))
}
