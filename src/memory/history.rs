//! Immutable memory history log (spec §3 "Memory history event").

use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Recovered,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Recovered => "recovered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Harness,
    Worker,
    System,
}

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Harness => "harness",
            ActorType::Worker => "worker",
            ActorType::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub id: String,
    pub memory_id: String,
    pub event_kind: EventKind,
    pub previous_content: Option<String>,
    pub next_content: Option<String>,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub actor_type: ActorType,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Context carried by every mutation so the history row it appends can
/// attribute the change (spec §3: `changed_by`, `actor_type`, correlation
/// ids).
#[derive(Debug, Clone, Default)]
pub struct ChangeContext {
    pub changed_by: Option<String>,
    pub actor_type: Option<ActorType>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
}

/// Append one history event within the caller's write transaction. Every
/// accepted state transition writes exactly one event alongside the
/// mutation itself (spec §3 invariant).
pub async fn append(
    conn: &Connection,
    memory_id: &str,
    kind: EventKind,
    previous_content: Option<&str>,
    next_content: Option<&str>,
    reason: Option<&str>,
    ctx: &ChangeContext,
) -> Result<(), libsql::Error> {
    let id = Uuid::new_v4().to_string();
    let actor_type = ctx.actor_type.unwrap_or(ActorType::System);
    conn.execute(
        "INSERT INTO memory_history
            (id, memory_id, event_kind, previous_content, next_content, changed_by, reason,
             metadata, actor_type, session_id, request_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            memory_id,
            kind.as_str(),
            previous_content,
            next_content,
            ctx.changed_by.clone(),
            reason,
            "{}",
            actor_type.as_str(),
            ctx.session_id.clone(),
            ctx.request_id.clone(),
            Utc::now().to_rfc3339(),
        ],
    )
    .await?;
    Ok(())
}

/// List history events for a memory, newest first.
pub async fn list_for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<HistoryEvent>, libsql::Error> {
    let mut rows = conn
        .query(
            "SELECT id, memory_id, event_kind, previous_content, next_content, changed_by, reason,
                    metadata, actor_type, session_id, request_id, created_at
             FROM memory_history WHERE memory_id = ?1 ORDER BY created_at DESC",
            params![memory_id],
        )
        .await?;

    let mut events = Vec::new();
    while let Some(row) = rows.next().await? {
        let kind_str: String = row.get(2)?;
        let actor_str: String = row.get(8)?;
        let metadata_str: String = row.get(7)?;
        let created_at: String = row.get(11)?;
        events.push(HistoryEvent {
            id: row.get(0)?,
            memory_id: row.get(1)?,
            event_kind: parse_kind(&kind_str),
            previous_content: row.get(3)?,
            next_content: row.get(4)?,
            changed_by: row.get(5)?,
            reason: row.get(6)?,
            metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
            actor_type: parse_actor(&actor_str),
            session_id: row.get(9)?,
            request_id: row.get(10)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        });
    }
    Ok(events)
}

fn parse_kind(s: &str) -> EventKind {
    match s {
        "updated" => EventKind::Updated,
        "deleted" => EventKind::Deleted,
        "recovered" => EventKind::Recovered,
        _ => EventKind::Created,
    }
}

fn parse_actor(s: &str) -> ActorType {
    match s {
        "user" => ActorType::User,
        "harness" => ActorType::Harness,
        "worker" => ActorType::Worker,
        _ => ActorType::System,
    }
}
