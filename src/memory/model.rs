//! Memory record types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction status on a memory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    None,
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionStatus::None => "none",
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::InProgress => "in_progress",
            ExtractionStatus::Done => "done",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ExtractionStatus::Pending,
            "in_progress" => ExtractionStatus::InProgress,
            "done" => ExtractionStatus::Done,
            "failed" => ExtractionStatus::Failed,
            _ => ExtractionStatus::None,
        }
    }
}

/// A memory record. `type` is domain-open (spec §3: "fact, preference,
/// decision, summary, daily-log, …") so it is stored and handled as plain
/// text rather than a closed enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub importance: f64,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub who: Option<String>,
    pub project: Option<String>,
    pub pinned: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub idempotency_key: Option<String>,
    pub runtime_path: Option<String>,
    pub signature: Option<String>,
    pub signer_did: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_type: Option<String>,
    pub source_path: Option<String>,
    pub source_section: Option<String>,
    pub source_id: Option<String>,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub extraction_status: ExtractionStatus,
    pub embedding_model: Option<String>,
}

/// Normalise memory content: trim, NFC, collapse runs of whitespace
/// (spec §4.3 `remember`).
pub fn normalize_content(raw: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let nfc: String = raw.trim().nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_was_space = false;
    for ch in nfc.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

pub fn content_hash(normalized: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

pub fn split_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(|s| s.to_string()).collect()
    }
}

/// Options accepted by `remember` (spec §4.3, §6 request body).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RememberOptions {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub who: Option<String>,
    pub project: Option<String>,
    pub pinned: Option<bool>,
    pub source_type: Option<String>,
    pub source_path: Option<String>,
    pub source_section: Option<String>,
    pub source_id: Option<String>,
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: Option<String>,
    #[serde(rename = "runtimePath")]
    pub runtime_path: Option<String>,
    #[serde(rename = "autoSign")]
    pub auto_sign: Option<bool>,
}

/// Outcome of `remember` (spec §4.3, §6 response body).
#[derive(Debug, Clone, Serialize)]
pub struct RememberOutcome {
    pub id: String,
    pub version: i64,
    pub embedded: bool,
    pub deduped: bool,
}

/// A sparse patch applied by `modify`. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModifyPatch {
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub who: Option<String>,
    pub project: Option<String>,
    pub pinned: Option<bool>,
}

impl ModifyPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.kind.is_none()
            && self.importance.is_none()
            && self.confidence.is_none()
            && self.tags.is_none()
            && self.who.is_none()
            && self.project.is_none()
            && self.pinned.is_none()
    }
}

/// Per-item outcome for batch operations (spec §4.3 "partial success is
/// normal").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Updated,
    Deleted,
    VersionConflict,
    Duplicate,
    NotFound,
    NoChanges,
    Forbidden,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub id: String,
    pub status: BatchItemStatus,
    pub version: Option<i64>,
}
