//! DDL for every schema revision (spec §2 "eighteen revisions", §3, §4.1).
//!
//! Each migration is a list of standalone SQL statements (never one
//! semicolon-joined blob) so a single failing statement rolls back cleanly
//! without needing a SQL-aware splitter.

/// Current schema revision. The migrator brings any database forward to
/// this version idempotently (spec §4.1).
pub const CURRENT_SCHEMA_VERSION: i64 = 18;

/// Default embedding dimension used for the optional vector index. A real
/// deployment pins this to its embedder's output size; changing it requires
/// re-embedding, so it is not hot-reloadable.
pub const DEFAULT_VECTOR_DIM: usize = 1536;

pub fn migration_v1_memories() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'fact',
            importance REAL NOT NULL DEFAULT 0.5,
            confidence REAL NOT NULL DEFAULT 1.0,
            tags TEXT NOT NULL DEFAULT '',
            who TEXT,
            project TEXT,
            pinned INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            content_hash TEXT,
            idempotency_key TEXT UNIQUE,
            runtime_path TEXT,
            signature TEXT,
            signer_did TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            source_type TEXT,
            source_path TEXT,
            source_section TEXT,
            source_id TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed TEXT,
            extraction_status TEXT NOT NULL DEFAULT 'none',
            embedding_model TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_memories_deleted ON memories(is_deleted, deleted_at)",
    ]
}

pub fn migration_v2_history() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS memory_history (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            event_kind TEXT NOT NULL,
            previous_content TEXT,
            next_content TEXT,
            changed_by TEXT,
            reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            actor_type TEXT NOT NULL DEFAULT 'system',
            session_id TEXT,
            request_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_history_memory ON memory_history(memory_id, created_at)",
    ]
}

pub fn migration_v3_fts() -> &'static [&'static str] {
    &[
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content,
            tags,
            content='memories',
            content_rowid='rowid',
            tokenize='unicode61'
        )",
        "CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content, tags) VALUES (NEW.rowid, NEW.content, NEW.tags);
        END",
        "CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, tags) VALUES ('delete', OLD.rowid, OLD.content, OLD.tags);
        END",
        "CREATE TRIGGER IF NOT EXISTS memories_fts_au AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content, tags) VALUES ('delete', OLD.rowid, OLD.content, OLD.tags);
            INSERT INTO memories_fts(rowid, content, tags) VALUES (NEW.rowid, NEW.content, NEW.tags);
        END",
    ]
}

pub fn migration_v4_content_hash_unique() -> &'static [&'static str] {
    &[
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_content_hash_live
            ON memories(content_hash) WHERE is_deleted = 0 AND content_hash IS NOT NULL",
    ]
}

pub fn migration_v5_embeddings() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS embeddings (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL UNIQUE,
            vector BLOB NOT NULL,
            dimensions INTEGER NOT NULL,
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_text TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_embeddings_source ON embeddings(source_type, source_id)",
    ]
}

pub fn migration_v6_entities() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            canonical_name TEXT NOT NULL UNIQUE,
            entity_type TEXT NOT NULL DEFAULT 'other',
            mention_count INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ]
}

pub fn migration_v7_relations() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS relations (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL,
            target_entity_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            strength REAL NOT NULL DEFAULT 1.0,
            confidence REAL NOT NULL DEFAULT 1.0,
            mention_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(source_entity_id, target_entity_id, relation_type),
            FOREIGN KEY (source_entity_id) REFERENCES entities(id) ON DELETE CASCADE,
            FOREIGN KEY (target_entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )",
    ]
}

pub fn migration_v8_mentions() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS memory_entity_mentions (
            memory_id TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            mention_text TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (memory_id, entity_id),
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )",
        "CREATE INDEX IF NOT EXISTS idx_mentions_entity ON memory_entity_mentions(entity_id)",
    ]
}

pub fn migration_v9_jobs() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            memory_id TEXT,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            payload TEXT NOT NULL DEFAULT '{}',
            result TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            lease_id TEXT,
            leased_at TEXT,
            next_attempt_at TEXT,
            completed_at TEXT,
            failed_at TEXT,
            last_error TEXT,
            last_error_code TEXT,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(status, next_attempt_at, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_type ON jobs(job_type, status)",
    ]
}

pub fn migration_v10_documents() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL UNIQUE,
            file_hash TEXT NOT NULL,
            ingestion_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ]
}

pub fn migration_v11_document_memories() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS document_memories (
            document_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            PRIMARY KEY (document_id, memory_id),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        )",
    ]
}

pub fn migration_v12_audit() -> &'static [&'static str] {
    &[
        "CREATE TABLE IF NOT EXISTS schema_migration_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            checksum TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS engine_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ]
}

pub fn migration_v13_vector_marker() -> &'static [&'static str] {
    // The actual vector index is attempted separately (it may fail on
    // builds without the extension); this just seeds the default so a
    // fresh database has a definite answer before that attempt runs.
    &["INSERT OR IGNORE INTO engine_settings (key, value) VALUES ('vector_available', '0')"]
}

pub fn migration_v14_job_indexes() -> &'static [&'static str] {
    &[
        "CREATE INDEX IF NOT EXISTS idx_jobs_completed ON jobs(status, completed_at)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_dead ON jobs(status, failed_at)",
    ]
}

pub fn migration_v16_filter_indexes() -> &'static [&'static str] {
    &[
        "CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(type)",
        "CREATE INDEX IF NOT EXISTS idx_memories_pinned ON memories(pinned)",
        "CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project)",
        "CREATE INDEX IF NOT EXISTS idx_memories_who ON memories(who)",
    ]
}

pub fn migration_v17_graph_indexes() -> &'static [&'static str] {
    &[
        "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type)",
        "CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_entity_id)",
    ]
}
