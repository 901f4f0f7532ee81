//! Storage layer: schema/migrator, the single-writer accessor, and the
//! read-connection pool they both sit on top of (spec §4.1, §4.2).

pub mod accessor;
pub mod migrator;
pub mod schema;

pub use accessor::Accessor;
pub use migrator::apply_migrations;

use std::path::Path;

use crate::error::MigrationError;

/// Open (or create) the database file at `path`, apply all pending
/// migrations, and return a ready `Accessor`. This is the one entry point
/// `main.rs` needs.
pub async fn open(path: &Path, read_pool_size: usize) -> Result<Accessor, MigrationError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let accessor = Accessor::open(path, read_pool_size)
        .await
        .map_err(|e| MigrationError::Inconsistent {
            version: 0,
            detail: format!("failed to open database: {e}"),
        })?;
    accessor
        .with_migration_conn(|conn| Box::pin(apply_migrations(conn)))
        .await
        .map_err(|e| MigrationError::Inconsistent {
            version: 0,
            detail: format!("failed to run migrator on write connection: {e}"),
        })??;
    Ok(accessor)
}
