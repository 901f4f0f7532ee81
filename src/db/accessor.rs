//! Single-writer accessor (spec §4.2).
//!
//! SQLite (and libsql, its embeddable fork) permits exactly one writer at a
//! time. Rather than fight that with lock retries, all write transactions
//! are funneled through one dedicated task that owns the sole write
//! connection; submitting a unit of work is a message send, not a lock
//! acquisition, which keeps ordering observable and makes deadlocks
//! impossible by construction. Readers run concurrently against a small
//! pool of read-only connections, each seeing the latest committed snapshot
//! (WAL mode).

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};

use crate::error::AccessorError;

type BoxFuture<'c, T> = Pin<Box<dyn Future<Output = T> + Send + 'c>>;

/// A unit of write work: given the sole write connection, produce a future
/// that runs to completion and reports nothing back directly (results are
/// threaded out through a channel captured by the closure itself).
type WriteTask = Box<dyn for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, ()> + Send>;

/// Handle to the single-writer accessor and its read pool.
pub struct Accessor {
    write_tx: mpsc::Sender<WriteTask>,
    read_pool: Arc<ReadPool>,
    _db: libsql::Database,
}

struct ReadPool {
    connections: Mutex<Vec<Connection>>,
    permits: Semaphore,
}

impl ReadPool {
    async fn acquire(&self) -> Result<PooledConnection<'_>, AccessorError> {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("read pool semaphore is never closed");
        let conn = self
            .connections
            .lock()
            .await
            .pop()
            .expect("permit implies a free connection");
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }
}

struct PooledConnection<'p> {
    conn: Option<Connection>,
    pool: &'p ReadPool,
    _permit: tokio::sync::SemaphorePermit<'p>,
}

impl<'p> std::ops::Deref for PooledConnection<'p> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present for pooled lifetime")
    }
}

impl<'p> Drop for PooledConnection<'p> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Pushing back is synchronous (uncontended std-mutex-like lock
            // behind tokio's Mutex); block_in_place is unnecessary because
            // the lock is never held across an await in this file.
            if let Ok(mut guard) = self.pool.connections.try_lock() {
                guard.push(conn);
            }
        }
    }
}

async fn configure_connection(conn: &Connection) -> Result<(), libsql::Error> {
    conn.query("PRAGMA foreign_keys = ON", ()).await?;
    conn.query("PRAGMA journal_mode = WAL", ()).await?;
    conn.query("PRAGMA busy_timeout = 5000", ()).await?;
    Ok(())
}

impl Accessor {
    /// Open the database file, start the writer task, and build a pool of
    /// `read_pool_size` read-only connections.
    pub async fn open(path: &Path, read_pool_size: usize) -> Result<Self, libsql::Error> {
        let db = libsql::Builder::new_local(path).build().await?;

        let writer_conn = db.connect()?;
        configure_connection(&writer_conn).await?;

        let (write_tx, mut write_rx) = mpsc::channel::<WriteTask>(256);
        tokio::spawn(async move {
            let conn = writer_conn;
            while let Some(task) = write_rx.recv().await {
                task(&conn).await;
            }
        });

        let read_pool_size = read_pool_size.max(1);
        let mut connections = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size {
            let conn = db.connect()?;
            configure_connection(&conn).await?;
            connections.push(conn);
        }

        Ok(Self {
            write_tx,
            read_pool: Arc::new(ReadPool {
                connections: Mutex::new(connections),
                permits: Semaphore::new(read_pool_size),
            }),
            _db: db,
        })
    }

    /// Run `f` inside a write transaction against the sole writer
    /// connection. Commits on `Ok`, rolls back on `Err`. Cancellation of the
    /// calling future before the task runs drops it from the queue; once it
    /// has started, it always runs to completion so the database is never
    /// left half-committed (spec §4.2, §5).
    ///
    /// Generic over the error type so callers can fail with their own
    /// domain error (e.g. `StoreError::VersionConflict`) instead of being
    /// forced through `AccessorError` first; any `AccessorError` that
    /// surfaces from the connection itself converts via `E: From<AccessorError>`.
    pub async fn with_write_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<AccessorError> + Send + 'static,
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: WriteTask = Box::new(move |conn: &Connection| {
            Box::pin(async move {
                let result = run_in_transaction(conn, f).await;
                let _ = tx.send(result);
            })
        });
        self.write_tx
            .send(task)
            .await
            .map_err(|_| E::from(AccessorError::WriterUnavailable))?;
        rx.await.map_err(|_| E::from(AccessorError::Cancelled))?
    }

    /// Run `f` against the raw write connection with no transaction
    /// wrapper. Used only by the migrator, which manages one transaction
    /// per migration step itself.
    pub async fn with_migration_conn<T, F>(&self, f: F) -> Result<T, AccessorError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: WriteTask = Box::new(move |conn: &Connection| {
            Box::pin(async move {
                let result = f(conn).await;
                let _ = tx.send(result);
            })
        });
        self.write_tx
            .send(task)
            .await
            .map_err(|_| AccessorError::WriterUnavailable)?;
        rx.await.map_err(|_| AccessorError::Cancelled)
    }

    /// Hand out a pooled read-only connection for the duration of `f`.
    pub async fn with_read<T, F, Fut>(&self, f: F) -> Result<T, AccessorError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T, AccessorError>>,
    {
        let pooled = self.read_pool.acquire().await?;
        let conn = pooled.conn.as_ref().expect("present").clone();
        f(conn).await
    }
}

async fn run_in_transaction<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    E: From<AccessorError>,
    F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<T, E>>,
{
    conn.execute("BEGIN IMMEDIATE", ()).await.map_err(AccessorError::from)?;
    match f(conn).await {
        Ok(value) => {
            conn.execute("COMMIT", ()).await.map_err(AccessorError::from)?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", ()).await;
            Err(e)
        }
    }
}
