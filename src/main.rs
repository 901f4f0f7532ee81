//! `signetd`: the memory daemon entrypoint (spec §3 "Ownership", §6).
//!
//! Startup order mirrors the daemon's own lifecycle module: acquire the
//! pidfile before touching anything else, open and migrate the database,
//! wire up the collaborators and background workers, then bind the HTTP
//! listener last so a port-bind failure never leaves an orphaned lock.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use signet::collaborators::{Embedder, Generator, HttpEmbedder, HttpGenerator, NullEmbedder, NullGenerator};
use signet::config::ConfigHandle;
use signet::db::schema::DEFAULT_VECTOR_DIM;
use signet::http::{self, AppState};
use signet::jobs::Queue;
use signet::memory::store::MemoryStore;
use signet::pidfile::PidFile;
use signet::recall::RecallEngine;
use signet::secrets::SecretsStore;
use signet::session::SessionRegistry;
use signet::signing::{Ed25519Signer, Signer};
use signet::telemetry::LogBroadcast;
use signet::workers::{self, WorkerContext};

#[derive(Debug, Parser)]
#[command(name = "signetd", about = "Local-first, persistent memory service for AI agents")]
struct Cli {
    /// Directory holding this agent's data: memory/, .secrets/, .daemon/, config.toml.
    #[arg(long, env = "SIGNET_AGENTS_DIR")]
    agents_dir: PathBuf,

    /// Loopback port for the HTTP surface.
    #[arg(long, env = "SIGNET_PORT", default_value_t = 8282)]
    port: u16,

    /// Number of pooled read-only database connections.
    #[arg(long, default_value_t = 4)]
    read_pool_size: usize,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(cli)) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("signetd: startup failed: {e:?}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<signet::pidfile::PidFileError>().is_some() {
        2
    } else {
        1
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.agents_dir)?;

    let pidfile_path = cli.agents_dir.join(".daemon").join("signetd.pid");
    let _pidfile = PidFile::acquire(&pidfile_path)?;

    let logs_dir = cli.agents_dir.join(".daemon").join("logs");
    let broadcast = LogBroadcast::new();
    let _guard = signet::telemetry::init(&logs_dir, broadcast.clone());

    tracing::info!(agents_dir = %cli.agents_dir.display(), port = cli.port, "signetd starting");

    let config = ConfigHandle::load(cli.agents_dir.join("config.toml"));
    config.spawn_watcher(std::time::Duration::from_secs(5));

    let db_path = cli.agents_dir.join("memory").join("memories.db");
    let accessor = Arc::new(signet::db::open(&db_path, cli.read_pool_size).await?);

    let secrets = SecretsStore::new(cli.agents_dir.join(".secrets"));
    let signer: Option<Arc<dyn Signer>> = if std::env::var("SIGNET_SIGNING_DISABLED").is_ok() {
        None
    } else {
        let signing_key = secrets.load_or_create_signing_key()?;
        Some(Arc::new(Ed25519Signer::from_signing_key(signing_key)) as Arc<dyn Signer>)
    };

    let embedder: Arc<dyn Embedder> = match std::env::var("SIGNET_EMBEDDER_URL") {
        Ok(base_url) => {
            let api_key = std::env::var("SIGNET_EMBEDDER_API_KEY").ok();
            let model = std::env::var("SIGNET_EMBEDDER_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
            let dimensions = std::env::var("SIGNET_EMBEDDER_DIMENSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_VECTOR_DIM);
            Arc::new(HttpEmbedder::new(base_url, api_key, model, dimensions))
        }
        Err(_) => Arc::new(NullEmbedder),
    };
    let embed_model_name = std::env::var("SIGNET_EMBEDDER_MODEL").unwrap_or_else(|_| "none".to_string());

    let generator: Arc<dyn Generator> = match std::env::var("SIGNET_GENERATOR_URL") {
        Ok(base_url) => {
            let api_key = std::env::var("SIGNET_GENERATOR_API_KEY").ok();
            let model = std::env::var("SIGNET_GENERATOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            Arc::new(HttpGenerator::new(base_url, api_key, model))
        }
        Err(_) => Arc::new(NullGenerator),
    };

    let queue = Arc::new(Queue::new(accessor.clone()));
    let recall = Arc::new(RecallEngine::new(accessor.clone(), embedder.clone()));
    let store = Arc::new(MemoryStore::new(accessor.clone(), queue.clone(), config.clone(), signer.clone()));
    let sessions = Arc::new(SessionRegistry::new());

    let worker_ctx = Arc::new(WorkerContext {
        accessor: accessor.clone(),
        queue: queue.clone(),
        store: store.clone(),
        config: config.clone(),
        recall: recall.clone(),
        generator,
        embedder,
        embed_model_name,
    });
    let worker_handles = workers::spawn_all(worker_ctx);

    let state = Arc::new(AppState {
        accessor: accessor.clone(),
        store,
        recall,
        queue,
        config,
        sessions,
        logs: broadcast,
        signer,
        started_at: chrono::Utc::now(),
        pid: std::process::id(),
        port: cli.port,
        agents_dir: cli.agents_dir.clone(),
    });

    let router = http::router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("shutdown signal received, stopping workers");
    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}
