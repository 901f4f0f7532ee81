//! Pluggable collaborators: the Generator (LLM) and Embedder the workers
//! call out to, plus the config loader the pipeline config reads from. Each
//! has a real HTTP-backed implementation and a `Null` stand-in for hosts
//! with nothing configured — out of scope for this repo's own logic (spec §1),
//! but the seam has to exist for the workers to compile against.

pub mod config_loader;
pub mod embedder;
pub mod generator;

pub use config_loader::{ConfigLoader, FileConfigLoader};
pub use embedder::{Embedder, HttpEmbedder, NullEmbedder};
pub use generator::{ExtractedFact, Generator, HttpGenerator, NullGenerator};
