//! Full-text and vector indexes over memory content, and the chunker that
//! feeds both from long documents (spec §4.5).

pub mod chunk;
pub mod fts;
pub mod vector;

pub use chunk::{chunk_document, Chunk};
pub use fts::{keyword_search, KeywordHit};
pub use vector::{nearest_neighbors, upsert_embedding, vector_available, VectorHit};
