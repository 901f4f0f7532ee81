//! Memory record storage: model, append-only history, and the CRUD store
//! that ties them together (spec §3, §4.3).

pub mod history;
pub mod model;
pub mod store;

pub use history::{ActorType, ChangeContext, EventKind, HistoryEvent};
pub use model::{
    BatchItemResult, BatchItemStatus, ExtractionStatus, Memory, ModifyPatch, RememberOptions,
    RememberOutcome,
};
pub use store::{ListFilter, MemoryStore};
