//! Durable pipeline progress.
//!
//! [`CheckpointStore`] records per-unit stage completion, the stage cursor,
//! aggregate statistics and the oracle response cache in a single JSON
//! document. [`ArtifactStore`] keeps each completed stage's output so a
//! resumed run can reload it instead of recomputing. Both write through a
//! temp file and an atomic rename.

pub mod artifacts;
pub mod error;
pub mod key;
pub mod state;
pub mod store;

mod fsio;

pub use artifacts::ArtifactStore;
pub use error::CheckpointError;
pub use key::{content_digest, QueryKey};
pub use state::{CheckpointState, ProgressSummary, StageStats};
pub use store::CheckpointStore;
