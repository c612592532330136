//! Opinion consolidation core.
//!
//! Within each category partition, candidates are scored and clustered
//! ([`similarity`]), classified into relationships ([`classify`]), merged
//! into canonical opinions ([`merge`]), linked into evolution chains
//! ([`evolution`]) and traced per speaker ([`journey`]). [`pipeline`] runs
//! those stages resumably against a checkpoint store.

pub mod cache;
pub mod classify;
pub mod error;
pub mod evolution;
pub mod journey;
pub mod merge;
pub mod pipeline;
pub mod similarity;

#[cfg(test)]
mod test_support;

pub use cache::{CachedOracle, Verified};
pub use classify::{Classification, Classifier, ClassifyStats, FALLBACK_CEILING};
pub use error::ConsolidateError;
pub use evolution::{assign_chain_ids, build_chains, classify_step};
pub use journey::{build_journeys, merge_journeys};
pub use merge::{process_relationships, MergeOutcome};
pub use pipeline::{
    partition_key, InvalidUnit, PartitionFailure, Pipeline, PipelineInput, PipelineOptions,
    PipelineOutput, RunReport,
};
pub use similarity::{cluster, partition_by_category, score, PartitionScores, SimilarityVector};
