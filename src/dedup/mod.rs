//! Record similarity and deduplication engine.
//!
//! Everything here is pure: functions read records and return values, and
//! nothing fails except a grouping pass stopped by its cancellation token.
//!
//! ```text
//! normalize ──> signature ──────────────┐
//!     │                                 v
//!     └──────> similarity ──> grouping ──> quality (survivor per group)
//! ```

mod grouping;
mod normalize;
mod quality;
mod signature;
mod similarity;

pub use grouping::{Cluster, ClusteringStrategy, DuplicateGrouper};
pub use normalize::{collapse_whitespace, normalize_body, normalize_sender, normalize_subject};
pub use quality::{QualityRanker, QualityWeights};
pub use signature::signature;
pub use similarity::{
    RecordFeatures, SignalScores, SimilarityScore, SimilarityScorer, SimilarityWeights,
};
