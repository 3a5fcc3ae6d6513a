//! Semantic matching of company profiles against the transaction catalog.
//!
//! # Architecture
//!
//! - `composite`: One searchable document per catalog record
//! - `cache`: Embeddings keyed by transaction id, with document fingerprints
//! - `storage`: Binary file I/O for vectors.bin persistence
//! - `provider`: Text-to-vector backends (OpenAI-compatible HTTP, fastembed)
//! - `embedder`: Batching, pacing and cancellation around a provider
//! - `ranker`: Cosine similarity ranking
//! - `feedback`: Accept/reject review over a ranked list
//! - `service`: Ties the above together for one query

mod cache;
mod composite;
mod embedder;
pub mod feedback;
#[cfg(feature = "local-embeddings")]
mod local;
mod provider;
mod ranker;
mod service;
mod storage;

pub use cache::{model_id_hash, EmbeddingCache};
pub use embedder::{EmbedError, Embedder, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};
pub use feedback::{CsvFeedbackLog, FeedbackSession, SessionState, SessionStatus};
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use provider::{EmbeddingProvider, OpenAiProvider};
pub use ranker::MatchResult;
pub use service::{MatchError, MatchService};
pub use storage::VectorStorage;

#[cfg(test)]
pub use cache::CacheError;
#[cfg(test)]
pub use feedback::Verdict;
#[cfg(test)]
pub use provider::ProviderError;
#[cfg(test)]
pub use ranker::MATCH_RATIONALE;

/// File holding cached catalog embeddings under the base directory
pub const VECTORS_FILE: &str = "vectors.bin";

/// File holding the reviewer feedback log under the base directory
pub const FEEDBACK_FILE: &str = "match_feedback.csv";
