//! Naiad Engine
//!
//! A temporal knowledge-graph memory engine for LLM agents. Unstructured
//! episodes are ingested continuously; entities and typed relations are
//! extracted via a structured LLM call and stored in a bi-temporal property
//! graph with embeddings. Retrieval combines embedding similarity, community
//! routing, graph expansion, and temporal re-ranking. A background sleep
//! cycle consolidates summaries, merges duplicate entities, and detects
//! communities.
//!
//! # Example
//!
//! ```rust,ignore
//! use naiad_engine::{AddEpisodeParams, MemoryEngine, SearchParams};
//!
//! let engine = MemoryEngine::sim(42);
//!
//! engine
//!     .add_episode(AddEpisodeParams::new("Alice met Bob at the conference."))
//!     .await?;
//!
//! let hits = engine.search(SearchParams::new("who does Alice know?")).await?;
//! ```

mod engine;
mod error;
mod ingestion;
mod prompts;
mod resolver;
mod retrieval;
mod scheduler;
mod sleep;

pub use engine::{AddEpisodeParams, EngineConfig, MemoryEngine, DEFAULT_GROUP_ID};
pub use error::{EngineError, EngineResult};
pub use ingestion::{ExtractedEntity, ExtractedRelation, ExtractionPayload, TemporalValidity};
pub use retrieval::{SearchParams, TraverseParams, TraverseResult};
pub use scheduler::{ms_until_next, AutoSleepConfig, OnComplete, OnError};
pub use sleep::{
    MergedPair, Phase1Report, Phase2Report, Phase3Report, SleepOptions, SleepReport, SleepTarget,
};
