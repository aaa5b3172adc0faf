//! Engine-wide constants
//!
//! TigerStyle: explicit limits, big-endian naming, units in the name where
//! the unit is not obvious from context.

/// Seconds in a day, used for retroactive-day bucketing.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Milliseconds in a minute.
pub const MS_PER_MINUTE: u64 = 60 * 1_000;

/// Milliseconds in a day.
pub const MS_PER_DAY: u64 = 24 * 60 * MS_PER_MINUTE;

/// Episode display names are truncated to this many characters.
pub const EPISODE_NAME_CHARS_MAX: usize = 50;

// =============================================================================
// Entity resolution (candidate pool)
// =============================================================================

/// Minimum cosine similarity for an entity to enter the candidate pool.
pub const CANDIDATE_SIMILARITY_MIN: f64 = 0.65;

/// Maximum entities fetched into the candidate pool before re-ranking.
pub const CANDIDATE_POOL_MAX: usize = 50;

/// Maximum candidates handed to the LLM as known-entity context.
pub const CONTEXT_ENTITIES_MAX: usize = 20;

/// Weight of semantic similarity in candidate re-ranking.
pub const CANDIDATE_SEMANTIC_WEIGHT: f64 = 0.7;

/// Weight of recency in candidate re-ranking.
pub const CANDIDATE_RECENCY_WEIGHT: f64 = 0.3;

/// Exponential decay rate per day for the recency term.
pub const CANDIDATE_RECENCY_DECAY_PER_DAY: f64 = 0.1;

// =============================================================================
// Ingestion
// =============================================================================

/// Entities and relations below this confidence are dropped.
pub const EXTRACTION_CONFIDENCE_MIN: f64 = 0.5;

// =============================================================================
// Retrieval
// =============================================================================

/// Default result limit for similarity search.
pub const SEARCH_LIMIT_DEFAULT: usize = 10;

/// Default hop count for graph expansion.
pub const EXPAND_HOPS_DEFAULT: u32 = 2;

/// Graph expansion is capped at this multiple of the search limit.
pub const GRAPH_EXPAND_CAP_FACTOR: usize = 2;

/// Default temporal re-ranking boost factor.
pub const TEMPORAL_ALPHA_DEFAULT: f64 = 0.3;

/// Default half-life in days for temporal proximity decay.
pub const HALF_LIFE_DAYS_DEFAULT: f64 = 30.0;

/// Half-life in days for the contemporaneity damping of back-dated episodes.
pub const CONTEMPORANEITY_HALF_LIFE_DAYS: f64 = 30.0;

// =============================================================================
// Sleep: Phase 1 (consolidation)
// =============================================================================

/// Minimum unconsolidated episodes before an entity's summary is refreshed.
pub const CONSOLIDATION_MIN_EPISODES_DEFAULT: usize = 2;

/// Maximum entities consolidated per sleep cycle.
pub const CONSOLIDATION_MAX_ENTITIES_DEFAULT: usize = 50;

/// Default cooldown: episodes younger than this are left alone.
pub const CONSOLIDATION_COOLDOWN_MINUTES_DEFAULT: u64 = 60;

/// Outgoing active edges included in a tiered-merge neighbourhood prompt.
pub const LTM_NEIGHBOURHOOD_OUTGOING_MAX: usize = 6;

/// Incoming active edges included in a tiered-merge neighbourhood prompt.
pub const LTM_NEIGHBOURHOOD_INCOMING_MAX: usize = 4;

// =============================================================================
// Sleep: Phase 2 (pruning & merge)
// =============================================================================

/// Embedding similarity at or above which duplicate entities are merged.
pub const MERGE_SIMILARITY_DEFAULT: f64 = 0.88;

/// Name-length-ratio fallback floor when a pair lacks embeddings.
pub const MERGE_NAME_RATIO_FLOOR: f64 = 0.6;

// =============================================================================
// Sleep: Phase 3 (communities)
// =============================================================================

/// Minimum entity count before community detection runs at all.
pub const COMMUNITY_MIN_GRAPH_SIZE_DEFAULT: usize = 15;

/// Minimum entity growth since the last rebuild before rebuilding again.
pub const COMMUNITY_REBUILD_THRESHOLD_DEFAULT: usize = 10;

/// Communities smaller than this are discarded.
pub const COMMUNITY_MIN_SIZE_DEFAULT: usize = 3;

/// Jaccard overlap at or above which an existing community UUID is reused.
pub const COMMUNITY_JACCARD_REUSE_MIN: f64 = 0.7;

/// Member summaries included in a community summary prompt.
pub const COMMUNITY_MEMBER_SUMMARIES_MAX: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reranking_weights_sum_to_one() {
        assert!((CANDIDATE_SEMANTIC_WEIGHT + CANDIDATE_RECENCY_WEIGHT - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_context_fits_in_pool() {
        assert!(CONTEXT_ENTITIES_MAX <= CANDIDATE_POOL_MAX);
    }
}
