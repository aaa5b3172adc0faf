//! Sleep engine
//!
//! The background maintenance cycle: Phase 1 refreshes entity summaries
//! from accumulated episodes (optionally consolidating a short-term graph
//! into a long-term one), Phase 2 collapses duplicate entities and prunes
//! evidence-less edges, Phase 3 rebuilds communities. Phases run
//! sequentially within one call; the caller serializes cycles.

mod communities;
mod consolidation;
mod louvain;
mod pruning;

pub use louvain::detect_communities;

use chrono::{DateTime, Utc};
use naiad_core::constants::{
    COMMUNITY_MIN_GRAPH_SIZE_DEFAULT, COMMUNITY_MIN_SIZE_DEFAULT,
    COMMUNITY_REBUILD_THRESHOLD_DEFAULT, CONSOLIDATION_COOLDOWN_MINUTES_DEFAULT,
    CONSOLIDATION_MAX_ENTITIES_DEFAULT, CONSOLIDATION_MIN_EPISODES_DEFAULT,
    MERGE_SIMILARITY_DEFAULT,
};
use naiad_core::io::IoContext;
use naiad_graph::GraphStore;
use naiad_providers::{EmbeddingProvider, LlmProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EngineResult;

// =============================================================================
// Target & options
// =============================================================================

/// What a sleep cycle operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SleepTarget {
    /// One self-contained graph.
    Single(String),
    /// Short-term graph consolidated into a long-term graph; pruning and
    /// communities run on the long-term side only.
    Tiered {
        stm_group_id: String,
        ltm_group_id: String,
    },
}

impl SleepTarget {
    pub fn single(group_id: impl Into<String>) -> Self {
        SleepTarget::Single(group_id.into())
    }

    pub fn tiered(stm: impl Into<String>, ltm: impl Into<String>) -> Self {
        SleepTarget::Tiered {
            stm_group_id: stm.into(),
            ltm_group_id: ltm.into(),
        }
    }

    /// The group Phase 2 and Phase 3 run on.
    fn maintenance_group(&self) -> &str {
        match self {
            SleepTarget::Single(g) => g,
            SleepTarget::Tiered { ltm_group_id, .. } => ltm_group_id,
        }
    }
}

/// Per-cycle tunables. Defaults match the constants module.
#[derive(Debug, Clone)]
pub struct SleepOptions {
    pub run_consolidation: bool,
    pub run_pruning: bool,
    pub run_communities: bool,
    /// Episodes younger than this are left for the next cycle.
    pub cooldown_minutes: u64,
    pub min_episodes: usize,
    pub max_entities: usize,
    pub similarity_threshold: f64,
    pub min_graph_size: usize,
    pub rebuild_threshold: usize,
    pub min_community_size: usize,
    /// Compute and report everything, write nothing.
    pub dry_run: bool,
}

impl Default for SleepOptions {
    fn default() -> Self {
        Self {
            run_consolidation: true,
            run_pruning: true,
            run_communities: true,
            cooldown_minutes: CONSOLIDATION_COOLDOWN_MINUTES_DEFAULT,
            min_episodes: CONSOLIDATION_MIN_EPISODES_DEFAULT,
            max_entities: CONSOLIDATION_MAX_ENTITIES_DEFAULT,
            similarity_threshold: MERGE_SIMILARITY_DEFAULT,
            min_graph_size: COMMUNITY_MIN_GRAPH_SIZE_DEFAULT,
            rebuild_threshold: COMMUNITY_REBUILD_THRESHOLD_DEFAULT,
            min_community_size: COMMUNITY_MIN_SIZE_DEFAULT,
            dry_run: false,
        }
    }
}

impl SleepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cooldown_minutes(mut self, minutes: u64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&threshold),
            "similarity threshold must be in [0, 1]"
        );
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_min_episodes(mut self, min: usize) -> Self {
        assert!(min > 0, "min_episodes must be positive");
        self.min_episodes = min;
        self
    }

    pub fn with_rebuild_threshold(mut self, threshold: usize) -> Self {
        self.rebuild_threshold = threshold;
        self
    }

    pub fn with_min_graph_size(mut self, size: usize) -> Self {
        self.min_graph_size = size;
        self
    }

    pub fn with_min_community_size(mut self, size: usize) -> Self {
        self.min_community_size = size;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn without_consolidation(mut self) -> Self {
        self.run_consolidation = false;
        self
    }

    pub fn without_pruning(mut self) -> Self {
        self.run_pruning = false;
        self
    }

    pub fn without_communities(mut self) -> Self {
        self.run_communities = false;
        self
    }
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase1Report {
    pub entities_refreshed: usize,
    pub episodes_consolidated: usize,
    pub tokens_used: u64,
    pub entities_processed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedPair {
    pub canonical: String,
    pub duplicate: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase2Report {
    pub entities_merged: usize,
    pub merged_pairs: Vec<MergedPair>,
    pub edges_pruned: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase3Report {
    pub skipped: bool,
    pub reason: Option<String>,
    pub communities_built: usize,
    pub communities_removed: usize,
    pub entity_count: usize,
}

/// Result of one full sleep cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepReport {
    pub group_id: String,
    pub ltm_group_id: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phase1: Phase1Report,
    pub phase2: Phase2Report,
    pub phase3: Phase3Report,
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct SleepEngine {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    io: IoContext,
}

impl SleepEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        io: IoContext,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            io,
        }
    }

    /// Run one full cycle: consolidation, pruning, communities, in order.
    #[tracing::instrument(skip(self, options), fields(dry_run = options.dry_run))]
    pub async fn sleep(
        &self,
        target: &SleepTarget,
        options: &SleepOptions,
    ) -> EngineResult<SleepReport> {
        let started_at = self.io.now_utc();
        let started_ms = self.io.now_ms();

        let phase1 = if options.run_consolidation {
            match target {
                SleepTarget::Single(group_id) => {
                    consolidation::run(
                        &self.store,
                        &self.llm,
                        &self.embedder,
                        &self.io,
                        group_id,
                        options,
                    )
                    .await?
                }
                SleepTarget::Tiered {
                    stm_group_id,
                    ltm_group_id,
                } => {
                    consolidation::run_tiered(
                        &self.store,
                        &self.llm,
                        &self.embedder,
                        &self.io,
                        stm_group_id,
                        ltm_group_id,
                        options,
                    )
                    .await?
                }
            }
        } else {
            Phase1Report::default()
        };

        let maintenance_group = target.maintenance_group();

        let phase2 = if options.run_pruning {
            pruning::run(&self.store, maintenance_group, options).await?
        } else {
            Phase2Report::default()
        };

        let phase3 = if options.run_communities {
            communities::run(
                &self.store,
                &self.llm,
                &self.embedder,
                &self.io,
                maintenance_group,
                options,
            )
            .await?
        } else {
            Phase3Report {
                skipped: true,
                reason: Some("disabled".to_string()),
                ..Phase3Report::default()
            }
        };

        let completed_at = self.io.now_utc();
        let report = SleepReport {
            group_id: match target {
                SleepTarget::Single(g) => g.clone(),
                SleepTarget::Tiered { stm_group_id, .. } => stm_group_id.clone(),
            },
            ltm_group_id: match target {
                SleepTarget::Single(_) => None,
                SleepTarget::Tiered { ltm_group_id, .. } => Some(ltm_group_id.clone()),
            },
            dry_run: options.dry_run,
            started_at,
            completed_at,
            duration_ms: self.io.now_ms().saturating_sub(started_ms),
            phase1,
            phase2,
            phase3,
        };

        tracing::info!(
            entities_refreshed = report.phase1.entities_refreshed,
            entities_merged = report.phase2.entities_merged,
            communities_built = report.phase3.communities_built,
            "sleep cycle complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_maintenance_group() {
        assert_eq!(SleepTarget::single("g").maintenance_group(), "g");
        assert_eq!(SleepTarget::tiered("stm", "ltm").maintenance_group(), "ltm");
    }

    #[test]
    fn test_options_defaults() {
        let options = SleepOptions::default();

        assert!(options.run_consolidation && options.run_pruning && options.run_communities);
        assert_eq!(options.min_episodes, 2);
        assert_eq!(options.max_entities, 50);
        assert!((options.similarity_threshold - 0.88).abs() < f64::EPSILON);
        assert_eq!(options.min_graph_size, 15);
        assert_eq!(options.rebuild_threshold, 10);
        assert_eq!(options.min_community_size, 3);
        assert!(!options.dry_run);
    }

    #[test]
    #[should_panic(expected = "similarity threshold must be in [0, 1]")]
    fn test_options_threshold_checked() {
        let _ = SleepOptions::new().with_similarity_threshold(1.5);
    }
}
