//! Retrieval engine
//!
//! Search = embedding similarity over all three node kinds, plus community
//! routing (communities pull their members in), optional k-hop graph
//! expansion, and temporal re-ranking of episodic hits. Traverse = the
//! induced subgraph around one entity.

use chrono::{DateTime, Utc};
use naiad_core::constants::{
    CONTEMPORANEITY_HALF_LIFE_DAYS, EXPAND_HOPS_DEFAULT, GRAPH_EXPAND_CAP_FACTOR,
    HALF_LIFE_DAYS_DEFAULT, SEARCH_LIMIT_DEFAULT, TEMPORAL_ALPHA_DEFAULT,
};
use naiad_graph::{
    cosine_similarity, DateWindow, Direction, EntityEdge, EntityNode, GraphStore, Node, NodeLabel,
};
use naiad_providers::EmbeddingProvider;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Parameters
// =============================================================================

/// Parameters for `search`.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub group_id: Option<String>,
    pub limit: Option<usize>,
    /// Expand entity seeds through RELATES_TO neighbours.
    pub graph_expand: bool,
    pub expand_hops: Option<u32>,
    /// Inclusive episodic date window.
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Anchor for temporal re-ranking; absent = no re-ranking.
    pub query_time: Option<DateTime<Utc>>,
    pub temporal_alpha: Option<f64>,
    pub half_life_days: Option<f64>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            group_id: None,
            limit: None,
            graph_expand: false,
            expand_hops: None,
            valid_from: None,
            valid_to: None,
            query_time: None,
            temporal_alpha: None,
            half_life_days: None,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "limit must be positive");
        self.limit = Some(limit);
        self
    }

    pub fn with_graph_expand(mut self, hops: u32) -> Self {
        self.graph_expand = true;
        self.expand_hops = Some(hops);
        self
    }

    pub fn with_window(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    pub fn with_query_time(mut self, query_time: DateTime<Utc>) -> Self {
        self.query_time = Some(query_time);
        self
    }

    pub fn with_temporal(mut self, alpha: f64, half_life_days: f64) -> Self {
        self.temporal_alpha = Some(alpha);
        self.half_life_days = Some(half_life_days);
        self
    }
}

/// Parameters for `traverse`.
#[derive(Debug, Clone, Default)]
pub struct TraverseParams {
    pub start_entity_uuid: Option<Uuid>,
    pub start_entity_name: Option<String>,
    pub max_hops: Option<u32>,
    pub direction: Direction,
    pub group_id: Option<String>,
    pub limit: Option<usize>,
}

/// The induced subgraph around a start entity.
#[derive(Debug, Clone)]
pub struct TraverseResult {
    pub start: EntityNode,
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EntityEdge>,
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct RetrievalEngine {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    #[tracing::instrument(skip(self, params), fields(query_len = params.query.len()))]
    pub async fn search(&self, params: &SearchParams, group_id: &str) -> EngineResult<Vec<Node>> {
        if params.query.is_empty() {
            return Err(EngineError::validation("query cannot be empty"));
        }

        let limit = params.limit.unwrap_or(SEARCH_LIMIT_DEFAULT);
        let query_embedding = self.embedder.embed(&params.query).await?;

        let window = if params.valid_from.is_some() || params.valid_to.is_some() {
            Some(DateWindow {
                valid_from: params.valid_from,
                valid_to: params.valid_to,
            })
        } else {
            None
        };

        // Similarity tier.
        let scored = self
            .store
            .similarity_search(group_id, &query_embedding, &NodeLabel::all(), limit, window)
            .await?;

        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        let mut results: Vec<(Node, f64)> = Vec::new();
        for hit in scored {
            if seen.insert(hit.node.uuid()) {
                results.push((hit.node, hit.similarity));
            }
        }

        // Community routing: members of any community hit join the pool.
        let community_uuids: Vec<Uuid> = results
            .iter()
            .filter(|(node, _)| node.label() == NodeLabel::Community)
            .map(|(node, _)| node.uuid())
            .collect();
        if !community_uuids.is_empty() {
            let members = self
                .store
                .community_members(&community_uuids, group_id)
                .await?;
            for member in members {
                if seen.insert(member.uuid) {
                    let base = member
                        .summary_embedding
                        .as_deref()
                        .map(|e| cosine_similarity(e, &query_embedding))
                        .unwrap_or(0.0);
                    results.push((Node::Entity(member), base));
                }
            }
        }

        // Graph expansion from entity seeds.
        if params.graph_expand {
            let hops = params.expand_hops.unwrap_or(EXPAND_HOPS_DEFAULT);
            let seeds: Vec<Uuid> = results
                .iter()
                .filter(|(node, _)| node.label() == NodeLabel::Entity)
                .map(|(node, _)| node.uuid())
                .collect();

            if !seeds.is_empty() {
                let neighbors = self
                    .store
                    .neighbors(
                        &seeds,
                        hops,
                        Direction::Both,
                        group_id,
                        GRAPH_EXPAND_CAP_FACTOR * limit,
                    )
                    .await?;
                for neighbor in neighbors {
                    if seen.insert(neighbor.uuid) {
                        let base = neighbor
                            .summary_embedding
                            .as_deref()
                            .map(|e| cosine_similarity(e, &query_embedding))
                            .unwrap_or(0.0);
                        results.push((Node::Entity(neighbor), base));
                    }
                }
            }
        }

        // Temporal re-ranking of episodic hits.
        if let Some(query_time) = params.query_time {
            let alpha = params.temporal_alpha.unwrap_or(TEMPORAL_ALPHA_DEFAULT);
            let half_life = params.half_life_days.unwrap_or(HALF_LIFE_DAYS_DEFAULT);

            for (node, score) in results.iter_mut() {
                if let Node::Episodic(episode) = node {
                    *score = adjusted_score(*score, episode.valid_at, episode.retroactive_days, query_time, alpha, half_life);
                }
            }
        }

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.uuid().cmp(&b.0.uuid()))
        });

        // Expansions may push the list past `limit`; trimming is the
        // caller's call.
        Ok(results.into_iter().map(|(node, _)| node).collect())
    }

    pub async fn traverse(
        &self,
        params: &TraverseParams,
        group_id: &str,
    ) -> EngineResult<TraverseResult> {
        let start = match (&params.start_entity_uuid, &params.start_entity_name) {
            (Some(uuid), _) => self
                .store
                .node_by_uuid(*uuid)
                .await?
                .and_then(|n| n.as_entity().cloned()),
            (None, Some(name)) => self.store.entity_by_name(name, group_id).await?,
            (None, None) => {
                return Err(EngineError::validation(
                    "traverse requires start_entity_uuid or start_entity_name",
                ))
            }
        };

        let Some(start) = start else {
            return Err(EngineError::Graph(naiad_graph::GraphError::NotFound {
                resource: "entity",
                id: params
                    .start_entity_name
                    .clone()
                    .or_else(|| params.start_entity_uuid.map(|u| u.to_string()))
                    .unwrap_or_default(),
            }));
        };

        let hops = params.max_hops.unwrap_or(EXPAND_HOPS_DEFAULT);
        let limit = params.limit.unwrap_or(SEARCH_LIMIT_DEFAULT * 10);

        let nodes = self
            .store
            .neighbors(&[start.uuid], hops, params.direction, group_id, limit)
            .await?;

        let mut uuids: Vec<Uuid> = nodes.iter().map(|n| n.uuid).collect();
        uuids.push(start.uuid);
        let edges = self.store.edges_among(&uuids, group_id).await?;

        Ok(TraverseResult { start, nodes, edges })
    }
}

/// Episodic score boost: `base * (1 + alpha * proximity * contemporaneity)`.
///
/// `proximity` decays with distance from the query time; `contemporaneity`
/// damps episodes that were recorded long after the event they describe.
fn adjusted_score(
    base: f64,
    valid_at: DateTime<Utc>,
    retroactive_days: i64,
    query_time: DateTime<Utc>,
    alpha: f64,
    half_life_days: f64,
) -> f64 {
    debug_assert!(half_life_days > 0.0, "half life must be positive");

    let distance_days = (valid_at - query_time).num_seconds().abs() as f64 / 86_400.0;
    let proximity = (-distance_days / half_life_days).exp();
    let contemporaneity = (-(retroactive_days as f64) / CONTEMPORANEITY_HALF_LIFE_DAYS).exp();

    base * (1.0 + alpha * proximity * contemporaneity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_adjusted_score_favors_proximity() {
        let query_time = ts("2025-01-01T00:00:00Z");

        let near = adjusted_score(0.5, ts("2025-01-01T00:00:00Z"), 0, query_time, 0.3, 30.0);
        let far = adjusted_score(0.5, ts("2024-01-01T00:00:00Z"), 0, query_time, 0.3, 30.0);

        assert!(near > far);
        assert!((near - 0.5 * 1.3).abs() < 1e-9); // zero distance, full boost
    }

    #[test]
    fn test_adjusted_score_damped_by_retroactivity() {
        let query_time = ts("2025-01-01T00:00:00Z");
        let valid_at = ts("2025-01-01T00:00:00Z");

        let live = adjusted_score(0.5, valid_at, 0, query_time, 0.3, 30.0);
        let backdated = adjusted_score(0.5, valid_at, 60, query_time, 0.3, 30.0);

        assert!(live > backdated);
        assert!(backdated > 0.5); // damped, never negative
    }

    #[test]
    fn test_adjusted_score_zero_alpha_is_identity() {
        let query_time = ts("2025-01-01T00:00:00Z");
        let score = adjusted_score(0.42, query_time, 0, query_time, 0.0, 30.0);
        assert!((score - 0.42).abs() < 1e-12);
    }

    #[test]
    fn test_search_params_builder() {
        let params = SearchParams::new("q")
            .with_group_id("g")
            .with_limit(5)
            .with_graph_expand(3)
            .with_query_time(ts("2025-01-01T00:00:00Z"))
            .with_temporal(0.4, 14.0);

        assert_eq!(params.limit, Some(5));
        assert!(params.graph_expand);
        assert_eq!(params.expand_hops, Some(3));
        assert_eq!(params.temporal_alpha, Some(0.4));
    }

    #[test]
    #[should_panic(expected = "limit must be positive")]
    fn test_search_params_zero_limit_panics() {
        let _ = SearchParams::new("q").with_limit(0);
    }
}
