//! Graph store facade
//!
//! TigerStyle: trait-based abstraction for DST compatibility.
//!
//! The facade exposes the minimum typed vocabulary the pipeline uses; a
//! backend is free to issue Cypher, SQL, or in-memory operations as long as
//! the semantics hold. Every upsert merges by uuid and replaces all
//! properties in a single statement, so a failed call never leaves a
//! half-written node.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::edge::{CommunityEdge, Direction, EntityEdge, EpisodicEdge};
use crate::node::{CommunityNode, EntityNode, EpisodicNode, Node, NodeLabel};

// =============================================================================
// Errors
// =============================================================================

/// Errors from graph store operations.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("not found: {resource} with id '{id}'")]
    NotFound { resource: &'static str, id: String },

    #[error("write failed: {operation}, reason: {reason}")]
    WriteFailed { operation: String, reason: String },

    #[error("read failed: {operation}, reason: {reason}")]
    ReadFailed { operation: String, reason: String },

    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("fault injected: {operation}")]
    FaultInjected { operation: String },
}

impl GraphError {
    /// Whether retrying the same call can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GraphError::WriteFailed { .. }
                | GraphError::ReadFailed { .. }
                | GraphError::ConnectionFailed { .. }
                | GraphError::FaultInjected { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

// =============================================================================
// Query shapes
// =============================================================================

/// Inclusive date window applied to episodic `valid_at` during similarity
/// search. Entity and community rows pass through unfiltered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateWindow {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn is_empty(&self) -> bool {
        self.valid_from.is_none() && self.valid_to.is_none()
    }

    /// Whether an episodic `valid_at` falls inside the window.
    pub fn contains(&self, valid_at: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if valid_at < from {
                return false;
            }
        }
        if let Some(to) = self.valid_to {
            if valid_at > to {
                return false;
            }
        }
        true
    }
}

/// A node with its cosine similarity against the query vector.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Node,
    pub similarity: f64,
}

/// A candidate duplicate pair surfaced by name containment, with incident
/// edge degrees for canonical selection.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub a: EntityNode,
    pub b: EntityNode,
    /// RELATES_TO + MENTIONS incident to `a`.
    pub degree_a: usize,
    /// RELATES_TO + MENTIONS incident to `b`.
    pub degree_b: usize,
}

// =============================================================================
// Store trait
// =============================================================================

/// Typed facade over the property-graph backend.
///
/// Implementations must marshal integer bounds (limits, hop counts) as
/// integers on the wire; a float `LIMIT` is a backend error, not a rounding
/// concern.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // =========================================================================
    // Upserts (merge by uuid, set all properties)
    // =========================================================================

    async fn upsert_episode(&self, node: &EpisodicNode) -> GraphResult<()>;

    async fn upsert_entity(&self, node: &EntityNode) -> GraphResult<()>;

    async fn upsert_community(&self, node: &CommunityNode) -> GraphResult<()>;

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> GraphResult<()>;

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> GraphResult<()>;

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> GraphResult<()>;

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Exact, case-sensitive name lookup within a group.
    async fn entity_by_name(&self, name: &str, group_id: &str)
        -> GraphResult<Option<EntityNode>>;

    /// Fetch any node by uuid, dispatching on its label.
    async fn node_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<Node>>;

    async fn entity_edge_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<EntityEdge>>;

    /// The unique `(source, target, name)` edge, if present.
    async fn entity_edge_between(
        &self,
        source_uuid: Uuid,
        target_uuid: Uuid,
        name: &str,
    ) -> GraphResult<Option<EntityEdge>>;

    // =========================================================================
    // Search & traversal
    // =========================================================================

    /// Cosine-similarity search over nodes carrying an embedding, restricted
    /// to the given labels, ordered descending. The date window filters
    /// episodic rows only.
    async fn similarity_search(
        &self,
        group_id: &str,
        query_embedding: &[f32],
        labels: &[NodeLabel],
        limit: usize,
        date_window: Option<DateWindow>,
    ) -> GraphResult<Vec<ScoredNode>>;

    /// Entities reachable within `hops` RELATES_TO edges of the seeds.
    /// Seeds themselves are not returned.
    async fn neighbors(
        &self,
        seed_uuids: &[Uuid],
        hops: u32,
        direction: Direction,
        group_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<EntityNode>>;

    /// All RELATES_TO edges whose endpoints are both in `uuids`.
    async fn edges_among(&self, uuids: &[Uuid], group_id: &str) -> GraphResult<Vec<EntityEdge>>;

    /// Entity members of the given communities.
    async fn community_members(
        &self,
        community_uuids: &[Uuid],
        group_id: &str,
    ) -> GraphResult<Vec<EntityNode>>;

    // =========================================================================
    // Bulk reads (sleep engine)
    // =========================================================================

    async fn entities_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityNode>>;

    async fn entity_edges_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityEdge>>;

    async fn communities_in_group(&self, group_id: &str) -> GraphResult<Vec<CommunityNode>>;

    /// RELATES_TO edges incident to an entity, optionally restricted to
    /// active (non-historical) edges.
    async fn edges_of_entity(
        &self,
        entity_uuid: Uuid,
        direction: Direction,
        active_only: bool,
    ) -> GraphResult<Vec<EntityEdge>>;

    /// `(entity_uuid, episode)` pairs for every MENTIONS edge whose episode
    /// is unconsolidated and created before `before`. Phase-1 cluster
    /// discovery groups these by entity.
    async fn unconsolidated_mentions(
        &self,
        group_id: &str,
        before: DateTime<Utc>,
    ) -> GraphResult<Vec<(Uuid, EpisodicNode)>>;

    /// Candidate duplicate pairs: distinct names where one contains the
    /// other case-insensitively, `a.uuid < b.uuid`, with degrees.
    async fn merge_candidates(&self, group_id: &str) -> GraphResult<Vec<MergeCandidate>>;

    // =========================================================================
    // Mutation (sleep engine)
    // =========================================================================

    /// Redirect every RELATES_TO and MENTIONS edge from `duplicate` onto
    /// `canonical` (carrying properties, skipping self-loops onto the
    /// canonical), then detach-delete the duplicate.
    async fn merge_entity_into(&self, duplicate: Uuid, canonical: Uuid) -> GraphResult<()>;

    /// Delete RELATES_TO edges with no supporting episodes. Returns the
    /// number removed.
    async fn delete_orphan_edges(&self, group_id: &str) -> GraphResult<u64>;

    /// Delete a node and all incident edges.
    async fn detach_delete(&self, uuid: Uuid) -> GraphResult<()>;

    /// Delete a single RELATES_TO edge by uuid.
    async fn delete_entity_edge(&self, uuid: Uuid) -> GraphResult<()>;

    /// Delete all HAS_MEMBER edges of a community (rebuild precursor).
    async fn delete_community_edges(&self, community_uuid: Uuid) -> GraphResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_retriable() {
        let write = GraphError::WriteFailed {
            operation: "upsert_entity".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(write.is_retriable());

        let missing = GraphError::NotFound {
            resource: "entity",
            id: "123".to_string(),
        };
        assert!(!missing.is_retriable());
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_date_window_contains() {
        let from: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2024-12-31T00:00:00Z".parse().unwrap();
        let window = DateWindow {
            valid_from: Some(from),
            valid_to: Some(to),
        };

        assert!(window.contains("2024-06-01T00:00:00Z".parse().unwrap()));
        assert!(window.contains(from));
        assert!(window.contains(to));
        assert!(!window.contains("2023-12-31T23:59:59Z".parse().unwrap()));
        assert!(!window.contains("2025-01-01T00:00:00Z".parse().unwrap()));
    }

    #[test]
    fn test_date_window_open_ended() {
        let window = DateWindow {
            valid_from: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            valid_to: None,
        };

        assert!(window.contains("2030-01-01T00:00:00Z".parse().unwrap()));
        assert!(!window.contains("2020-01-01T00:00:00Z".parse().unwrap()));
    }
}
