//! Deterministic in-memory graph store
//!
//! TigerStyle: simulation backend with fault injection.
//!
//! Backs every integration test. Iteration order is deterministic (BTreeMap
//! keyed by uuid), traversal is plain BFS, and all similarity math shares
//! [`cosine_similarity`] with the engine, so a seeded test run reproduces
//! byte-for-byte.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use naiad_dst::{FaultInjector, FaultType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::edge::{CommunityEdge, Direction, EntityEdge, EpisodicEdge};
use crate::node::{CommunityNode, EntityNode, EpisodicNode, Node, NodeLabel};
use crate::similarity::cosine_similarity;
use crate::store::{
    DateWindow, GraphError, GraphResult, GraphStore, MergeCandidate, ScoredNode,
};

#[derive(Debug, Default, Clone, Serialize)]
struct GraphData {
    episodes: BTreeMap<Uuid, EpisodicNode>,
    entities: BTreeMap<Uuid, EntityNode>,
    communities: BTreeMap<Uuid, CommunityNode>,
    entity_edges: BTreeMap<Uuid, EntityEdge>,
    episodic_edges: BTreeMap<Uuid, EpisodicEdge>,
    community_edges: BTreeMap<Uuid, CommunityEdge>,
}

/// In-memory graph store for simulation and testing.
#[derive(Clone, Default)]
pub struct SimGraphStore {
    data: Arc<RwLock<GraphData>>,
    faults: Option<Arc<FaultInjector>>,
}

impl SimGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a fault injector. Must be done before the store is shared.
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    fn check_fault(&self, operation: &str) -> GraphResult<()> {
        if let Some(faults) = &self.faults {
            match faults.should_inject(operation) {
                Some(FaultType::GraphWriteFail) | Some(FaultType::GraphReadFail) => {
                    return Err(GraphError::FaultInjected {
                        operation: operation.to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Serialized snapshot of the whole graph; deterministic field and key
    /// order. Test support for before/after comparisons.
    pub async fn snapshot_json(&self) -> serde_json::Value {
        let data = self.data.read().await;
        serde_json::to_value(&*data).unwrap_or(serde_json::Value::Null)
    }

    /// Node counts per kind: (episodes, entities, communities).
    pub async fn node_counts(&self, group_id: &str) -> (usize, usize, usize) {
        let data = self.data.read().await;
        (
            data.episodes.values().filter(|n| n.group_id == group_id).count(),
            data.entities.values().filter(|n| n.group_id == group_id).count(),
            data.communities.values().filter(|n| n.group_id == group_id).count(),
        )
    }

    /// All episodes in a group, test support.
    pub async fn episodes_in_group(&self, group_id: &str) -> Vec<EpisodicNode> {
        let data = self.data.read().await;
        data.episodes
            .values()
            .filter(|n| n.group_id == group_id)
            .cloned()
            .collect()
    }

    /// All MENTIONS edges in a group, test support.
    pub async fn episodic_edges_in_group(&self, group_id: &str) -> Vec<EpisodicEdge> {
        let data = self.data.read().await;
        data.episodic_edges
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect()
    }

    /// All HAS_MEMBER edges in a group, test support.
    pub async fn community_edges_in_group(&self, group_id: &str) -> Vec<CommunityEdge> {
        let data = self.data.read().await;
        data.community_edges
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GraphStore for SimGraphStore {
    async fn upsert_episode(&self, node: &EpisodicNode) -> GraphResult<()> {
        self.check_fault("upsert_episode")?;
        let mut data = self.data.write().await;
        data.episodes.insert(node.uuid, node.clone());
        Ok(())
    }

    async fn upsert_entity(&self, node: &EntityNode) -> GraphResult<()> {
        self.check_fault("upsert_entity")?;
        let mut data = self.data.write().await;
        data.entities.insert(node.uuid, node.clone());
        Ok(())
    }

    async fn upsert_community(&self, node: &CommunityNode) -> GraphResult<()> {
        self.check_fault("upsert_community")?;
        let mut data = self.data.write().await;
        data.communities.insert(node.uuid, node.clone());
        Ok(())
    }

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> GraphResult<()> {
        self.check_fault("upsert_entity_edge")?;
        let mut data = self.data.write().await;
        data.entity_edges.insert(edge.uuid, edge.clone());
        Ok(())
    }

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> GraphResult<()> {
        self.check_fault("upsert_episodic_edge")?;
        let mut data = self.data.write().await;
        data.episodic_edges.insert(edge.uuid, edge.clone());
        Ok(())
    }

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> GraphResult<()> {
        self.check_fault("upsert_community_edge")?;
        let mut data = self.data.write().await;
        data.community_edges.insert(edge.uuid, edge.clone());
        Ok(())
    }

    async fn entity_by_name(
        &self,
        name: &str,
        group_id: &str,
    ) -> GraphResult<Option<EntityNode>> {
        self.check_fault("entity_by_name")?;
        let data = self.data.read().await;
        Ok(data
            .entities
            .values()
            .find(|e| e.group_id == group_id && e.name == name)
            .cloned())
    }

    async fn node_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<Node>> {
        self.check_fault("node_by_uuid")?;
        let data = self.data.read().await;

        if let Some(n) = data.episodes.get(&uuid) {
            return Ok(Some(Node::Episodic(n.clone())));
        }
        if let Some(n) = data.entities.get(&uuid) {
            return Ok(Some(Node::Entity(n.clone())));
        }
        if let Some(n) = data.communities.get(&uuid) {
            return Ok(Some(Node::Community(n.clone())));
        }
        Ok(None)
    }

    async fn entity_edge_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<EntityEdge>> {
        self.check_fault("entity_edge_by_uuid")?;
        let data = self.data.read().await;
        Ok(data.entity_edges.get(&uuid).cloned())
    }

    async fn entity_edge_between(
        &self,
        source_uuid: Uuid,
        target_uuid: Uuid,
        name: &str,
    ) -> GraphResult<Option<EntityEdge>> {
        self.check_fault("entity_edge_between")?;
        let data = self.data.read().await;
        Ok(data
            .entity_edges
            .values()
            .find(|e| {
                e.source_node_uuid == source_uuid
                    && e.target_node_uuid == target_uuid
                    && e.name == name
            })
            .cloned())
    }

    async fn similarity_search(
        &self,
        group_id: &str,
        query_embedding: &[f32],
        labels: &[NodeLabel],
        limit: usize,
        date_window: Option<DateWindow>,
    ) -> GraphResult<Vec<ScoredNode>> {
        self.check_fault("similarity_search")?;
        assert!(limit > 0, "limit must be positive");

        let data = self.data.read().await;
        let mut scored: Vec<ScoredNode> = Vec::new();

        for label in labels {
            match label {
                NodeLabel::Episodic => {
                    for node in data.episodes.values() {
                        if node.group_id != group_id {
                            continue;
                        }
                        // The date window constrains episodic rows only.
                        if let Some(window) = &date_window {
                            if !window.contains(node.valid_at) {
                                continue;
                            }
                        }
                        if let Some(embedding) = &node.embedding {
                            scored.push(ScoredNode {
                                similarity: cosine_similarity(embedding, query_embedding),
                                node: Node::Episodic(node.clone()),
                            });
                        }
                    }
                }
                NodeLabel::Entity => {
                    for node in data.entities.values() {
                        if node.group_id != group_id {
                            continue;
                        }
                        if let Some(embedding) = &node.summary_embedding {
                            scored.push(ScoredNode {
                                similarity: cosine_similarity(embedding, query_embedding),
                                node: Node::Entity(node.clone()),
                            });
                        }
                    }
                }
                NodeLabel::Community => {
                    for node in data.communities.values() {
                        if node.group_id != group_id {
                            continue;
                        }
                        if let Some(embedding) = &node.summary_embedding {
                            scored.push(ScoredNode {
                                similarity: cosine_similarity(embedding, query_embedding),
                                node: Node::Community(node.clone()),
                            });
                        }
                    }
                }
            }
        }

        // Uuid tiebreak keeps equal-score ordering stable across runs.
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node.uuid().cmp(&b.node.uuid()))
        });
        scored.truncate(limit);

        Ok(scored)
    }

    async fn neighbors(
        &self,
        seed_uuids: &[Uuid],
        hops: u32,
        direction: Direction,
        group_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<EntityNode>> {
        self.check_fault("neighbors")?;
        assert!(hops > 0, "hop count must be positive");

        let data = self.data.read().await;
        let seeds: HashSet<Uuid> = seed_uuids.iter().copied().collect();

        let mut visited: BTreeSet<Uuid> = seeds.iter().copied().collect();
        let mut frontier: BTreeSet<Uuid> = seeds.iter().copied().collect();
        let mut reached: BTreeSet<Uuid> = BTreeSet::new();

        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let mut next: BTreeSet<Uuid> = BTreeSet::new();

            for edge in data.entity_edges.values() {
                if edge.group_id != group_id {
                    continue;
                }
                let forward = frontier.contains(&edge.source_node_uuid);
                let backward = frontier.contains(&edge.target_node_uuid);

                let candidate = match direction {
                    Direction::Outgoing if forward => Some(edge.target_node_uuid),
                    Direction::Incoming if backward => Some(edge.source_node_uuid),
                    Direction::Both if forward => Some(edge.target_node_uuid),
                    Direction::Both if backward => Some(edge.source_node_uuid),
                    _ => None,
                };

                if let Some(uuid) = candidate {
                    if visited.insert(uuid) {
                        next.insert(uuid);
                        if !seeds.contains(&uuid) {
                            reached.insert(uuid);
                        }
                    }
                }
            }

            frontier = next;
        }

        let mut result: Vec<EntityNode> = reached
            .iter()
            .filter_map(|uuid| data.entities.get(uuid))
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect();
        result.truncate(limit);

        Ok(result)
    }

    async fn edges_among(&self, uuids: &[Uuid], group_id: &str) -> GraphResult<Vec<EntityEdge>> {
        self.check_fault("edges_among")?;
        let set: HashSet<Uuid> = uuids.iter().copied().collect();
        let data = self.data.read().await;

        Ok(data
            .entity_edges
            .values()
            .filter(|e| {
                e.group_id == group_id
                    && set.contains(&e.source_node_uuid)
                    && set.contains(&e.target_node_uuid)
            })
            .cloned()
            .collect())
    }

    async fn community_members(
        &self,
        community_uuids: &[Uuid],
        group_id: &str,
    ) -> GraphResult<Vec<EntityNode>> {
        self.check_fault("community_members")?;
        let set: HashSet<Uuid> = community_uuids.iter().copied().collect();
        let data = self.data.read().await;

        let mut seen: BTreeSet<Uuid> = BTreeSet::new();
        for edge in data.community_edges.values() {
            if edge.group_id == group_id && set.contains(&edge.source_node_uuid) {
                seen.insert(edge.target_node_uuid);
            }
        }

        Ok(seen
            .iter()
            .filter_map(|uuid| data.entities.get(uuid))
            .cloned()
            .collect())
    }

    async fn entities_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityNode>> {
        self.check_fault("entities_in_group")?;
        let data = self.data.read().await;
        Ok(data
            .entities
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn entity_edges_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityEdge>> {
        self.check_fault("entity_edges_in_group")?;
        let data = self.data.read().await;
        Ok(data
            .entity_edges
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn communities_in_group(&self, group_id: &str) -> GraphResult<Vec<CommunityNode>> {
        self.check_fault("communities_in_group")?;
        let data = self.data.read().await;
        Ok(data
            .communities
            .values()
            .filter(|c| c.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn edges_of_entity(
        &self,
        entity_uuid: Uuid,
        direction: Direction,
        active_only: bool,
    ) -> GraphResult<Vec<EntityEdge>> {
        self.check_fault("edges_of_entity")?;
        let data = self.data.read().await;

        Ok(data
            .entity_edges
            .values()
            .filter(|e| match direction {
                Direction::Outgoing => e.source_node_uuid == entity_uuid,
                Direction::Incoming => e.target_node_uuid == entity_uuid,
                Direction::Both => {
                    e.source_node_uuid == entity_uuid || e.target_node_uuid == entity_uuid
                }
            })
            .filter(|e| !active_only || e.is_active())
            .cloned()
            .collect())
    }

    async fn unconsolidated_mentions(
        &self,
        group_id: &str,
        before: DateTime<Utc>,
    ) -> GraphResult<Vec<(Uuid, EpisodicNode)>> {
        self.check_fault("unconsolidated_mentions")?;
        let data = self.data.read().await;

        let mut result = Vec::new();
        for edge in data.episodic_edges.values() {
            if edge.group_id != group_id {
                continue;
            }
            let Some(episode) = data.episodes.get(&edge.source_node_uuid) else {
                continue;
            };
            if episode.consolidated_at.is_some() || episode.created_at >= before {
                continue;
            }
            result.push((edge.target_node_uuid, episode.clone()));
        }

        Ok(result)
    }

    async fn merge_candidates(&self, group_id: &str) -> GraphResult<Vec<MergeCandidate>> {
        self.check_fault("merge_candidates")?;
        let data = self.data.read().await;

        let entities: Vec<&EntityNode> = data
            .entities
            .values()
            .filter(|e| e.group_id == group_id)
            .collect();

        let degree = |uuid: Uuid| -> usize {
            let relates = data
                .entity_edges
                .values()
                .filter(|e| e.source_node_uuid == uuid || e.target_node_uuid == uuid)
                .count();
            let mentions = data
                .episodic_edges
                .values()
                .filter(|e| e.target_node_uuid == uuid)
                .count();
            relates + mentions
        };

        let mut pairs = Vec::new();
        for (i, a) in entities.iter().enumerate() {
            for b in entities.iter().skip(i + 1) {
                // BTreeMap iteration already yields ascending uuids.
                debug_assert!(a.uuid < b.uuid);

                if a.name == b.name {
                    continue;
                }
                let a_lower = a.name.to_lowercase();
                let b_lower = b.name.to_lowercase();
                if !a_lower.contains(&b_lower) && !b_lower.contains(&a_lower) {
                    continue;
                }

                pairs.push(MergeCandidate {
                    a: (*a).clone(),
                    b: (*b).clone(),
                    degree_a: degree(a.uuid),
                    degree_b: degree(b.uuid),
                });
            }
        }

        Ok(pairs)
    }

    async fn merge_entity_into(&self, duplicate: Uuid, canonical: Uuid) -> GraphResult<()> {
        self.check_fault("merge_entity_into")?;
        assert_ne!(duplicate, canonical, "cannot merge an entity into itself");

        let mut data = self.data.write().await;

        if !data.entities.contains_key(&canonical) {
            return Err(GraphError::NotFound {
                resource: "entity",
                id: canonical.to_string(),
            });
        }

        // Redirect RELATES_TO, skipping would-be self-loops on the canonical.
        enum Redirect {
            Source,
            Target,
            Drop,
        }

        let actions: Vec<(Uuid, Redirect)> = data
            .entity_edges
            .iter()
            .filter_map(|(&uuid, edge)| {
                if edge.source_node_uuid == duplicate {
                    if edge.target_node_uuid == canonical {
                        Some((uuid, Redirect::Drop))
                    } else {
                        Some((uuid, Redirect::Source))
                    }
                } else if edge.target_node_uuid == duplicate {
                    if edge.source_node_uuid == canonical {
                        Some((uuid, Redirect::Drop))
                    } else {
                        Some((uuid, Redirect::Target))
                    }
                } else {
                    None
                }
            })
            .collect();

        for (uuid, action) in actions {
            match action {
                Redirect::Drop => {
                    data.entity_edges.remove(&uuid);
                }
                Redirect::Source => {
                    if let Some(edge) = data.entity_edges.get_mut(&uuid) {
                        edge.source_node_uuid = canonical;
                    }
                }
                Redirect::Target => {
                    if let Some(edge) = data.entity_edges.get_mut(&uuid) {
                        edge.target_node_uuid = canonical;
                    }
                }
            }
        }

        // Redirect MENTIONS.
        for edge in data.episodic_edges.values_mut() {
            if edge.target_node_uuid == duplicate {
                edge.target_node_uuid = canonical;
            }
        }

        // Membership links die with the duplicate.
        data.community_edges
            .retain(|_, e| e.target_node_uuid != duplicate);

        data.entities.remove(&duplicate);
        Ok(())
    }

    async fn delete_orphan_edges(&self, group_id: &str) -> GraphResult<u64> {
        self.check_fault("delete_orphan_edges")?;
        let mut data = self.data.write().await;

        let before = data.entity_edges.len();
        data.entity_edges
            .retain(|_, e| e.group_id != group_id || !e.episodes.is_empty());
        Ok((before - data.entity_edges.len()) as u64)
    }

    async fn detach_delete(&self, uuid: Uuid) -> GraphResult<()> {
        self.check_fault("detach_delete")?;
        let mut data = self.data.write().await;

        data.episodes.remove(&uuid);
        data.entities.remove(&uuid);
        data.communities.remove(&uuid);

        data.entity_edges
            .retain(|_, e| e.source_node_uuid != uuid && e.target_node_uuid != uuid);
        data.episodic_edges
            .retain(|_, e| e.source_node_uuid != uuid && e.target_node_uuid != uuid);
        data.community_edges
            .retain(|_, e| e.source_node_uuid != uuid && e.target_node_uuid != uuid);

        Ok(())
    }

    async fn delete_entity_edge(&self, uuid: Uuid) -> GraphResult<()> {
        self.check_fault("delete_entity_edge")?;
        let mut data = self.data.write().await;
        data.entity_edges.remove(&uuid);
        Ok(())
    }

    async fn delete_community_edges(&self, community_uuid: Uuid) -> GraphResult<()> {
        self.check_fault("delete_community_edges")?;
        let mut data = self.data.write().await;
        data.community_edges
            .retain(|_, e| e.source_node_uuid != community_uuid);
        Ok(())
    }
}
