//! Naiad Graph
//!
//! The bi-temporal property-graph layer: node and edge types, the
//! [`GraphStore`] facade the engine talks to, a deterministic in-memory
//! store for simulation testing, and an optional Neo4j backend.
//!
//! The three node variants (episodic observations, resolved entities,
//! detected communities) share a common header (uuid,
//! group, timestamps). Edges refer to episodes by uuid only, never by
//! pointer, which keeps ownership acyclic even though the knowledge graph
//! itself is cyclic.

mod edge;
mod node;
mod similarity;
mod sim;
mod store;

#[cfg(feature = "neo4j")]
mod neo4j;

pub use edge::{CommunityEdge, Direction, EntityEdge, EpisodicEdge};
pub use node::{CommunityNode, EntityNode, EntityType, EpisodeType, EpisodicNode, Node, NodeLabel};
pub use sim::SimGraphStore;
pub use similarity::cosine_similarity;
pub use store::{
    DateWindow, GraphError, GraphResult, GraphStore, MergeCandidate, ScoredNode,
};

#[cfg(feature = "neo4j")]
pub use neo4j::{Neo4jConfig, Neo4jGraphStore};
