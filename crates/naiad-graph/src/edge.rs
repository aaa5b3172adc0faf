//! Edge types for the knowledge graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Traversal direction for variable-length matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outgoing" => Some(Direction::Outgoing),
            "incoming" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

/// A typed relation between two entities (`RELATES_TO`).
///
/// `(source, target, name)` is unique within a group. An edge with
/// `invalid_at` set is historical: it was true, it no longer is. An edge
/// with a non-empty `disputed_by` has at least one episode contradicting it
/// but stays visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEdge {
    pub uuid: Uuid,
    pub group_id: String,
    pub source_node_uuid: Uuid,
    pub target_node_uuid: Uuid,
    /// UPPER_SNAKE_CASE relation label, e.g. `WORKS_AT`.
    pub name: String,
    pub fact_ids: Vec<String>,
    /// Episodes that introduced or confirmed this edge. Set-logical,
    /// stored ordered; deduplicated on insert.
    pub episodes: Vec<Uuid>,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    /// Episodes contradicting this edge.
    pub disputed_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl EntityEdge {
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        source_node_uuid: Uuid,
        target_node_uuid: Uuid,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "relation name cannot be empty");

        Self {
            uuid,
            group_id: group_id.into(),
            source_node_uuid,
            target_node_uuid,
            name,
            fact_ids: Vec::new(),
            episodes: Vec::new(),
            valid_at: created_at,
            invalid_at: None,
            expired_at: None,
            disputed_by: Vec::new(),
            created_at,
        }
    }

    /// Active = not historical.
    pub fn is_active(&self) -> bool {
        self.invalid_at.is_none()
    }

    /// Add a supporting episode, deduplicated.
    pub fn add_episode(&mut self, episode_uuid: Uuid) {
        if !self.episodes.contains(&episode_uuid) {
            self.episodes.push(episode_uuid);
        }
    }

    /// Record a disputing episode, deduplicated.
    pub fn add_dispute(&mut self, episode_uuid: Uuid) {
        if !self.disputed_by.contains(&episode_uuid) {
            self.disputed_by.push(episode_uuid);
        }
    }
}

/// Episode → entity mention link (`MENTIONS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEdge {
    pub uuid: Uuid,
    pub group_id: String,
    /// Episode uuid.
    pub source_node_uuid: Uuid,
    /// Entity uuid.
    pub target_node_uuid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl EpisodicEdge {
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        episode_uuid: Uuid,
        entity_uuid: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            group_id: group_id.into(),
            source_node_uuid: episode_uuid,
            target_node_uuid: entity_uuid,
            created_at,
        }
    }
}

/// Community → entity membership link (`HAS_MEMBER`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityEdge {
    pub uuid: Uuid,
    pub group_id: String,
    /// Community uuid.
    pub source_node_uuid: Uuid,
    /// Entity uuid.
    pub target_node_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CommunityEdge {
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        community_uuid: Uuid,
        entity_uuid: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            group_id: group_id.into(),
            source_node_uuid: community_uuid,
            target_node_uuid: entity_uuid,
            name: "HAS_MEMBER".to_string(),
            description: None,
            created_at,
        }
    }
}
