//! Node types for the knowledge graph
//!
//! TigerStyle: tagged sum type over the three node variants instead of one
//! catch-all record with optional fields.

use chrono::{DateTime, Utc};
use naiad_core::constants::{EPISODE_NAME_CHARS_MAX, SECONDS_PER_DAY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Graph labels the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Entity,
    Episodic,
    Community,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Entity => "Entity",
            NodeLabel::Episodic => "Episodic",
            NodeLabel::Community => "Community",
        }
    }

    /// All labels, in the order retrieval unions them.
    pub fn all() -> [NodeLabel; 3] {
        [NodeLabel::Entity, NodeLabel::Episodic, NodeLabel::Community]
    }
}

/// How an episode arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    Message,
    Json,
    #[default]
    Text,
}

impl EpisodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeType::Message => "message",
            EpisodeType::Json => "json",
            EpisodeType::Text => "text",
        }
    }

    /// Parse, defaulting to `Text` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "message" => EpisodeType::Message,
            "json" => EpisodeType::Json,
            _ => EpisodeType::Text,
        }
    }
}

/// Canonical entity categories the extraction prompt is allowed to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Product,
    Event,
    Concept,
    Technology,
    Other,
    /// Extraction produced something outside the enum; healed on merge.
    #[default]
    Unknown,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Organization => "Organization",
            EntityType::Location => "Location",
            EntityType::Product => "Product",
            EntityType::Event => "Event",
            EntityType::Concept => "Concept",
            EntityType::Technology => "Technology",
            EntityType::Other => "Other",
            EntityType::Unknown => "Unknown",
        }
    }

    /// Parse, defaulting to `Unknown` for values outside the enum.
    pub fn parse(s: &str) -> Self {
        match s {
            "Person" => EntityType::Person,
            "Organization" => EntityType::Organization,
            "Location" => EntityType::Location,
            "Product" => EntityType::Product,
            "Event" => EntityType::Event,
            "Concept" => EntityType::Concept,
            "Technology" => EntityType::Technology,
            "Other" => EntityType::Other,
            _ => EntityType::Unknown,
        }
    }

    /// The values the extraction prompt may use.
    pub fn prompt_values() -> &'static str {
        "Person, Organization, Location, Product, Event, Concept, Technology, Other"
    }
}

// =============================================================================
// Episodic
// =============================================================================

/// A single ingested observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicNode {
    pub uuid: Uuid,
    pub group_id: String,
    /// Display name: leading slice of the content.
    pub name: String,
    pub episode_type: EpisodeType,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    /// When the described event occurred (defaults to ingestion time).
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    /// When the episode was ingested.
    pub created_at: DateTime<Utc>,
    pub reference_id: Option<String>,
    /// Whole days between occurrence and ingestion; 0 for live episodes.
    pub retroactive_days: i64,
    /// Episodes contradicting this one.
    pub disputed_by: Vec<Uuid>,
    /// Set by the sleep engine; absent = unconsolidated.
    pub consolidated_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

impl EpisodicNode {
    /// Build an episode. `valid_at` falls back to `created_at`.
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        episode_type: EpisodeType,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        valid_at: Option<DateTime<Utc>>,
    ) -> Self {
        let content = content.into();
        let valid_at = valid_at.unwrap_or(created_at);

        Self {
            uuid,
            group_id: group_id.into(),
            name: display_name(&content),
            episode_type,
            content,
            embedding: None,
            valid_at,
            invalid_at: None,
            created_at,
            reference_id: None,
            retroactive_days: retroactive_days(created_at, valid_at),
            disputed_by: Vec::new(),
            consolidated_at: None,
            metadata: None,
        }
    }

    /// Record a disputing episode, deduplicated.
    pub fn add_dispute(&mut self, episode_uuid: Uuid) {
        if !self.disputed_by.contains(&episode_uuid) {
            self.disputed_by.push(episode_uuid);
        }
    }
}

/// Whole days between ingestion and occurrence, floored at zero.
pub(crate) fn retroactive_days(created_at: DateTime<Utc>, valid_at: DateTime<Utc>) -> i64 {
    let delta_secs = (created_at - valid_at).num_seconds();
    (delta_secs / SECONDS_PER_DAY).max(0)
}

fn display_name(content: &str) -> String {
    content.chars().take(EPISODE_NAME_CHARS_MAX).collect()
}

// =============================================================================
// Entity
// =============================================================================

/// A resolved real-world entity.
///
/// `(name, group_id)` is unique. `summary_embedding` is kept in sync with
/// `summary`: both are rewritten together, never separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    pub uuid: Uuid,
    pub group_id: String,
    /// Canonical name.
    pub name: String,
    pub entity_type: EntityType,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
    pub fact_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub consolidated_at: Option<DateTime<Utc>>,
}

impl EntityNode {
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        name: impl Into<String>,
        entity_type: EntityType,
        summary: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "entity name cannot be empty");

        Self {
            uuid,
            group_id: group_id.into(),
            name,
            entity_type,
            summary: summary.into(),
            summary_embedding: None,
            fact_ids: Vec::new(),
            created_at,
            consolidated_at: None,
        }
    }

    /// Rewrite summary and embedding together.
    pub fn set_summary(&mut self, summary: impl Into<String>, embedding: Vec<f32>) {
        self.summary = summary.into();
        self.summary_embedding = Some(embedding);
    }
}

// =============================================================================
// Community
// =============================================================================

/// A detected cluster of entities, acting as a routing tier in retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityNode {
    pub uuid: Uuid,
    pub group_id: String,
    pub name: String,
    /// 0 = base level.
    pub community_level: u32,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
    pub member_entity_ids: Vec<Uuid>,
    pub member_count: usize,
    /// Lowercase kebab-case topic tags.
    pub domain_hints: Vec<String>,
    /// In [0, 1].
    pub importance_score: f64,
    pub entity_count_at_last_rebuild: usize,
    pub last_full_rebuild: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CommunityNode {
    pub fn new(
        uuid: Uuid,
        group_id: impl Into<String>,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            group_id: group_id.into(),
            name: name.into(),
            community_level: 0,
            summary: String::new(),
            summary_embedding: None,
            member_entity_ids: Vec::new(),
            member_count: 0,
            domain_hints: Vec::new(),
            importance_score: 0.0,
            entity_count_at_last_rebuild: 0,
            last_full_rebuild: None,
            created_at,
        }
    }
}

// =============================================================================
// Tagged node
// =============================================================================

/// Tagged union over the three node variants.
///
/// Store implementations dispatch on the row's label to materialise the
/// right variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum Node {
    Episodic(EpisodicNode),
    Entity(EntityNode),
    Community(CommunityNode),
}

impl Node {
    pub fn uuid(&self) -> Uuid {
        match self {
            Node::Episodic(n) => n.uuid,
            Node::Entity(n) => n.uuid,
            Node::Community(n) => n.uuid,
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Node::Episodic(n) => &n.group_id,
            Node::Entity(n) => &n.group_id,
            Node::Community(n) => &n.group_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Episodic(n) => &n.name,
            Node::Entity(n) => &n.name,
            Node::Community(n) => &n.name,
        }
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            Node::Episodic(_) => NodeLabel::Episodic,
            Node::Entity(_) => NodeLabel::Entity,
            Node::Community(_) => NodeLabel::Community,
        }
    }

    /// The vector this node is indexed under.
    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Node::Episodic(n) => n.embedding.as_deref(),
            Node::Entity(n) => n.summary_embedding.as_deref(),
            Node::Community(n) => n.summary_embedding.as_deref(),
        }
    }

    pub fn as_entity(&self) -> Option<&EntityNode> {
        match self {
            Node::Entity(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_episodic(&self) -> Option<&EpisodicNode> {
        match self {
            Node::Episodic(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_community(&self) -> Option<&CommunityNode> {
        match self {
            Node::Community(n) => Some(n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_episode_name_truncation() {
        let long = "x".repeat(200);
        let node = EpisodicNode::new(
            Uuid::nil(),
            "g",
            EpisodeType::Text,
            long,
            ts("2024-01-01T00:00:00Z"),
            None,
        );
        assert_eq!(node.name.len(), EPISODE_NAME_CHARS_MAX);
    }

    #[test]
    fn test_episode_valid_at_defaults_to_created_at() {
        let created = ts("2024-06-01T12:00:00Z");
        let node = EpisodicNode::new(Uuid::nil(), "g", EpisodeType::Text, "hi", created, None);

        assert_eq!(node.valid_at, created);
        assert_eq!(node.retroactive_days, 0);
    }

    #[test]
    fn test_retroactive_days_backdated() {
        let created = ts("2024-06-11T00:00:00Z");
        let valid = ts("2024-06-01T00:00:00Z");
        let node =
            EpisodicNode::new(Uuid::nil(), "g", EpisodeType::Text, "hi", created, Some(valid));

        assert_eq!(node.retroactive_days, 10);
    }

    #[test]
    fn test_retroactive_days_future_event_clamps_to_zero() {
        let created = ts("2024-06-01T00:00:00Z");
        let valid = ts("2024-06-11T00:00:00Z");
        assert_eq!(retroactive_days(created, valid), 0);
    }

    #[test]
    fn test_retroactive_days_partial_day_floors() {
        let created = ts("2024-06-02T23:00:00Z");
        let valid = ts("2024-06-01T00:00:00Z");
        assert_eq!(retroactive_days(created, valid), 1);
    }

    #[test]
    fn test_episode_dispute_dedup() {
        let mut node = EpisodicNode::new(
            Uuid::nil(),
            "g",
            EpisodeType::Text,
            "hi",
            ts("2024-01-01T00:00:00Z"),
            None,
        );
        let other = Uuid::from_u128(7);

        node.add_dispute(other);
        node.add_dispute(other);
        assert_eq!(node.disputed_by.len(), 1);
    }

    #[test]
    fn test_entity_type_parse_fallback() {
        assert_eq!(EntityType::parse("Person"), EntityType::Person);
        assert_eq!(EntityType::parse("Robot"), EntityType::Unknown);
    }

    #[test]
    fn test_episode_type_parse_fallback() {
        assert_eq!(EpisodeType::parse("json"), EpisodeType::Json);
        assert_eq!(EpisodeType::parse("telegram"), EpisodeType::Text);
    }

    #[test]
    fn test_node_dispatch() {
        let entity = EntityNode::new(
            Uuid::from_u128(1),
            "g",
            "Alice",
            EntityType::Person,
            "",
            ts("2024-01-01T00:00:00Z"),
        );
        let node = Node::Entity(entity);

        assert_eq!(node.label(), NodeLabel::Entity);
        assert_eq!(node.name(), "Alice");
        assert!(node.as_entity().is_some());
        assert!(node.as_episodic().is_none());
    }

    #[test]
    fn test_entity_set_summary_keeps_pair_in_sync() {
        let mut entity = EntityNode::new(
            Uuid::from_u128(1),
            "g",
            "Alice",
            EntityType::Person,
            "old",
            ts("2024-01-01T00:00:00Z"),
        );

        entity.set_summary("new", vec![0.5; 4]);
        assert_eq!(entity.summary, "new");
        assert_eq!(entity.summary_embedding.as_ref().unwrap().len(), 4);
    }
}
