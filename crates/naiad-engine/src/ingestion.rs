//! Ingestion pipeline
//!
//! Per episode: embed, persist the episode node, gather known-entity
//! context, run one structured extraction call, resolve entities, link
//! mentions, and upsert relations under the negation/temporal/conflict
//! rules. The episode node is persisted before any extraction work, so an
//! aborted call leaves a retryable episode rather than nothing.

use chrono::{DateTime, Utc};
use naiad_core::constants::EXTRACTION_CONFIDENCE_MIN;
use naiad_core::io::IoContext;
use naiad_graph::{
    EntityEdge, EntityNode, EntityType, EpisodeType, EpisodicEdge, EpisodicNode, GraphStore,
};
use naiad_providers::{EmbeddingProvider, LlmError, LlmProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::prompts;
use crate::resolver::EntityResolver;

// =============================================================================
// Extraction payload
// =============================================================================

/// Whether an extracted relation still holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalValidity {
    #[default]
    Current,
    Historical,
}

/// One extracted entity mention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(with = "entity_type_string")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: f64,
}

/// One extracted relation between two mentioned entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source_name: String,
    pub target_name: String,
    pub relation_name: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub is_negated: bool,
    #[serde(default)]
    pub temporal_validity: TemporalValidity,
}

/// The full structured extraction result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// Entity types ride the wire as plain strings; unknown values degrade to
/// `Unknown` instead of failing the whole payload.
mod entity_type_string {
    use naiad_graph::EntityType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &EntityType, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<EntityType, D::Error> {
        let raw = String::deserialize(de)?;
        Ok(EntityType::parse(&raw))
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Input to `add_episode`.
#[derive(Debug, Clone)]
pub(crate) struct EpisodeInput {
    pub content: String,
    pub episode_type: EpisodeType,
    pub group_id: String,
    pub reference_id: Option<String>,
    pub valid_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

// =============================================================================
// Pipeline
// =============================================================================

pub(crate) struct IngestionPipeline {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    io: IoContext,
}

impl IngestionPipeline {
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

    fn resolver(&self) -> EntityResolver {
        EntityResolver::new(
            self.store.clone(),
            self.llm.clone(),
            self.embedder.clone(),
            self.io.clone(),
        )
    }

    /// Run the full pipeline for one episode.
    #[tracing::instrument(skip(self, input), fields(group_id = %input.group_id, content_len = input.content.len()))]
    pub async fn add_episode(&self, input: EpisodeInput) -> EngineResult<EpisodicNode> {
        assert!(!input.content.is_empty(), "episode content cannot be empty");

        let now = self.io.now_utc();

        // 1. Embed the raw content.
        let embedding = self.embedder.embed(&input.content).await?;

        // 2. Persist the episode first so MENTIONS edges have a target even
        //    if extraction fails mid-way.
        let mut episode = EpisodicNode::new(
            self.io.gen_uuid(),
            input.group_id.clone(),
            input.episode_type,
            input.content.clone(),
            now,
            input.valid_at,
        );
        episode.embedding = Some(embedding.clone());
        episode.reference_id = input.reference_id.clone();
        episode.metadata = input.metadata.clone();
        self.store.upsert_episode(&episode).await?;

        // 3. Known-entity context for canonical-name reuse.
        let resolver = self.resolver();
        let context = resolver
            .candidate_context(&input.group_id, &embedding)
            .await?;

        // 4. One structured extraction call.
        let response = self
            .llm
            .generate_structured(
                &prompts::extraction_prompt(&input.content, &context),
                &prompts::extraction_schema(),
            )
            .await?;
        let payload: ExtractionPayload =
            serde_json::from_value(response.json).map_err(|e| LlmError::SchemaMismatch {
                reason: format!("extraction payload: {e}"),
            })?;

        tracing::debug!(
            entities = payload.entities.len(),
            relations = payload.relations.len(),
            "extraction complete"
        );

        // 5 & 6. Confidence filter, then resolve each mention.
        let mut resolved: BTreeMap<String, EntityNode> = BTreeMap::new();
        for extracted in payload
            .entities
            .iter()
            .filter(|e| e.confidence >= EXTRACTION_CONFIDENCE_MIN)
        {
            let entity = resolver.resolve(&input.group_id, extracted).await?;
            resolved.insert(extracted.name.clone(), entity);
        }

        // 7. Mention links.
        for entity in resolved.values() {
            let edge = EpisodicEdge::new(
                self.io.gen_uuid(),
                input.group_id.clone(),
                episode.uuid,
                entity.uuid,
                now,
            );
            self.store.upsert_episodic_edge(&edge).await?;
        }

        // 8. Relations.
        for relation in &payload.relations {
            if relation.confidence < EXTRACTION_CONFIDENCE_MIN {
                continue;
            }
            let (Some(source), Some(target)) = (
                resolved.get(&relation.source_name),
                resolved.get(&relation.target_name),
            ) else {
                tracing::debug!(
                    relation = %relation.relation_name,
                    "dropping relation with unresolved endpoint"
                );
                continue;
            };

            if relation.is_negated {
                self.resolve_conflict(&mut episode, source, target, &relation.relation_name)
                    .await?;
                continue;
            }

            self.upsert_relation(&mut episode, source, target, relation, now)
                .await?;
        }

        Ok(episode)
    }

    /// Positive-relation upsert under the temporal rules.
    async fn upsert_relation(
        &self,
        episode: &mut EpisodicNode,
        source: &EntityNode,
        target: &EntityNode,
        relation: &ExtractedRelation,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let existing = self
            .store
            .entity_edge_between(source.uuid, target.uuid, &relation.relation_name)
            .await?;

        match existing {
            Some(mut edge) => match relation.temporal_validity {
                TemporalValidity::Historical => {
                    // A past-tense restatement closes the edge; an already
                    // historical edge keeps its original end time.
                    if edge.invalid_at.is_none() {
                        edge.invalid_at = Some(now);
                    }
                    self.store.upsert_entity_edge(&edge).await?;
                }
                TemporalValidity::Current => {
                    edge.add_episode(episode.uuid);
                    edge.valid_at = now;
                    self.store.upsert_entity_edge(&edge).await?;
                }
            },
            None => {
                let mut edge = EntityEdge::new(
                    self.io.gen_uuid(),
                    episode.group_id.clone(),
                    source.uuid,
                    target.uuid,
                    relation.relation_name.clone(),
                    now,
                );
                edge.add_episode(episode.uuid);
                // Historical-on-arrival edges are stored but immediately
                // closed.
                if relation.temporal_validity == TemporalValidity::Historical {
                    edge.invalid_at = Some(now);
                }
                self.store.upsert_entity_edge(&edge).await?;
            }
        }
        Ok(())
    }

    /// A negated relation never creates an edge. If an active positive edge
    /// exists, the two sides are cross-marked and both stay visible.
    async fn resolve_conflict(
        &self,
        episode: &mut EpisodicNode,
        source: &EntityNode,
        target: &EntityNode,
        relation_name: &str,
    ) -> EngineResult<()> {
        let Some(mut edge) = self
            .store
            .entity_edge_between(source.uuid, target.uuid, relation_name)
            .await?
        else {
            return Ok(());
        };
        if !edge.is_active() {
            return Ok(());
        }

        edge.add_dispute(episode.uuid);
        for supporting in &edge.episodes {
            episode.add_dispute(*supporting);
        }

        self.store.upsert_entity_edge(&edge).await?;
        self.store.upsert_episode(episode).await?;

        tracing::info!(
            relation = relation_name,
            source = %source.name,
            target = %target.name,
            "conflict recorded; edge kept visible"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_parses_full_shape() {
        let payload: ExtractionPayload = serde_json::from_value(json!({
            "entities": [
                {"name": "Alice", "entity_type": "Person", "summary": "s", "confidence": 0.9}
            ],
            "relations": [
                {
                    "source_name": "Alice",
                    "target_name": "ACME",
                    "relation_name": "WORKS_AT",
                    "confidence": 0.8,
                    "is_negated": false,
                    "temporal_validity": "historical"
                }
            ]
        }))
        .unwrap();

        assert_eq!(payload.entities[0].entity_type, EntityType::Person);
        assert_eq!(
            payload.relations[0].temporal_validity,
            TemporalValidity::Historical
        );
    }

    #[test]
    fn test_payload_defaults_are_lenient() {
        let payload: ExtractionPayload = serde_json::from_value(json!({
            "entities": [{"name": "X", "entity_type": "Cyborg"}],
            "relations": [{"source_name": "a", "target_name": "b", "relation_name": "R"}]
        }))
        .unwrap();

        assert_eq!(payload.entities[0].entity_type, EntityType::Unknown);
        assert_eq!(payload.entities[0].confidence, 0.0);
        assert!(!payload.relations[0].is_negated);
        assert_eq!(
            payload.relations[0].temporal_validity,
            TemporalValidity::Current
        );
    }

    #[test]
    fn test_payload_empty_object() {
        let payload: ExtractionPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.entities.is_empty());
        assert!(payload.relations.is_empty());
    }
}
