//! Entity resolution
//!
//! Maps an extracted mention to a canonical entity node. Resolution order:
//! exact case-sensitive name match wins; otherwise a new node is created.
//! The semantic candidate pool is *context generation* for the extraction
//! prompt (so the model reuses canonical names), never automatic merging.

use naiad_core::constants::{
    CANDIDATE_POOL_MAX, CANDIDATE_RECENCY_DECAY_PER_DAY, CANDIDATE_RECENCY_WEIGHT,
    CANDIDATE_SEMANTIC_WEIGHT, CANDIDATE_SIMILARITY_MIN, CONTEXT_ENTITIES_MAX,
};
use naiad_core::io::IoContext;
use naiad_graph::{EntityNode, EntityType, GraphStore, NodeLabel};
use naiad_providers::{EmbeddingProvider, LlmProvider};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::ingestion::ExtractedEntity;
use crate::prompts;

pub(crate) struct EntityResolver {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    io: IoContext,
}

impl EntityResolver {
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

    /// Candidate pool for the extraction prompt: entities whose summary
    /// embedding sits close to the episode embedding, re-ranked by a blend
    /// of similarity and recency, capped for prompt budget.
    pub async fn candidate_context(
        &self,
        group_id: &str,
        episode_embedding: &[f32],
    ) -> EngineResult<Vec<EntityNode>> {
        let scored = self
            .store
            .similarity_search(
                group_id,
                episode_embedding,
                &[NodeLabel::Entity],
                CANDIDATE_POOL_MAX,
                None,
            )
            .await?;

        let now = self.io.now_utc();
        let mut ranked: Vec<(f64, EntityNode)> = scored
            .into_iter()
            .filter(|s| s.similarity > CANDIDATE_SIMILARITY_MIN)
            .filter_map(|s| match s.node {
                naiad_graph::Node::Entity(entity) => {
                    let age_days =
                        (now - entity.created_at).num_seconds().max(0) as f64 / 86_400.0;
                    let recency = (-CANDIDATE_RECENCY_DECAY_PER_DAY * age_days).exp();
                    let score = CANDIDATE_SEMANTIC_WEIGHT * s.similarity
                        + CANDIDATE_RECENCY_WEIGHT * recency;
                    Some((score, entity))
                }
                _ => None,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.uuid.cmp(&b.1.uuid))
        });
        ranked.truncate(CONTEXT_ENTITIES_MAX);

        Ok(ranked.into_iter().map(|(_, entity)| entity).collect())
    }

    /// Resolve one extracted mention to a canonical node, creating or
    /// merging as needed. Provider failures propagate: the caller's episode
    /// upsert has already happened, and a retry re-enters this same path.
    pub async fn resolve(
        &self,
        group_id: &str,
        extracted: &ExtractedEntity,
    ) -> EngineResult<EntityNode> {
        if let Some(existing) = self.store.entity_by_name(&extracted.name, group_id).await? {
            return self.merge_into(existing, extracted).await;
        }

        let mut entity = EntityNode::new(
            self.io.gen_uuid(),
            group_id,
            extracted.name.clone(),
            extracted.entity_type,
            extracted.summary.clone(),
            self.io.now_utc(),
        );

        let embed_text = if entity.summary.is_empty() {
            entity.name.clone()
        } else {
            entity.summary.clone()
        };
        entity.summary_embedding = Some(self.embedder.embed(&embed_text).await?);

        self.store.upsert_entity(&entity).await?;
        tracing::debug!(name = %entity.name, group_id, "created entity");
        Ok(entity)
    }

    /// Merge new context into an existing entity: LLM-written summary,
    /// re-embedded, written back in one upsert. The entity type is replaced
    /// only when the stored one is unknown.
    async fn merge_into(
        &self,
        mut existing: EntityNode,
        extracted: &ExtractedEntity,
    ) -> EngineResult<EntityNode> {
        let response = self
            .llm
            .generate_structured(
                &prompts::merge_summary_prompt(&existing, &extracted.summary),
                &prompts::merge_summary_schema(),
            )
            .await?;

        let merged_summary = response.json["merged_summary"]
            .as_str()
            .unwrap_or(&existing.summary)
            .to_string();

        let embedding = self.embedder.embed(&merged_summary).await?;
        existing.set_summary(merged_summary, embedding);

        if existing.entity_type == EntityType::Unknown {
            existing.entity_type = extracted.entity_type;
        }

        self.store.upsert_entity(&existing).await?;
        tracing::debug!(name = %existing.name, "merged entity summary");
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naiad_dst::{DeterministicRng, SimClock};
    use naiad_graph::SimGraphStore;
    use naiad_providers::{SimEmbeddingProvider, SimLlmProvider};
    use serde_json::json;

    fn setup() -> (EntityResolver, Arc<SimGraphStore>, Arc<SimLlmProvider>) {
        let store = Arc::new(SimGraphStore::new());
        let llm = Arc::new(SimLlmProvider::new());
        let embedder = Arc::new(SimEmbeddingProvider::default_384());
        let io = IoContext::new(
            Arc::new(SimClock::default()),
            Arc::new(DeterministicRng::new(7)),
        );

        let resolver = EntityResolver::new(store.clone(), llm.clone(), embedder, io);
        (resolver, store, llm)
    }

    fn extracted(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: EntityType::Person,
            summary: format!("{name} is a person"),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_when_absent() {
        let (resolver, store, _) = setup();

        let entity = resolver.resolve("g", &extracted("Alice")).await.unwrap();

        assert_eq!(entity.name, "Alice");
        assert!(entity.summary_embedding.is_some());
        assert!(store.entity_by_name("Alice", "g").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resolve_merges_when_present() {
        let (resolver, store, llm) = setup();

        resolver.resolve("g", &extracted("Alice")).await.unwrap();
        llm.push_response(json!({"merged_summary": "Alice, fully merged"}));

        let merged = resolver.resolve("g", &extracted("Alice")).await.unwrap();

        assert_eq!(merged.summary, "Alice, fully merged");
        let (_, entities, _) = store.node_counts("g").await;
        assert_eq!(entities, 1, "merge must not create a second node");
    }

    #[tokio::test]
    async fn test_merge_replaces_unknown_type_only() {
        let (resolver, store, llm) = setup();

        let mut seeded = EntityNode::new(
            uuid::Uuid::from_u128(1),
            "g",
            "Alice",
            EntityType::Unknown,
            "mystery",
            "2024-01-01T00:00:00Z".parse().unwrap(),
        );
        seeded.summary_embedding = Some(vec![0.0; 384]);
        store.upsert_entity(&seeded).await.unwrap();

        llm.push_response(json!({"merged_summary": "resolved"}));
        let merged = resolver.resolve("g", &extracted("Alice")).await.unwrap();
        assert_eq!(merged.entity_type, EntityType::Person);

        // A known type is never overwritten.
        llm.push_response(json!({"merged_summary": "again"}));
        let mut other = extracted("Alice");
        other.entity_type = EntityType::Organization;
        let merged = resolver.resolve("g", &other).await.unwrap();
        assert_eq!(merged.entity_type, EntityType::Person);
    }

    #[tokio::test]
    async fn test_candidate_context_threshold_and_cap() {
        let (resolver, store, _) = setup();

        let mut close = EntityNode::new(
            uuid::Uuid::from_u128(1),
            "g",
            "Close",
            EntityType::Person,
            "close",
            "2024-01-01T00:00:00Z".parse().unwrap(),
        );
        let mut dim = vec![0.0f32; 384];
        dim[0] = 1.0;
        close.summary_embedding = Some(dim.clone());

        let mut far = EntityNode::new(
            uuid::Uuid::from_u128(2),
            "g",
            "Far",
            EntityType::Person,
            "far",
            "2024-01-01T00:00:00Z".parse().unwrap(),
        );
        let mut orth = vec![0.0f32; 384];
        orth[1] = 1.0;
        far.summary_embedding = Some(orth);

        store.upsert_entity(&close).await.unwrap();
        store.upsert_entity(&far).await.unwrap();

        let context = resolver.candidate_context("g", &dim).await.unwrap();

        assert_eq!(context.len(), 1, "below-threshold candidates are dropped");
        assert_eq!(context[0].name, "Close");
    }
}
