#![allow(dead_code)]
//! Shared harness for engine integration tests
//!
//! Everything runs on the simulation stack: in-memory store, scripted LLM,
//! deterministic embedder, manually advanced clock. A failing test replays
//! exactly from its seed.

use naiad_core::io::IoContext;
use naiad_dst::{DeterministicRng, SimClock};
use naiad_engine::{EngineConfig, MemoryEngine};
use naiad_graph::{GraphStore, SimGraphStore};
use naiad_providers::{SimEmbeddingProvider, SimLlmProvider};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub struct SimHarness {
    pub engine: MemoryEngine,
    pub store: Arc<SimGraphStore>,
    pub llm: Arc<SimLlmProvider>,
    pub embedder: Arc<SimEmbeddingProvider>,
    pub clock: SimClock,
}

/// Engine wired to shared simulation handles, so tests can script the LLM,
/// pin embeddings, and drive the clock from outside.
pub fn harness(seed: u64) -> SimHarness {
    let store = Arc::new(SimGraphStore::new());
    let llm = Arc::new(SimLlmProvider::new());
    let embedder = Arc::new(SimEmbeddingProvider::default_384());
    let clock = SimClock::default();
    let io = IoContext::new(
        Arc::new(clock.clone()),
        Arc::new(DeterministicRng::new(seed)),
    );

    let engine = MemoryEngine::new(
        store.clone(),
        llm.clone(),
        embedder.clone(),
        io,
        EngineConfig::default(),
    );

    SimHarness {
        engine,
        store,
        llm,
        embedder,
        clock,
    }
}

/// Build an extraction payload the scripted LLM will return.
///
/// `entities`: `(name, entity_type, summary)` triples at confidence 0.9.
/// `relations`: `(source, target, relation, is_negated, temporal_validity)`.
pub fn extraction(
    entities: &[(&str, &str, &str)],
    relations: &[(&str, &str, &str, bool, &str)],
) -> Value {
    json!({
        "entities": entities
            .iter()
            .map(|(name, entity_type, summary)| {
                json!({
                    "name": name,
                    "entity_type": entity_type,
                    "summary": summary,
                    "confidence": 0.9
                })
            })
            .collect::<Vec<_>>(),
        "relations": relations
            .iter()
            .map(|(source, target, relation, negated, validity)| {
                json!({
                    "source_name": source,
                    "target_name": target,
                    "relation_name": relation,
                    "confidence": 0.9,
                    "is_negated": negated,
                    "temporal_validity": validity
                })
            })
            .collect::<Vec<_>>(),
    })
}

/// Structural invariants that must hold for any group at any time.
pub async fn assert_graph_invariants(store: &SimGraphStore, group_id: &str) {
    let entities = store.entities_in_group(group_id).await.unwrap();
    let episodes = store.episodes_in_group(group_id).await;
    let entity_edges = store.entity_edges_in_group(group_id).await.unwrap();
    let mentions = store.episodic_edges_in_group(group_id).await;

    // 1. (name, group_id) unique per entity.
    let mut names = HashSet::new();
    for entity in &entities {
        assert!(
            names.insert(entity.name.clone()),
            "duplicate entity name '{}' in group '{}'",
            entity.name,
            group_id
        );
    }

    let entity_uuids: HashSet<_> = entities.iter().map(|e| e.uuid).collect();
    let episode_uuids: HashSet<_> = episodes.iter().map(|e| e.uuid).collect();

    // 2. RELATES_TO endpoints exist as entities in the same group.
    for edge in &entity_edges {
        assert!(
            entity_uuids.contains(&edge.source_node_uuid),
            "edge {} has dangling source",
            edge.name
        );
        assert!(
            entity_uuids.contains(&edge.target_node_uuid),
            "edge {} has dangling target",
            edge.name
        );
        // 4. Historical edges end no earlier than they start.
        if let Some(invalid_at) = edge.invalid_at {
            assert!(
                invalid_at >= edge.valid_at,
                "edge {} closed before it opened",
                edge.name
            );
        }
    }

    // 3. MENTIONS go episode -> entity within the group.
    for mention in &mentions {
        assert!(
            episode_uuids.contains(&mention.source_node_uuid),
            "mention source is not an episode"
        );
        assert!(
            entity_uuids.contains(&mention.target_node_uuid),
            "mention target is not an entity"
        );
    }

    // 5. retroactive_days is derived, floored at zero.
    for episode in &episodes {
        let expected = ((episode.created_at - episode.valid_at).num_seconds() / 86_400).max(0);
        assert_eq!(
            episode.retroactive_days, expected,
            "episode '{}' has inconsistent retroactive_days",
            episode.name
        );
    }
}
