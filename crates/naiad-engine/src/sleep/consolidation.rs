//! Phase 1: consolidation
//!
//! Refresh entity summaries that have accumulated unconsolidated episodes.
//! In tiered mode the short-term graph is synthesised into the long-term
//! graph instead: counterparts are matched by exact name (vector lookup is
//! deliberately omitted here, because summaries within one domain routinely exceed 0.92
//! cosine, which would make merges destructive; true near-duplicates are
//! Phase 2's job), and active relations migrate once both peers exist in
//! the long-term graph.

use chrono::Duration;
use naiad_core::constants::{
    LTM_NEIGHBOURHOOD_INCOMING_MAX, LTM_NEIGHBOURHOOD_OUTGOING_MAX, MS_PER_MINUTE,
};
use naiad_core::io::IoContext;
use naiad_graph::{
    Direction, EntityEdge, EntityNode, EpisodicNode, GraphStore, Node,
};
use naiad_providers::{EmbeddingProvider, LlmProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::prompts;
use crate::sleep::{Phase1Report, SleepOptions};

/// An entity plus the distinct unconsolidated episodes mentioning it.
struct Cluster {
    entity_uuid: Uuid,
    episodes: Vec<EpisodicNode>,
}

/// Discover consolidation clusters: entities with at least `min_episodes`
/// distinct unconsolidated episodes older than the cooldown, busiest first,
/// capped at `max_entities`.
async fn discover_clusters(
    store: &Arc<dyn GraphStore>,
    io: &IoContext,
    group_id: &str,
    options: &SleepOptions,
) -> EngineResult<Vec<Cluster>> {
    let cutoff = io.now_utc() - Duration::milliseconds((options.cooldown_minutes * MS_PER_MINUTE) as i64);
    let mentions = store.unconsolidated_mentions(group_id, cutoff).await?;

    let mut by_entity: BTreeMap<Uuid, BTreeMap<Uuid, EpisodicNode>> = BTreeMap::new();
    for (entity_uuid, episode) in mentions {
        by_entity
            .entry(entity_uuid)
            .or_default()
            .insert(episode.uuid, episode);
    }

    let mut clusters: Vec<Cluster> = by_entity
        .into_iter()
        .filter(|(_, episodes)| episodes.len() >= options.min_episodes)
        .map(|(entity_uuid, episodes)| Cluster {
            entity_uuid,
            episodes: episodes.into_values().collect(),
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.episodes
            .len()
            .cmp(&a.episodes.len())
            .then_with(|| a.entity_uuid.cmp(&b.entity_uuid))
    });
    clusters.truncate(options.max_entities);

    Ok(clusters)
}

/// Single-graph consolidation.
pub(super) async fn run(
    store: &Arc<dyn GraphStore>,
    llm: &Arc<dyn LlmProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    io: &IoContext,
    group_id: &str,
    options: &SleepOptions,
) -> EngineResult<Phase1Report> {
    let clusters = discover_clusters(store, io, group_id, options).await?;
    let mut report = Phase1Report::default();

    for cluster in clusters {
        let Some(Node::Entity(entity)) = store.node_by_uuid(cluster.entity_uuid).await? else {
            continue;
        };

        if options.dry_run {
            report.entities_refreshed += 1;
            report.episodes_consolidated += cluster.episodes.len();
            report.entities_processed.push(entity.name.clone());
            continue;
        }

        match refresh_summary(store, llm, embedder, io, entity, &cluster.episodes).await {
            Ok((name, tokens)) => {
                report.entities_refreshed += 1;
                report.episodes_consolidated += cluster.episodes.len();
                report.tokens_used += tokens;
                report.entities_processed.push(name);
            }
            Err(e) if matches!(e, crate::EngineError::Llm(_) | crate::EngineError::Embedding(_)) => {
                // One bad cluster never sinks the phase.
                tracing::warn!(error = %e, "consolidation cluster skipped");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

/// Synthesize and write back one entity's refreshed summary, marking the
/// supporting episodes consolidated.
async fn refresh_summary(
    store: &Arc<dyn GraphStore>,
    llm: &Arc<dyn LlmProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    io: &IoContext,
    mut entity: EntityNode,
    episodes: &[EpisodicNode],
) -> EngineResult<(String, u64)> {
    let response = llm
        .generate_structured(
            &prompts::consolidation_prompt(&entity, episodes),
            &prompts::consolidation_schema(),
        )
        .await?;

    let summary = response.json["summary"]
        .as_str()
        .unwrap_or(&entity.summary)
        .to_string();
    let embedding = embedder.embed(&summary).await?;

    let now = io.now_utc();
    entity.set_summary(summary, embedding);
    entity.consolidated_at = Some(now);
    store.upsert_entity(&entity).await?;

    for episode in episodes {
        let mut episode = episode.clone();
        episode.consolidated_at = Some(now);
        store.upsert_episode(&episode).await?;
    }

    Ok((entity.name, response.tokens_used))
}

/// Tiered consolidation: short-term clusters land in the long-term graph.
pub(super) async fn run_tiered(
    store: &Arc<dyn GraphStore>,
    llm: &Arc<dyn LlmProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    io: &IoContext,
    stm_group_id: &str,
    ltm_group_id: &str,
    options: &SleepOptions,
) -> EngineResult<Phase1Report> {
    let clusters = discover_clusters(store, io, stm_group_id, options).await?;
    let mut report = Phase1Report::default();

    for cluster in clusters {
        let Some(Node::Entity(stm_entity)) = store.node_by_uuid(cluster.entity_uuid).await? else {
            continue;
        };

        if options.dry_run {
            report.entities_refreshed += 1;
            report.episodes_consolidated += cluster.episodes.len();
            report.entities_processed.push(stm_entity.name.clone());
            continue;
        }

        match consolidate_into_ltm(
            store,
            llm,
            embedder,
            io,
            &stm_entity,
            &cluster.episodes,
            ltm_group_id,
        )
        .await
        {
            Ok(tokens) => {
                report.entities_refreshed += 1;
                report.episodes_consolidated += cluster.episodes.len();
                report.tokens_used += tokens;
                report.entities_processed.push(stm_entity.name.clone());
            }
            Err(e) if matches!(e, crate::EngineError::Llm(_) | crate::EngineError::Embedding(_)) => {
                tracing::warn!(entity = %stm_entity.name, error = %e, "tiered cluster skipped");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

async fn consolidate_into_ltm(
    store: &Arc<dyn GraphStore>,
    llm: &Arc<dyn LlmProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    io: &IoContext,
    stm_entity: &EntityNode,
    episodes: &[EpisodicNode],
    ltm_group_id: &str,
) -> EngineResult<u64> {
    let now = io.now_utc();
    let mut tokens = 0u64;

    // Synthesize the short-term evidence first.
    let synthesis = llm
        .generate_structured(
            &prompts::consolidation_prompt(stm_entity, episodes),
            &prompts::consolidation_schema(),
        )
        .await?;
    tokens += synthesis.tokens_used;
    let stm_summary = synthesis.json["summary"]
        .as_str()
        .unwrap_or(&stm_entity.summary)
        .to_string();

    // Counterpart lookup is exact-name only.
    let ltm_entity = match store.entity_by_name(&stm_entity.name, ltm_group_id).await? {
        Some(mut existing) => {
            // Merge with the 1-hop neighbourhood as context.
            let outgoing = store
                .edges_of_entity(existing.uuid, Direction::Outgoing, true)
                .await?;
            let incoming = store
                .edges_of_entity(existing.uuid, Direction::Incoming, true)
                .await?;

            let outgoing_pairs =
                neighbourhood_pairs(store, &outgoing, LTM_NEIGHBOURHOOD_OUTGOING_MAX, true).await?;
            let incoming_pairs =
                neighbourhood_pairs(store, &incoming, LTM_NEIGHBOURHOOD_INCOMING_MAX, false).await?;

            let merge = llm
                .generate_structured(
                    &prompts::tiered_merge_prompt(
                        &existing,
                        &stm_summary,
                        &outgoing_pairs,
                        &incoming_pairs,
                    ),
                    &prompts::consolidation_schema(),
                )
                .await?;
            tokens += merge.tokens_used;

            let summary = merge.json["summary"]
                .as_str()
                .unwrap_or(&existing.summary)
                .to_string();
            let embedding = embedder.embed(&summary).await?;
            existing.set_summary(summary, embedding);
            existing.consolidated_at = Some(now);
            store.upsert_entity(&existing).await?;
            existing
        }
        None => {
            let mut created = EntityNode::new(
                io.gen_uuid(),
                ltm_group_id,
                stm_entity.name.clone(),
                stm_entity.entity_type,
                stm_summary.clone(),
                now,
            );
            created.summary_embedding = Some(embedder.embed(&stm_summary).await?);
            created.consolidated_at = Some(now);
            store.upsert_entity(&created).await?;
            created
        }
    };

    migrate_relations(store, stm_entity, &ltm_entity, ltm_group_id).await?;

    for episode in episodes {
        let mut episode = episode.clone();
        episode.consolidated_at = Some(now);
        store.upsert_episode(&episode).await?;
    }

    Ok(tokens)
}

/// Render neighbourhood edges as `(relation, peer-name)` pairs for the
/// merge prompt.
async fn neighbourhood_pairs(
    store: &Arc<dyn GraphStore>,
    edges: &[EntityEdge],
    cap: usize,
    outgoing: bool,
) -> EngineResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for edge in edges.iter().take(cap) {
        let peer_uuid = if outgoing {
            edge.target_node_uuid
        } else {
            edge.source_node_uuid
        };
        let peer_name = match store.node_by_uuid(peer_uuid).await? {
            Some(Node::Entity(peer)) => peer.name,
            _ => continue,
        };
        pairs.push((edge.name.clone(), peer_name));
    }
    Ok(pairs)
}

/// Migrate the short-term entity's active relations into the long-term
/// graph. Peers that have no long-term counterpart yet are deferred
/// silently; a later cycle picks them up once the peer consolidates.
async fn migrate_relations(
    store: &Arc<dyn GraphStore>,
    stm_entity: &EntityNode,
    ltm_entity: &EntityNode,
    ltm_group_id: &str,
) -> EngineResult<()> {
    let edges = store
        .edges_of_entity(stm_entity.uuid, Direction::Both, true)
        .await?;

    for edge in edges {
        let (peer_uuid, stm_is_source) = if edge.source_node_uuid == stm_entity.uuid {
            (edge.target_node_uuid, true)
        } else {
            (edge.source_node_uuid, false)
        };

        let Some(Node::Entity(stm_peer)) = store.node_by_uuid(peer_uuid).await? else {
            continue;
        };
        let Some(ltm_peer) = store.entity_by_name(&stm_peer.name, ltm_group_id).await? else {
            tracing::debug!(
                relation = %edge.name,
                peer = %stm_peer.name,
                "relation migration deferred; peer not yet consolidated"
            );
            continue;
        };

        let (source, target) = if stm_is_source {
            (ltm_entity.uuid, ltm_peer.uuid)
        } else {
            (ltm_peer.uuid, ltm_entity.uuid)
        };

        match store.entity_edge_between(source, target, &edge.name).await? {
            Some(mut existing) => {
                // Concatenate raw; read paths treat the list as a set.
                existing.episodes.extend(edge.episodes.iter().copied());
                store.upsert_entity_edge(&existing).await?;
            }
            None => {
                let mut migrated = EntityEdge::new(
                    migrated_edge_uuid(edge.uuid),
                    ltm_group_id,
                    source,
                    target,
                    edge.name.clone(),
                    edge.created_at,
                );
                migrated.episodes = edge.episodes.clone();
                migrated.fact_ids = edge.fact_ids.clone();
                migrated.valid_at = edge.valid_at;
                store.upsert_entity_edge(&migrated).await?;
            }
        }
    }

    Ok(())
}

/// Stable long-term uuid derived from the short-term edge uuid, so repeated
/// migrations converge on the same edge.
fn migrated_edge_uuid(stm_edge_uuid: Uuid) -> Uuid {
    let tag = format!("{stm_edge_uuid}:ltm");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, tag.as_bytes())
}
