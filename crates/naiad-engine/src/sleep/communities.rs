//! Phase 3: community detection
//!
//! Louvain over the entity graph, then LLM-written names and summaries per
//! retained community. Community UUIDs are kept stable across rebuilds by
//! Jaccard overlap against the previous generation, so downstream
//! references don't churn when membership barely moves.

use naiad_core::constants::{COMMUNITY_JACCARD_REUSE_MIN, COMMUNITY_MEMBER_SUMMARIES_MAX};
use naiad_core::io::IoContext;
use naiad_graph::{CommunityEdge, CommunityNode, EntityNode, GraphStore};
use naiad_providers::{EmbeddingProvider, LlmProvider};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::sleep::louvain;
use crate::sleep::{Phase3Report, SleepOptions};

fn jaccard(a: &BTreeSet<Uuid>, b: &BTreeSet<Uuid>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Pick which existing community uuid each new member set inherits.
/// An existing uuid is claimed at most once per cycle.
fn assign_uuids(
    new_sets: &[BTreeSet<Uuid>],
    existing: &[CommunityNode],
    io: &IoContext,
) -> Vec<(Uuid, bool)> {
    let mut claimed: BTreeSet<Uuid> = BTreeSet::new();
    let mut assignments = Vec::with_capacity(new_sets.len());

    for members in new_sets {
        let mut best: Option<(f64, Uuid)> = None;
        for community in existing {
            if claimed.contains(&community.uuid) {
                continue;
            }
            let overlap = jaccard(members, &community.member_entity_ids.iter().copied().collect());
            if overlap >= COMMUNITY_JACCARD_REUSE_MIN {
                match best {
                    Some((best_overlap, _)) if overlap <= best_overlap => {}
                    _ => best = Some((overlap, community.uuid)),
                }
            }
        }

        match best {
            Some((_, uuid)) => {
                claimed.insert(uuid);
                assignments.push((uuid, true));
            }
            None => assignments.push((io.gen_uuid(), false)),
        }
    }

    assignments
}

pub(super) async fn run(
    store: &Arc<dyn GraphStore>,
    llm: &Arc<dyn LlmProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    io: &IoContext,
    group_id: &str,
    options: &SleepOptions,
) -> EngineResult<Phase3Report> {
    let entities = store.entities_in_group(group_id).await?;
    let entity_count = entities.len();

    // Gate 1: too small to be worth clustering.
    if entity_count < options.min_graph_size {
        return Ok(Phase3Report {
            skipped: true,
            reason: Some("graph_too_small".to_string()),
            entity_count,
            ..Phase3Report::default()
        });
    }

    // Gate 2: not enough growth since the last rebuild.
    let existing = store.communities_in_group(group_id).await?;
    let last_count = existing
        .iter()
        .map(|c| c.entity_count_at_last_rebuild)
        .max()
        .unwrap_or(0);
    if entity_count.saturating_sub(last_count) < options.rebuild_threshold && !existing.is_empty()
    {
        return Ok(Phase3Report {
            skipped: true,
            reason: Some("below_rebuild_threshold".to_string()),
            entity_count,
            ..Phase3Report::default()
        });
    }

    // Undirected uniform-weight graph over the entities.
    let entity_by_uuid: BTreeMap<Uuid, &EntityNode> =
        entities.iter().map(|e| (e.uuid, e)).collect();
    let nodes: Vec<Uuid> = entity_by_uuid.keys().copied().collect();
    let edges: Vec<(Uuid, Uuid)> = store
        .entity_edges_in_group(group_id)
        .await?
        .iter()
        .map(|e| (e.source_node_uuid, e.target_node_uuid))
        .collect();

    let partitions = louvain::detect_communities(&nodes, &edges);

    let retained: Vec<BTreeSet<Uuid>> = partitions
        .into_iter()
        .filter(|p| p.len() >= options.min_community_size)
        .map(|p| p.into_iter().collect())
        .collect();

    let assignments = assign_uuids(&retained, &existing, io);
    let reused: BTreeSet<Uuid> = assignments
        .iter()
        .filter(|(_, was_reused)| *was_reused)
        .map(|(uuid, _)| *uuid)
        .collect();
    let stale: Vec<&CommunityNode> = existing
        .iter()
        .filter(|c| !reused.contains(&c.uuid))
        .collect();

    let mut report = Phase3Report {
        skipped: false,
        reason: None,
        communities_built: 0,
        communities_removed: stale.len(),
        entity_count,
    };

    if options.dry_run {
        report.communities_built = retained.len();
        return Ok(report);
    }

    let now = io.now_utc();

    for (members, (community_uuid, was_reused)) in retained.iter().zip(assignments.iter()) {
        let member_summaries: Vec<(String, String)> = members
            .iter()
            .filter_map(|uuid| entity_by_uuid.get(uuid))
            .take(COMMUNITY_MEMBER_SUMMARIES_MAX)
            .map(|e| (e.name.clone(), e.summary.clone()))
            .collect();

        // A failed summary skips the community; the phase carries on.
        let response = match llm
            .generate_structured(
                &crate::prompts::community_prompt(&member_summaries),
                &crate::prompts::community_schema(),
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "community summary skipped");
                continue;
            }
        };

        let summary = response.json["summary"].as_str().unwrap_or("").to_string();
        let embedding = match embedder.embed(&summary).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "community embedding skipped");
                continue;
            }
        };

        let created_at = if *was_reused {
            existing
                .iter()
                .find(|c| c.uuid == *community_uuid)
                .map(|c| c.created_at)
                .unwrap_or(now)
        } else {
            now
        };

        let mut community = CommunityNode::new(*community_uuid, group_id, "", created_at);
        community.name = response.json["name"].as_str().unwrap_or("").to_string();
        community.summary = summary;
        community.summary_embedding = Some(embedding);
        community.member_entity_ids = members.iter().copied().collect();
        community.member_count = members.len();
        community.domain_hints = response.json["domain_hints"]
            .as_array()
            .map(|hints| {
                hints
                    .iter()
                    .filter_map(|h| h.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        community.importance_score = response.json["importance_score"]
            .as_f64()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        community.entity_count_at_last_rebuild = entity_count;
        community.last_full_rebuild = Some(now);

        store.upsert_community(&community).await?;

        // Rebuild membership edges from scratch.
        store.delete_community_edges(*community_uuid).await?;
        for member in members {
            let edge = CommunityEdge::new(io.gen_uuid(), group_id, *community_uuid, *member, now);
            store.upsert_community_edge(&edge).await?;
        }

        report.communities_built += 1;
    }

    for community in stale {
        store.detach_delete(community.uuid).await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use naiad_dst::{DeterministicRng, SimClock};

    fn set(ids: &[u128]) -> BTreeSet<Uuid> {
        ids.iter().map(|&i| Uuid::from_u128(i)).collect()
    }

    fn io() -> IoContext {
        IoContext::new(
            Arc::new(SimClock::default()),
            Arc::new(DeterministicRng::new(1)),
        )
    }

    fn community(uuid: u128, members: &[u128]) -> CommunityNode {
        let mut c = CommunityNode::new(
            Uuid::from_u128(uuid),
            "g",
            "c",
            "2024-01-01T00:00:00Z".parse().unwrap(),
        );
        c.member_entity_ids = members.iter().map(|&i| Uuid::from_u128(i)).collect();
        c
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard(&set(&[1, 2, 3]), &set(&[1, 2, 3])) - 1.0).abs() < 1e-9);
        assert!((jaccard(&set(&[1, 2]), &set(&[2, 3])) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }

    #[test]
    fn test_assign_uuids_reuses_on_high_overlap() {
        let existing = vec![community(100, &[1, 2, 3, 4])];
        // 4/5 overlap = 0.8 >= 0.7
        let assignments = assign_uuids(&[set(&[1, 2, 3, 4, 5])], &existing, &io());

        assert_eq!(assignments[0], (Uuid::from_u128(100), true));
    }

    #[test]
    fn test_assign_uuids_new_on_low_overlap() {
        let existing = vec![community(100, &[1, 2, 3, 4])];
        let assignments = assign_uuids(&[set(&[7, 8, 9])], &existing, &io());

        assert_ne!(assignments[0].0, Uuid::from_u128(100));
        assert!(!assignments[0].1);
    }

    #[test]
    fn test_assign_uuids_each_existing_claimed_once() {
        let existing = vec![community(100, &[1, 2, 3, 4])];
        // Both new sets overlap the same existing community heavily.
        let assignments = assign_uuids(
            &[set(&[1, 2, 3, 4]), set(&[1, 2, 3, 4, 5])],
            &existing,
            &io(),
        );

        assert_eq!(assignments[0].0, Uuid::from_u128(100));
        assert_ne!(assignments[1].0, Uuid::from_u128(100));
    }
}
