//! Phase 2: pruning & entity merge
//!
//! Candidate pairs come from name containment; scoring prefers embedding
//! cosine and falls back to a name-length ratio. Merges are greedy in
//! descending similarity, one merge per entity per cycle, canonical chosen
//! by degree then name length. Finishes by deleting edges that have lost
//! all supporting episodes.

use naiad_core::constants::MERGE_NAME_RATIO_FLOOR;
use naiad_graph::{cosine_similarity, EntityNode, GraphStore, MergeCandidate};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::sleep::{MergedPair, Phase2Report, SleepOptions};

struct ScoredPair {
    canonical: EntityNode,
    duplicate: EntityNode,
    similarity: f64,
}

/// Score one candidate pair, or None when it cannot be judged.
fn score_pair(candidate: &MergeCandidate) -> Option<f64> {
    match (
        candidate.a.summary_embedding.as_deref(),
        candidate.b.summary_embedding.as_deref(),
    ) {
        (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
        _ => {
            // Embedding-less fallback: name-length ratio, floored.
            let len_a = candidate.a.name.chars().count() as f64;
            let len_b = candidate.b.name.chars().count() as f64;
            let ratio = len_a.min(len_b) / len_a.max(len_b);
            (ratio >= MERGE_NAME_RATIO_FLOOR).then_some(ratio)
        }
    }
}

/// Canonical = higher degree; tie broken by longer (more specific) name.
fn choose_canonical(candidate: &MergeCandidate) -> (EntityNode, EntityNode) {
    let a_wins = match candidate.degree_a.cmp(&candidate.degree_b) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.a.name.chars().count() >= candidate.b.name.chars().count()
        }
    };

    if a_wins {
        (candidate.a.clone(), candidate.b.clone())
    } else {
        (candidate.b.clone(), candidate.a.clone())
    }
}

pub(super) async fn run(
    store: &Arc<dyn GraphStore>,
    group_id: &str,
    options: &SleepOptions,
) -> EngineResult<Phase2Report> {
    let candidates = store.merge_candidates(group_id).await?;

    let mut pairs: Vec<ScoredPair> = candidates
        .iter()
        .filter_map(|candidate| {
            let similarity = score_pair(candidate)?;
            if similarity < options.similarity_threshold {
                return None;
            }
            let (canonical, duplicate) = choose_canonical(candidate);
            Some(ScoredPair {
                canonical,
                duplicate,
                similarity,
            })
        })
        .collect();

    pairs.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.duplicate.uuid.cmp(&b.duplicate.uuid))
            .then_with(|| a.canonical.uuid.cmp(&b.canonical.uuid))
    });

    let mut report = Phase2Report::default();
    let mut merged_away: BTreeSet<Uuid> = BTreeSet::new();

    for pair in pairs {
        // An entity consumed as a duplicate is gone; skip any later pair
        // that references it. Canonical survivors stay eligible, so a
        // chain of increasingly specific names collapses in one cycle.
        if merged_away.contains(&pair.canonical.uuid) || merged_away.contains(&pair.duplicate.uuid)
        {
            continue;
        }
        merged_away.insert(pair.duplicate.uuid);

        if !options.dry_run {
            store
                .merge_entity_into(pair.duplicate.uuid, pair.canonical.uuid)
                .await?;
        }

        tracing::info!(
            canonical = %pair.canonical.name,
            duplicate = %pair.duplicate.name,
            similarity = pair.similarity,
            dry_run = options.dry_run,
            "entity merge"
        );

        report.entities_merged += 1;
        report.merged_pairs.push(MergedPair {
            canonical: pair.canonical.name,
            duplicate: pair.duplicate.name,
            similarity: pair.similarity,
        });
    }

    report.edges_pruned = if options.dry_run {
        // Count what a real run would delete, without deleting.
        store
            .entity_edges_in_group(group_id)
            .await?
            .iter()
            .filter(|e| e.episodes.is_empty())
            .count() as u64
    } else {
        store.delete_orphan_edges(group_id).await?
    };

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use naiad_graph::EntityType;

    fn entity(id: u128, name: &str, embedding: Option<Vec<f32>>) -> EntityNode {
        let mut e = EntityNode::new(
            Uuid::from_u128(id),
            "g",
            name,
            EntityType::Person,
            "",
            Utc::now(),
        );
        e.summary_embedding = embedding;
        e
    }

    fn candidate(
        a: EntityNode,
        b: EntityNode,
        degree_a: usize,
        degree_b: usize,
    ) -> MergeCandidate {
        MergeCandidate {
            a,
            b,
            degree_a,
            degree_b,
        }
    }

    #[test]
    fn test_score_pair_uses_embeddings() {
        let c = candidate(
            entity(1, "Fischer", Some(vec![1.0, 0.0])),
            entity(2, "Alan Fischer", Some(vec![1.0, 0.0])),
            0,
            0,
        );
        assert!((score_pair(&c).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_pair_name_ratio_fallback() {
        // 4 chars vs 8 chars: ratio 0.5 < floor, judged unscorable.
        let c = candidate(entity(1, "Ann", None), entity(2, "Ann Arbor X", None), 0, 0);
        assert!(score_pair(&c).is_none());

        // 6 vs 8: ratio 0.75 passes the floor.
        let c = candidate(entity(1, "Fisher", None), entity(2, "A Fisher", None), 0, 0);
        let score = score_pair(&c).unwrap();
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_choose_canonical_degree_wins() {
        let c = candidate(
            entity(1, "Short", None),
            entity(2, "Much Longer Name", None),
            5,
            2,
        );
        let (canonical, duplicate) = choose_canonical(&c);
        assert_eq!(canonical.name, "Short");
        assert_eq!(duplicate.name, "Much Longer Name");
    }

    #[test]
    fn test_choose_canonical_tie_longer_name_wins() {
        let c = candidate(
            entity(1, "Fischer", None),
            entity(2, "Dr. Alan Fischer", None),
            3,
            3,
        );
        let (canonical, _) = choose_canonical(&c);
        assert_eq!(canonical.name, "Dr. Alan Fischer");
    }
}
