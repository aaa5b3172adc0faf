//! Louvain community detection
//!
//! Single-pass local modularity optimisation over an undirected weighted
//! graph, without multi-level contraction. Sufficient for corpora of a few
//! thousand entities. Node order is sorted, so the partition is
//! deterministic for a given input.

use std::collections::BTreeMap;
use uuid::Uuid;

/// Partition entities into communities.
///
/// `edges` are undirected with uniform weight 1 per occurrence; self-loops
/// and edges with an endpoint outside `nodes` are skipped. With no edges at
/// all, every node stays a singleton.
pub fn detect_communities(nodes: &[Uuid], edges: &[(Uuid, Uuid)]) -> Vec<Vec<Uuid>> {
    let node_set: BTreeMap<Uuid, ()> = nodes.iter().map(|&n| (n, ())).collect();

    // Adjacency with accumulated weights; parallel edges stack.
    let mut adjacency: BTreeMap<Uuid, BTreeMap<Uuid, f64>> =
        nodes.iter().map(|&n| (n, BTreeMap::new())).collect();
    let mut total_weight = 0.0f64; // m

    for &(a, b) in edges {
        if a == b || !node_set.contains_key(&a) || !node_set.contains_key(&b) {
            continue;
        }
        *adjacency.get_mut(&a).unwrap().entry(b).or_insert(0.0) += 1.0;
        *adjacency.get_mut(&b).unwrap().entry(a).or_insert(0.0) += 1.0;
        total_weight += 1.0;
    }

    // Weighted degree per node.
    let degree: BTreeMap<Uuid, f64> = adjacency
        .iter()
        .map(|(&n, neighbors)| (n, neighbors.values().sum()))
        .collect();

    // Everyone starts alone; community labels are node uuids.
    let mut community: BTreeMap<Uuid, Uuid> = nodes.iter().map(|&n| (n, n)).collect();
    let mut sigma_tot: BTreeMap<Uuid, f64> = nodes.iter().map(|&n| (n, degree[&n])).collect();

    if total_weight > 0.0 {
        let m = total_weight;
        let sorted: Vec<Uuid> = node_set.keys().copied().collect();

        loop {
            let mut moved = false;

            for &node in &sorted {
                let k_i = degree[&node];
                let c_old = community[&node];

                // Weight from `node` into each neighbouring community, and
                // into its own community excluding itself.
                let mut k_new: BTreeMap<Uuid, f64> = BTreeMap::new();
                let mut k_old = 0.0;
                for (&neighbor, &weight) in &adjacency[&node] {
                    let c = community[&neighbor];
                    if c == c_old {
                        k_old += weight;
                    }
                    *k_new.entry(c).or_insert(0.0) += weight;
                }

                let sigma_old = sigma_tot[&c_old];
                let mut best: Option<(f64, Uuid)> = None;

                for (&c, &k_c) in &k_new {
                    if c == c_old {
                        continue;
                    }
                    let delta_q = (k_c - k_old) / m
                        - k_i * (sigma_tot[&c] - sigma_old + k_i) / (2.0 * m * m);

                    if delta_q > 0.0 {
                        match best {
                            Some((best_q, best_c))
                                if delta_q < best_q || (delta_q == best_q && c > best_c) => {}
                            _ => best = Some((delta_q, c)),
                        }
                    }
                }

                if let Some((_, c_new)) = best {
                    *sigma_tot.get_mut(&c_old).unwrap() -= k_i;
                    *sigma_tot.get_mut(&c_new).unwrap() += k_i;
                    community.insert(node, c_new);
                    moved = true;
                }
            }

            if !moved {
                break;
            }
        }
    }

    // Group by final label; members sorted for stable output.
    let mut groups: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for (&node, &label) in &community {
        groups.entry(label).or_default().push(node);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u128) -> Vec<Uuid> {
        (1..=n).map(Uuid::from_u128).collect()
    }

    #[test]
    fn test_edgeless_graph_is_all_singletons() {
        let nodes = ids(5);
        let communities = detect_communities(&nodes, &[]);

        assert_eq!(communities.len(), 5);
        assert!(communities.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_two_cliques_split() {
        let nodes = ids(6);
        let e = |a: u128, b: u128| (Uuid::from_u128(a), Uuid::from_u128(b));
        // Two triangles joined by a single bridge.
        let edges = vec![
            e(1, 2),
            e(2, 3),
            e(1, 3),
            e(4, 5),
            e(5, 6),
            e(4, 6),
            e(3, 4),
        ];

        let communities = detect_communities(&nodes, &edges);
        assert_eq!(communities.len(), 2);

        let sizes: Vec<usize> = communities.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[test]
    fn test_self_loops_and_foreign_endpoints_skipped() {
        let nodes = ids(2);
        let e = |a: u128, b: u128| (Uuid::from_u128(a), Uuid::from_u128(b));
        let edges = vec![e(1, 1), e(1, 99), e(1, 2)];

        let communities = detect_communities(&nodes, &edges);
        // Only the 1-2 edge counts; the pair merges.
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].len(), 2);
    }

    #[test]
    fn test_deterministic_partition() {
        let nodes = ids(8);
        let e = |a: u128, b: u128| (Uuid::from_u128(a), Uuid::from_u128(b));
        let edges = vec![
            e(1, 2),
            e(2, 3),
            e(3, 1),
            e(4, 5),
            e(5, 6),
            e(6, 4),
            e(7, 8),
            e(3, 4),
        ];

        let first = detect_communities(&nodes, &edges);
        let second = detect_communities(&nodes, &edges);
        assert_eq!(first, second);
    }

    #[test]
    fn test_star_collapses_to_one_community() {
        let nodes = ids(5);
        let e = |a: u128, b: u128| (Uuid::from_u128(a), Uuid::from_u128(b));
        let edges = vec![e(1, 2), e(1, 3), e(1, 4), e(1, 5)];

        let communities = detect_communities(&nodes, &edges);
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].len(), 5);
    }

    #[test]
    fn test_empty_input() {
        assert!(detect_communities(&[], &[]).is_empty());
    }
}
