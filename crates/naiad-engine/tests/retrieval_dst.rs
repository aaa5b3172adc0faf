//! Retrieval engine integration tests
//!
//! Similarity search, the episodic-only date window, community routing,
//! graph expansion, temporal re-ranking, and traversal.

mod common;

use common::{extraction, harness};
use naiad_engine::{AddEpisodeParams, EngineError, SearchParams, TraverseParams};
use naiad_graph::{
    CommunityEdge, CommunityNode, Direction, EntityEdge, EntityNode, EntityType, GraphStore,
    NodeLabel,
};
use naiad_providers::EmbeddingProvider;
use uuid::Uuid;

const GROUP: &str = "default";

fn entity(id: u128, name: &str, embedding: Option<Vec<f32>>) -> EntityNode {
    let mut e = EntityNode::new(
        Uuid::from_u128(id),
        GROUP,
        name,
        EntityType::Person,
        format!("{name} summary"),
        "2024-01-01T00:00:00Z".parse().unwrap(),
    );
    e.summary_embedding = embedding;
    e
}

fn relates(id: u128, src: u128, tgt: u128, name: &str) -> EntityEdge {
    let mut e = EntityEdge::new(
        Uuid::from_u128(id),
        GROUP,
        Uuid::from_u128(src),
        Uuid::from_u128(tgt),
        name,
        "2024-01-01T00:00:00Z".parse().unwrap(),
    );
    e.add_episode(Uuid::from_u128(9_000 + id));
    e
}

fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[axis] = 1.0;
    v
}

#[tokio::test]
async fn test_search_returns_most_similar_first() {
    let h = harness(42);

    h.embedder.set_embedding("query text", unit(384, 0));
    let mut close = unit(384, 0);
    close[1] = 0.2;
    h.store.upsert_entity(&entity(1, "Close", Some(close))).await.unwrap();
    h.store
        .upsert_entity(&entity(2, "Far", Some(unit(384, 5))))
        .await
        .unwrap();

    let results = h
        .engine
        .search(SearchParams::new("query text"))
        .await
        .unwrap();

    assert_eq!(results[0].name(), "Close");
    assert_eq!(results[1].name(), "Far");
}

#[tokio::test]
async fn test_search_empty_query_is_validation_error() {
    let h = harness(42);
    let err = h.engine.search(SearchParams::new("")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn test_date_window_filters_episodes_not_entities() {
    let h = harness(42);

    // One old episode, one entity; the query matches both.
    h.llm.push_response(extraction(&[], &[]));
    h.engine
        .add_episode(AddEpisodeParams::new("the launch happened"))
        .await
        .unwrap();

    h.store
        .upsert_entity(&entity(
            1,
            "Launch",
            Some(h.embedder.embed("the launch happened").await.unwrap()),
        ))
        .await
        .unwrap();

    let results = h
        .engine
        .search(
            SearchParams::new("the launch happened").with_window(
                Some("2030-01-01T00:00:00Z".parse().unwrap()),
                None,
            ),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1, "the 2024 episode falls outside the window");
    assert_eq!(results[0].label(), NodeLabel::Entity);
}

#[tokio::test]
async fn test_community_hit_routes_to_members() {
    let h = harness(42);

    let query_vec = unit(384, 0);
    h.embedder.set_embedding("team question", query_vec.clone());

    // Members are semantically far from the query; only the community
    // summary sits close.
    h.store
        .upsert_entity(&entity(1, "Member A", Some(unit(384, 7))))
        .await
        .unwrap();
    h.store
        .upsert_entity(&entity(2, "Member B", Some(unit(384, 8))))
        .await
        .unwrap();

    let mut community = CommunityNode::new(
        Uuid::from_u128(100),
        GROUP,
        "The Team",
        "2024-01-01T00:00:00Z".parse().unwrap(),
    );
    community.summary_embedding = Some(query_vec);
    community.member_entity_ids = vec![Uuid::from_u128(1), Uuid::from_u128(2)];
    community.member_count = 2;
    h.store.upsert_community(&community).await.unwrap();
    for (edge_id, member) in [(200u128, 1u128), (201, 2)] {
        let edge = CommunityEdge::new(
            Uuid::from_u128(edge_id),
            GROUP,
            Uuid::from_u128(100),
            Uuid::from_u128(member),
            "2024-01-01T00:00:00Z".parse().unwrap(),
        );
        h.store.upsert_community_edge(&edge).await.unwrap();
    }

    let results = h
        .engine
        .search(SearchParams::new("team question").with_limit(2))
        .await
        .unwrap();

    let names: Vec<&str> = results.iter().map(|n| n.name()).collect();
    assert!(names.contains(&"The Team"));
    assert!(names.contains(&"Member A"), "members ride in via the community");
    assert!(names.contains(&"Member B"));
    assert!(results.len() > 2, "expansion may exceed the limit by design");
}

#[tokio::test]
async fn test_graph_expansion_pulls_neighbors() {
    let h = harness(42);

    h.embedder.set_embedding("who is alice", unit(384, 0));
    h.store
        .upsert_entity(&entity(1, "Alice", Some(unit(384, 0))))
        .await
        .unwrap();
    // Bob is semantically unrelated but one hop away.
    h.store
        .upsert_entity(&entity(2, "Bob", Some(unit(384, 9))))
        .await
        .unwrap();
    h.store.upsert_entity_edge(&relates(10, 1, 2, "KNOWS")).await.unwrap();

    let plain = h
        .engine
        .search(SearchParams::new("who is alice").with_limit(1))
        .await
        .unwrap();
    assert_eq!(plain.len(), 1);

    let expanded = h
        .engine
        .search(
            SearchParams::new("who is alice")
                .with_limit(1)
                .with_graph_expand(1),
        )
        .await
        .unwrap();

    let names: Vec<&str> = expanded.iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_temporal_reranking_prefers_contemporaneous_episode() {
    let h = harness(42);

    // Identical content at two different event times, ingested live.
    h.llm.push_response(extraction(&[], &[]));
    let old = h
        .engine
        .add_episode(AddEpisodeParams::new("the quarterly report was filed"))
        .await
        .unwrap();

    // Advance one year, ingest the same observation again.
    h.clock.advance_ms(366 * 24 * 60 * 60 * 1000);
    h.llm.push_response(extraction(&[], &[]));
    let new = h
        .engine
        .add_episode(AddEpisodeParams::new("the quarterly report was filed"))
        .await
        .unwrap();

    let query_time = new.valid_at;
    let results = h
        .engine
        .search(
            SearchParams::new("the quarterly report was filed")
                .with_query_time(query_time)
                .with_temporal(0.3, 30.0),
        )
        .await
        .unwrap();

    let uuids: Vec<Uuid> = results.iter().map(|n| n.uuid()).collect();
    let pos_new = uuids.iter().position(|&u| u == new.uuid).unwrap();
    let pos_old = uuids.iter().position(|&u| u == old.uuid).unwrap();
    assert!(
        pos_new < pos_old,
        "equal base similarity, the contemporaneous episode wins"
    );
}

#[tokio::test]
async fn test_traverse_returns_induced_subgraph() {
    let h = harness(42);

    for (id, name) in [(1u128, "Alice"), (2, "Bob"), (3, "Carol"), (4, "Dave")] {
        h.store.upsert_entity(&entity(id, name, None)).await.unwrap();
    }
    // Alice -> Bob -> Carol; Dave disconnected.
    h.store.upsert_entity_edge(&relates(10, 1, 2, "KNOWS")).await.unwrap();
    h.store.upsert_entity_edge(&relates(11, 2, 3, "KNOWS")).await.unwrap();

    let result = h
        .engine
        .traverse(TraverseParams {
            start_entity_name: Some("Alice".to_string()),
            max_hops: Some(2),
            direction: Direction::Both,
            ..TraverseParams::default()
        })
        .await
        .unwrap();

    assert_eq!(result.start.name, "Alice");
    let names: Vec<&str> = result.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Bob", "Carol"]);
    assert_eq!(result.edges.len(), 2, "both edges are inside the subgraph");
}

#[tokio::test]
async fn test_traverse_direction_limits_reach() {
    let h = harness(42);

    for (id, name) in [(1u128, "Alice"), (2, "Bob"), (3, "Carol")] {
        h.store.upsert_entity(&entity(id, name, None)).await.unwrap();
    }
    // Bob -> Alice, Alice -> Carol.
    h.store.upsert_entity_edge(&relates(10, 2, 1, "MANAGES")).await.unwrap();
    h.store.upsert_entity_edge(&relates(11, 1, 3, "MANAGES")).await.unwrap();

    let outgoing = h
        .engine
        .traverse(TraverseParams {
            start_entity_name: Some("Alice".to_string()),
            max_hops: Some(1),
            direction: Direction::Outgoing,
            ..TraverseParams::default()
        })
        .await
        .unwrap();
    let names: Vec<&str> = outgoing.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Carol"]);

    let incoming = h
        .engine
        .traverse(TraverseParams {
            start_entity_name: Some("Alice".to_string()),
            max_hops: Some(1),
            direction: Direction::Incoming,
            ..TraverseParams::default()
        })
        .await
        .unwrap();
    let names: Vec<&str> = incoming.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Bob"]);
}

#[tokio::test]
async fn test_traverse_without_start_is_validation_error() {
    let h = harness(42);
    let err = h
        .engine
        .traverse(TraverseParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn test_traverse_unknown_start_is_not_found() {
    let h = harness(42);
    let err = h
        .engine
        .traverse(TraverseParams {
            start_entity_name: Some("Nobody".to_string()),
            ..TraverseParams::default()
        })
        .await
        .unwrap_err();

    match err {
        EngineError::Graph(g) => assert!(g.is_not_found()),
        other => panic!("expected graph not-found, got {other}"),
    }
}
