//! Neo4j graph store
//!
//! Cypher backend over `neo4rs`. Property encoding keeps the wire types
//! boring: timestamps as RFC3339 strings, uuids as strings, embeddings as
//! float lists. Integer bounds (LIMIT, hop counts) are always sent as
//! `i64`; Neo4j rejects float limits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Query};
use uuid::Uuid;

use crate::edge::{CommunityEdge, Direction, EntityEdge, EpisodicEdge};
use crate::node::{
    CommunityNode, EntityNode, EntityType, EpisodeType, EpisodicNode, Node, NodeLabel,
};
use crate::store::{
    DateWindow, GraphError, GraphResult, GraphStore, MergeCandidate, ScoredNode,
};

/// Connection settings for [`Neo4jGraphStore`].
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    /// Read `NAIAD_NEO4J_URI` / `NAIAD_NEO4J_USER` / `NAIAD_NEO4J_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            uri: std::env::var("NAIAD_NEO4J_URI").ok()?,
            user: std::env::var("NAIAD_NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NAIAD_NEO4J_PASSWORD").ok()?,
        })
    }
}

/// Cypher-backed graph store.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect to the configured server.
    pub async fn connect(config: &Neo4jConfig) -> GraphResult<Self> {
        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .map_err(|e| GraphError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        Ok(Self { graph })
    }

    async fn run(&self, operation: &str, q: Query) -> GraphResult<()> {
        self.graph.run(q).await.map_err(|e| GraphError::WriteFailed {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    async fn rows(&self, operation: &str, q: Query) -> GraphResult<Vec<neo4rs::Row>> {
        let mut stream =
            self.graph
                .execute(q)
                .await
                .map_err(|e| GraphError::ReadFailed {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })?;

        let mut rows = Vec::new();
        loop {
            match stream.next().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => {
                    return Err(GraphError::ReadFailed {
                        operation: operation.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(rows)
    }
}

// =============================================================================
// Property encoding
// =============================================================================

fn embedding_to_f64(v: &[f32]) -> Vec<f64> {
    v.iter().map(|&x| f64::from(x)).collect()
}

fn embedding_from_f64(v: Vec<f64>) -> Vec<f32> {
    v.into_iter().map(|x| x as f32).collect()
}

fn uuids_to_strings(v: &[Uuid]) -> Vec<String> {
    v.iter().map(Uuid::to_string).collect()
}

fn ts_opt(v: &Option<DateTime<Utc>>) -> String {
    v.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn parse_uuid(s: &str, resource: &'static str) -> GraphResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| GraphError::SerializationFailed {
        reason: format!("{resource}: invalid uuid '{s}'"),
    })
}

fn parse_ts(s: &str, field: &str) -> GraphResult<DateTime<Utc>> {
    s.parse().map_err(|_| GraphError::SerializationFailed {
        reason: format!("invalid timestamp in {field}: '{s}'"),
    })
}

fn parse_ts_opt(s: String, field: &str) -> GraphResult<Option<DateTime<Utc>>> {
    if s.is_empty() {
        Ok(None)
    } else {
        parse_ts(&s, field).map(Some)
    }
}

fn parse_uuid_list(raw: Vec<String>, resource: &'static str) -> GraphResult<Vec<Uuid>> {
    raw.iter().map(|s| parse_uuid(s, resource)).collect()
}

// =============================================================================
// Row decoding
// =============================================================================

fn decode_entity(n: &neo4rs::Node) -> GraphResult<EntityNode> {
    let uuid = parse_uuid(&n.get::<String>("uuid").unwrap_or_default(), "entity")?;
    let embedding: Vec<f64> = n.get("summary_embedding").unwrap_or_default();

    Ok(EntityNode {
        uuid,
        group_id: n.get("group_id").unwrap_or_default(),
        name: n.get("name").unwrap_or_default(),
        entity_type: EntityType::parse(&n.get::<String>("entity_type").unwrap_or_default()),
        summary: n.get("summary").unwrap_or_default(),
        summary_embedding: if embedding.is_empty() {
            None
        } else {
            Some(embedding_from_f64(embedding))
        },
        fact_ids: n.get("fact_ids").unwrap_or_default(),
        created_at: parse_ts(
            &n.get::<String>("created_at").unwrap_or_default(),
            "entity.created_at",
        )?,
        consolidated_at: parse_ts_opt(
            n.get::<String>("consolidated_at").unwrap_or_default(),
            "entity.consolidated_at",
        )?,
    })
}

fn decode_episode(n: &neo4rs::Node) -> GraphResult<EpisodicNode> {
    let uuid = parse_uuid(&n.get::<String>("uuid").unwrap_or_default(), "episode")?;
    let embedding: Vec<f64> = n.get("embedding").unwrap_or_default();
    let metadata_raw: String = n.get("metadata").unwrap_or_default();

    Ok(EpisodicNode {
        uuid,
        group_id: n.get("group_id").unwrap_or_default(),
        name: n.get("name").unwrap_or_default(),
        episode_type: EpisodeType::parse(&n.get::<String>("episode_type").unwrap_or_default()),
        content: n.get("content").unwrap_or_default(),
        embedding: if embedding.is_empty() {
            None
        } else {
            Some(embedding_from_f64(embedding))
        },
        valid_at: parse_ts(
            &n.get::<String>("valid_at").unwrap_or_default(),
            "episode.valid_at",
        )?,
        invalid_at: parse_ts_opt(
            n.get::<String>("invalid_at").unwrap_or_default(),
            "episode.invalid_at",
        )?,
        created_at: parse_ts(
            &n.get::<String>("created_at").unwrap_or_default(),
            "episode.created_at",
        )?,
        reference_id: {
            let r: String = n.get("reference_id").unwrap_or_default();
            if r.is_empty() {
                None
            } else {
                Some(r)
            }
        },
        retroactive_days: n.get("retroactive_days").unwrap_or(0),
        disputed_by: parse_uuid_list(n.get("disputed_by").unwrap_or_default(), "episode")?,
        consolidated_at: parse_ts_opt(
            n.get::<String>("consolidated_at").unwrap_or_default(),
            "episode.consolidated_at",
        )?,
        metadata: if metadata_raw.is_empty() {
            None
        } else {
            serde_json::from_str(&metadata_raw).ok()
        },
    })
}

fn decode_community(n: &neo4rs::Node) -> GraphResult<CommunityNode> {
    let uuid = parse_uuid(&n.get::<String>("uuid").unwrap_or_default(), "community")?;
    let embedding: Vec<f64> = n.get("summary_embedding").unwrap_or_default();

    Ok(CommunityNode {
        uuid,
        group_id: n.get("group_id").unwrap_or_default(),
        name: n.get("name").unwrap_or_default(),
        community_level: n.get::<i64>("community_level").unwrap_or(0) as u32,
        summary: n.get("summary").unwrap_or_default(),
        summary_embedding: if embedding.is_empty() {
            None
        } else {
            Some(embedding_from_f64(embedding))
        },
        member_entity_ids: parse_uuid_list(
            n.get("member_entity_ids").unwrap_or_default(),
            "community",
        )?,
        member_count: n.get::<i64>("member_count").unwrap_or(0) as usize,
        domain_hints: n.get("domain_hints").unwrap_or_default(),
        importance_score: n.get("importance_score").unwrap_or(0.0),
        entity_count_at_last_rebuild: n.get::<i64>("entity_count_at_last_rebuild").unwrap_or(0)
            as usize,
        last_full_rebuild: parse_ts_opt(
            n.get::<String>("last_full_rebuild").unwrap_or_default(),
            "community.last_full_rebuild",
        )?,
        created_at: parse_ts(
            &n.get::<String>("created_at").unwrap_or_default(),
            "community.created_at",
        )?,
    })
}

fn decode_entity_edge(r: &neo4rs::Relation) -> GraphResult<EntityEdge> {
    Ok(EntityEdge {
        uuid: parse_uuid(&r.get::<String>("uuid").unwrap_or_default(), "edge")?,
        group_id: r.get("group_id").unwrap_or_default(),
        source_node_uuid: parse_uuid(
            &r.get::<String>("source_node_uuid").unwrap_or_default(),
            "edge",
        )?,
        target_node_uuid: parse_uuid(
            &r.get::<String>("target_node_uuid").unwrap_or_default(),
            "edge",
        )?,
        name: r.get("name").unwrap_or_default(),
        fact_ids: r.get("fact_ids").unwrap_or_default(),
        episodes: parse_uuid_list(r.get("episodes").unwrap_or_default(), "edge")?,
        valid_at: parse_ts(
            &r.get::<String>("valid_at").unwrap_or_default(),
            "edge.valid_at",
        )?,
        invalid_at: parse_ts_opt(
            r.get::<String>("invalid_at").unwrap_or_default(),
            "edge.invalid_at",
        )?,
        expired_at: parse_ts_opt(
            r.get::<String>("expired_at").unwrap_or_default(),
            "edge.expired_at",
        )?,
        disputed_by: parse_uuid_list(r.get("disputed_by").unwrap_or_default(), "edge")?,
        created_at: parse_ts(
            &r.get::<String>("created_at").unwrap_or_default(),
            "edge.created_at",
        )?,
    })
}

/// Cosine similarity as a Cypher fragment over a stored float list and the
/// `$query_embedding` parameter.
fn cosine_fragment(field: &str) -> String {
    format!(
        "CASE WHEN size(n.{field}) <> size($query_embedding) THEN 0.0 ELSE \
         reduce(dot = 0.0, i IN range(0, size(n.{field}) - 1) | dot + n.{field}[i] * $query_embedding[i]) / \
         (sqrt(reduce(a = 0.0, x IN n.{field} | a + x * x)) * \
          sqrt(reduce(b = 0.0, y IN $query_embedding | b + y * y)) + 1e-12) END"
    )
}

// =============================================================================
// GraphStore impl
// =============================================================================

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_episode(&self, node: &EpisodicNode) -> GraphResult<()> {
        let q = query(
            "MERGE (n:Episodic {uuid: $uuid})
             SET n.group_id = $group_id,
                 n.name = $name,
                 n.episode_type = $episode_type,
                 n.content = $content,
                 n.embedding = $embedding,
                 n.valid_at = $valid_at,
                 n.invalid_at = $invalid_at,
                 n.created_at = $created_at,
                 n.reference_id = $reference_id,
                 n.retroactive_days = $retroactive_days,
                 n.disputed_by = $disputed_by,
                 n.consolidated_at = $consolidated_at,
                 n.metadata = $metadata",
        )
        .param("uuid", node.uuid.to_string())
        .param("group_id", node.group_id.as_str())
        .param("name", node.name.as_str())
        .param("episode_type", node.episode_type.as_str())
        .param("content", node.content.as_str())
        .param(
            "embedding",
            embedding_to_f64(node.embedding.as_deref().unwrap_or(&[])),
        )
        .param("valid_at", node.valid_at.to_rfc3339())
        .param("invalid_at", ts_opt(&node.invalid_at))
        .param("created_at", node.created_at.to_rfc3339())
        .param("reference_id", node.reference_id.clone().unwrap_or_default())
        .param("retroactive_days", node.retroactive_days)
        .param("disputed_by", uuids_to_strings(&node.disputed_by))
        .param("consolidated_at", ts_opt(&node.consolidated_at))
        .param(
            "metadata",
            node.metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default(),
        );

        self.run("upsert_episode", q).await
    }

    async fn upsert_entity(&self, node: &EntityNode) -> GraphResult<()> {
        let q = query(
            "MERGE (n:Entity {uuid: $uuid})
             SET n.group_id = $group_id,
                 n.name = $name,
                 n.entity_type = $entity_type,
                 n.summary = $summary,
                 n.summary_embedding = $summary_embedding,
                 n.fact_ids = $fact_ids,
                 n.created_at = $created_at,
                 n.consolidated_at = $consolidated_at",
        )
        .param("uuid", node.uuid.to_string())
        .param("group_id", node.group_id.as_str())
        .param("name", node.name.as_str())
        .param("entity_type", node.entity_type.as_str())
        .param("summary", node.summary.as_str())
        .param(
            "summary_embedding",
            embedding_to_f64(node.summary_embedding.as_deref().unwrap_or(&[])),
        )
        .param("fact_ids", node.fact_ids.clone())
        .param("created_at", node.created_at.to_rfc3339())
        .param("consolidated_at", ts_opt(&node.consolidated_at));

        self.run("upsert_entity", q).await
    }

    async fn upsert_community(&self, node: &CommunityNode) -> GraphResult<()> {
        let q = query(
            "MERGE (n:Community {uuid: $uuid})
             SET n.group_id = $group_id,
                 n.name = $name,
                 n.community_level = $community_level,
                 n.summary = $summary,
                 n.summary_embedding = $summary_embedding,
                 n.member_entity_ids = $member_entity_ids,
                 n.member_count = $member_count,
                 n.domain_hints = $domain_hints,
                 n.importance_score = $importance_score,
                 n.entity_count_at_last_rebuild = $entity_count_at_last_rebuild,
                 n.last_full_rebuild = $last_full_rebuild,
                 n.created_at = $created_at",
        )
        .param("uuid", node.uuid.to_string())
        .param("group_id", node.group_id.as_str())
        .param("name", node.name.as_str())
        .param("community_level", node.community_level as i64)
        .param("summary", node.summary.as_str())
        .param(
            "summary_embedding",
            embedding_to_f64(node.summary_embedding.as_deref().unwrap_or(&[])),
        )
        .param("member_entity_ids", uuids_to_strings(&node.member_entity_ids))
        .param("member_count", node.member_count as i64)
        .param("domain_hints", node.domain_hints.clone())
        .param("importance_score", node.importance_score)
        .param(
            "entity_count_at_last_rebuild",
            node.entity_count_at_last_rebuild as i64,
        )
        .param("last_full_rebuild", ts_opt(&node.last_full_rebuild))
        .param("created_at", node.created_at.to_rfc3339());

        self.run("upsert_community", q).await
    }

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> GraphResult<()> {
        let q = query(
            "MATCH (s:Entity {uuid: $source}), (t:Entity {uuid: $target})
             MERGE (s)-[r:RELATES_TO {uuid: $uuid}]->(t)
             SET r.group_id = $group_id,
                 r.source_node_uuid = $source,
                 r.target_node_uuid = $target,
                 r.name = $name,
                 r.fact_ids = $fact_ids,
                 r.episodes = $episodes,
                 r.valid_at = $valid_at,
                 r.invalid_at = $invalid_at,
                 r.expired_at = $expired_at,
                 r.disputed_by = $disputed_by,
                 r.created_at = $created_at",
        )
        .param("uuid", edge.uuid.to_string())
        .param("source", edge.source_node_uuid.to_string())
        .param("target", edge.target_node_uuid.to_string())
        .param("group_id", edge.group_id.as_str())
        .param("name", edge.name.as_str())
        .param("fact_ids", edge.fact_ids.clone())
        .param("episodes", uuids_to_strings(&edge.episodes))
        .param("valid_at", edge.valid_at.to_rfc3339())
        .param("invalid_at", ts_opt(&edge.invalid_at))
        .param("expired_at", ts_opt(&edge.expired_at))
        .param("disputed_by", uuids_to_strings(&edge.disputed_by))
        .param("created_at", edge.created_at.to_rfc3339());

        self.run("upsert_entity_edge", q).await
    }

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> GraphResult<()> {
        let q = query(
            "MATCH (s:Episodic {uuid: $source}), (t:Entity {uuid: $target})
             MERGE (s)-[r:MENTIONS {uuid: $uuid}]->(t)
             SET r.group_id = $group_id, r.created_at = $created_at",
        )
        .param("uuid", edge.uuid.to_string())
        .param("source", edge.source_node_uuid.to_string())
        .param("target", edge.target_node_uuid.to_string())
        .param("group_id", edge.group_id.as_str())
        .param("created_at", edge.created_at.to_rfc3339());

        self.run("upsert_episodic_edge", q).await
    }

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> GraphResult<()> {
        let q = query(
            "MATCH (s:Community {uuid: $source}), (t:Entity {uuid: $target})
             MERGE (s)-[r:HAS_MEMBER {uuid: $uuid}]->(t)
             SET r.group_id = $group_id,
                 r.name = $name,
                 r.description = $description,
                 r.created_at = $created_at",
        )
        .param("uuid", edge.uuid.to_string())
        .param("source", edge.source_node_uuid.to_string())
        .param("target", edge.target_node_uuid.to_string())
        .param("group_id", edge.group_id.as_str())
        .param("name", edge.name.as_str())
        .param("description", edge.description.clone().unwrap_or_default())
        .param("created_at", edge.created_at.to_rfc3339());

        self.run("upsert_community_edge", q).await
    }

    async fn entity_by_name(
        &self,
        name: &str,
        group_id: &str,
    ) -> GraphResult<Option<EntityNode>> {
        let q = query(
            "MATCH (n:Entity {name: $name, group_id: $group_id}) RETURN n LIMIT 1",
        )
        .param("name", name)
        .param("group_id", group_id);

        let rows = self.rows("entity_by_name", q).await?;
        match rows.first() {
            Some(row) => {
                let node: neo4rs::Node =
                    row.get("n").map_err(|e| GraphError::ReadFailed {
                        operation: "entity_by_name".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(decode_entity(&node)?))
            }
            None => Ok(None),
        }
    }

    async fn node_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<Node>> {
        let q = query("MATCH (n {uuid: $uuid}) RETURN n, labels(n) AS labels LIMIT 1")
            .param("uuid", uuid.to_string());

        let rows = self.rows("node_by_uuid", q).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let node: neo4rs::Node = row.get("n").map_err(|e| GraphError::ReadFailed {
            operation: "node_by_uuid".to_string(),
            reason: e.to_string(),
        })?;
        let labels: Vec<String> = row.get("labels").unwrap_or_default();

        if labels.iter().any(|l| l == "Episodic") {
            Ok(Some(Node::Episodic(decode_episode(&node)?)))
        } else if labels.iter().any(|l| l == "Entity") {
            Ok(Some(Node::Entity(decode_entity(&node)?)))
        } else if labels.iter().any(|l| l == "Community") {
            Ok(Some(Node::Community(decode_community(&node)?)))
        } else {
            Ok(None)
        }
    }

    async fn entity_edge_by_uuid(&self, uuid: Uuid) -> GraphResult<Option<EntityEdge>> {
        let q = query("MATCH ()-[r:RELATES_TO {uuid: $uuid}]->() RETURN r LIMIT 1")
            .param("uuid", uuid.to_string());

        let rows = self.rows("entity_edge_by_uuid", q).await?;
        match rows.first() {
            Some(row) => {
                let rel: neo4rs::Relation =
                    row.get("r").map_err(|e| GraphError::ReadFailed {
                        operation: "entity_edge_by_uuid".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(decode_entity_edge(&rel)?))
            }
            None => Ok(None),
        }
    }

    async fn entity_edge_between(
        &self,
        source_uuid: Uuid,
        target_uuid: Uuid,
        name: &str,
    ) -> GraphResult<Option<EntityEdge>> {
        let q = query(
            "MATCH (:Entity {uuid: $source})-[r:RELATES_TO {name: $name}]->(:Entity {uuid: $target})
             RETURN r LIMIT 1",
        )
        .param("source", source_uuid.to_string())
        .param("target", target_uuid.to_string())
        .param("name", name);

        let rows = self.rows("entity_edge_between", q).await?;
        match rows.first() {
            Some(row) => {
                let rel: neo4rs::Relation =
                    row.get("r").map_err(|e| GraphError::ReadFailed {
                        operation: "entity_edge_between".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(decode_entity_edge(&rel)?))
            }
            None => Ok(None),
        }
    }

    async fn similarity_search(
        &self,
        group_id: &str,
        query_embedding: &[f32],
        labels: &[NodeLabel],
        limit: usize,
        date_window: Option<DateWindow>,
    ) -> GraphResult<Vec<ScoredNode>> {
        assert!(limit > 0, "limit must be positive");

        let mut scored = Vec::new();

        for label in labels {
            let (field, date_clause) = match label {
                NodeLabel::Episodic => (
                    "embedding",
                    " AND ($valid_from = '' OR n.valid_at >= $valid_from)
                      AND ($valid_to = '' OR n.valid_at <= $valid_to)",
                ),
                NodeLabel::Entity | NodeLabel::Community => ("summary_embedding", ""),
            };

            let cypher = format!(
                "MATCH (n:{label})
                 WHERE n.group_id = $group_id AND n.{field} IS NOT NULL AND size(n.{field}) > 0{date_clause}
                 WITH n, {cosine} AS similarity
                 RETURN n, similarity
                 ORDER BY similarity DESC, n.uuid ASC
                 LIMIT $limit",
                label = label.as_str(),
                field = field,
                date_clause = date_clause,
                cosine = cosine_fragment(field),
            );

            let window = date_window.unwrap_or_default();
            let q = query(&cypher)
                .param("group_id", group_id)
                .param("query_embedding", embedding_to_f64(query_embedding))
                .param("limit", limit as i64)
                .param("valid_from", ts_opt(&window.valid_from))
                .param("valid_to", ts_opt(&window.valid_to));

            for row in self.rows("similarity_search", q).await? {
                let node: neo4rs::Node = row.get("n").map_err(|e| GraphError::ReadFailed {
                    operation: "similarity_search".to_string(),
                    reason: e.to_string(),
                })?;
                let similarity: f64 = row.get("similarity").unwrap_or(0.0);

                let node = match label {
                    NodeLabel::Episodic => Node::Episodic(decode_episode(&node)?),
                    NodeLabel::Entity => Node::Entity(decode_entity(&node)?),
                    NodeLabel::Community => Node::Community(decode_community(&node)?),
                };
                scored.push(ScoredNode { node, similarity });
            }
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node.uuid().cmp(&b.node.uuid()))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn neighbors(
        &self,
        seed_uuids: &[Uuid],
        hops: u32,
        direction: Direction,
        group_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<EntityNode>> {
        assert!(hops > 0, "hop count must be positive");

        // Variable-length bounds cannot be parameterized; the hop count is
        // inlined as a checked integer.
        let pattern = match direction {
            Direction::Outgoing => format!("(s)-[:RELATES_TO*1..{hops}]->(m:Entity)"),
            Direction::Incoming => format!("(s)<-[:RELATES_TO*1..{hops}]-(m:Entity)"),
            Direction::Both => format!("(s)-[:RELATES_TO*1..{hops}]-(m:Entity)"),
        };

        let cypher = format!(
            "MATCH (s:Entity) WHERE s.uuid IN $seeds AND s.group_id = $group_id
             MATCH {pattern}
             WHERE m.group_id = $group_id AND NOT m.uuid IN $seeds
             RETURN DISTINCT m
             ORDER BY m.uuid ASC
             LIMIT $limit"
        );

        let q = query(&cypher)
            .param("seeds", uuids_to_strings(seed_uuids))
            .param("group_id", group_id)
            .param("limit", limit as i64);

        let mut result = Vec::new();
        for row in self.rows("neighbors", q).await? {
            let node: neo4rs::Node = row.get("m").map_err(|e| GraphError::ReadFailed {
                operation: "neighbors".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity(&node)?);
        }
        Ok(result)
    }

    async fn edges_among(&self, uuids: &[Uuid], group_id: &str) -> GraphResult<Vec<EntityEdge>> {
        let q = query(
            "MATCH (s:Entity)-[r:RELATES_TO]->(t:Entity)
             WHERE r.group_id = $group_id AND s.uuid IN $uuids AND t.uuid IN $uuids
             RETURN r",
        )
        .param("uuids", uuids_to_strings(uuids))
        .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("edges_among", q).await? {
            let rel: neo4rs::Relation = row.get("r").map_err(|e| GraphError::ReadFailed {
                operation: "edges_among".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity_edge(&rel)?);
        }
        Ok(result)
    }

    async fn community_members(
        &self,
        community_uuids: &[Uuid],
        group_id: &str,
    ) -> GraphResult<Vec<EntityNode>> {
        let q = query(
            "MATCH (c:Community)-[:HAS_MEMBER]->(m:Entity)
             WHERE c.uuid IN $uuids AND m.group_id = $group_id
             RETURN DISTINCT m ORDER BY m.uuid ASC",
        )
        .param("uuids", uuids_to_strings(community_uuids))
        .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("community_members", q).await? {
            let node: neo4rs::Node = row.get("m").map_err(|e| GraphError::ReadFailed {
                operation: "community_members".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity(&node)?);
        }
        Ok(result)
    }

    async fn entities_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityNode>> {
        let q = query("MATCH (n:Entity {group_id: $group_id}) RETURN n ORDER BY n.uuid ASC")
            .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("entities_in_group", q).await? {
            let node: neo4rs::Node = row.get("n").map_err(|e| GraphError::ReadFailed {
                operation: "entities_in_group".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity(&node)?);
        }
        Ok(result)
    }

    async fn entity_edges_in_group(&self, group_id: &str) -> GraphResult<Vec<EntityEdge>> {
        let q = query(
            "MATCH ()-[r:RELATES_TO]->() WHERE r.group_id = $group_id RETURN r",
        )
        .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("entity_edges_in_group", q).await? {
            let rel: neo4rs::Relation = row.get("r").map_err(|e| GraphError::ReadFailed {
                operation: "entity_edges_in_group".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity_edge(&rel)?);
        }
        Ok(result)
    }

    async fn communities_in_group(&self, group_id: &str) -> GraphResult<Vec<CommunityNode>> {
        let q = query(
            "MATCH (n:Community {group_id: $group_id}) RETURN n ORDER BY n.uuid ASC",
        )
        .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("communities_in_group", q).await? {
            let node: neo4rs::Node = row.get("n").map_err(|e| GraphError::ReadFailed {
                operation: "communities_in_group".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_community(&node)?);
        }
        Ok(result)
    }

    async fn edges_of_entity(
        &self,
        entity_uuid: Uuid,
        direction: Direction,
        active_only: bool,
    ) -> GraphResult<Vec<EntityEdge>> {
        let pattern = match direction {
            Direction::Outgoing => "(n)-[r:RELATES_TO]->()",
            Direction::Incoming => "(n)<-[r:RELATES_TO]-()",
            Direction::Both => "(n)-[r:RELATES_TO]-()",
        };
        let active_clause = if active_only {
            " AND (r.invalid_at IS NULL OR r.invalid_at = '')"
        } else {
            ""
        };

        let cypher = format!(
            "MATCH (n:Entity {{uuid: $uuid}}) MATCH {pattern} WHERE true{active_clause} RETURN r"
        );
        let q = query(&cypher).param("uuid", entity_uuid.to_string());

        let mut result = Vec::new();
        for row in self.rows("edges_of_entity", q).await? {
            let rel: neo4rs::Relation = row.get("r").map_err(|e| GraphError::ReadFailed {
                operation: "edges_of_entity".to_string(),
                reason: e.to_string(),
            })?;
            result.push(decode_entity_edge(&rel)?);
        }
        Ok(result)
    }

    async fn unconsolidated_mentions(
        &self,
        group_id: &str,
        before: DateTime<Utc>,
    ) -> GraphResult<Vec<(Uuid, EpisodicNode)>> {
        let q = query(
            "MATCH (e:Episodic)-[r:MENTIONS]->(m:Entity)
             WHERE r.group_id = $group_id
               AND (e.consolidated_at IS NULL OR e.consolidated_at = '')
               AND e.created_at < $before
             RETURN m.uuid AS entity_uuid, e",
        )
        .param("group_id", group_id)
        .param("before", before.to_rfc3339());

        let mut result = Vec::new();
        for row in self.rows("unconsolidated_mentions", q).await? {
            let entity_uuid: String = row.get("entity_uuid").unwrap_or_default();
            let node: neo4rs::Node = row.get("e").map_err(|e| GraphError::ReadFailed {
                operation: "unconsolidated_mentions".to_string(),
                reason: e.to_string(),
            })?;
            result.push((parse_uuid(&entity_uuid, "entity")?, decode_episode(&node)?));
        }
        Ok(result)
    }

    async fn merge_candidates(&self, group_id: &str) -> GraphResult<Vec<MergeCandidate>> {
        let q = query(
            "MATCH (a:Entity {group_id: $group_id}), (b:Entity {group_id: $group_id})
             WHERE a.uuid < b.uuid AND a.name <> b.name
               AND (toLower(a.name) CONTAINS toLower(b.name)
                    OR toLower(b.name) CONTAINS toLower(a.name))
             RETURN a, b,
                    COUNT { (a)-[:RELATES_TO|MENTIONS]-() } AS degree_a,
                    COUNT { (b)-[:RELATES_TO|MENTIONS]-() } AS degree_b",
        )
        .param("group_id", group_id);

        let mut result = Vec::new();
        for row in self.rows("merge_candidates", q).await? {
            let a: neo4rs::Node = row.get("a").map_err(|e| GraphError::ReadFailed {
                operation: "merge_candidates".to_string(),
                reason: e.to_string(),
            })?;
            let b: neo4rs::Node = row.get("b").map_err(|e| GraphError::ReadFailed {
                operation: "merge_candidates".to_string(),
                reason: e.to_string(),
            })?;
            result.push(MergeCandidate {
                a: decode_entity(&a)?,
                b: decode_entity(&b)?,
                degree_a: row.get::<i64>("degree_a").unwrap_or(0) as usize,
                degree_b: row.get::<i64>("degree_b").unwrap_or(0) as usize,
            });
        }
        Ok(result)
    }

    async fn merge_entity_into(&self, duplicate: Uuid, canonical: Uuid) -> GraphResult<()> {
        assert_ne!(duplicate, canonical, "cannot merge an entity into itself");

        let dup = duplicate.to_string();
        let canon = canonical.to_string();

        // Ordered redirect sequence; each statement is self-contained so a
        // retry after a partial failure converges on the same end state.
        let statements = [
            // outgoing
            "MATCH (d:Entity {uuid: $dup})-[r:RELATES_TO]->(o)
             WHERE o.uuid <> $canon
             MATCH (c:Entity {uuid: $canon})
             MERGE (c)-[r2:RELATES_TO {uuid: r.uuid}]->(o)
             SET r2 = properties(r), r2.source_node_uuid = $canon
             DELETE r",
            // incoming
            "MATCH (o)-[r:RELATES_TO]->(d:Entity {uuid: $dup})
             WHERE o.uuid <> $canon
             MATCH (c:Entity {uuid: $canon})
             MERGE (o)-[r2:RELATES_TO {uuid: r.uuid}]->(c)
             SET r2 = properties(r), r2.target_node_uuid = $canon
             DELETE r",
            // mentions
            "MATCH (e:Episodic)-[r:MENTIONS]->(d:Entity {uuid: $dup})
             MATCH (c:Entity {uuid: $canon})
             MERGE (e)-[r2:MENTIONS {uuid: r.uuid}]->(c)
             SET r2 = properties(r)
             DELETE r",
            // the duplicate and whatever is left hanging off it
            "MATCH (d:Entity {uuid: $dup}) DETACH DELETE d",
        ];

        for cypher in statements {
            let q = query(cypher)
                .param("dup", dup.as_str())
                .param("canon", canon.as_str());
            self.run("merge_entity_into", q).await?;
        }
        Ok(())
    }

    async fn delete_orphan_edges(&self, group_id: &str) -> GraphResult<u64> {
        let q = query(
            "MATCH ()-[r:RELATES_TO]->()
             WHERE r.group_id = $group_id AND (r.episodes IS NULL OR size(r.episodes) = 0)
             DELETE r
             RETURN count(r) AS removed",
        )
        .param("group_id", group_id);

        let rows = self.rows("delete_orphan_edges", q).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get::<i64>("removed").ok())
            .unwrap_or(0) as u64)
    }

    async fn detach_delete(&self, uuid: Uuid) -> GraphResult<()> {
        let q = query("MATCH (n {uuid: $uuid}) DETACH DELETE n").param("uuid", uuid.to_string());
        self.run("detach_delete", q).await
    }

    async fn delete_entity_edge(&self, uuid: Uuid) -> GraphResult<()> {
        let q = query("MATCH ()-[r:RELATES_TO {uuid: $uuid}]->() DELETE r")
            .param("uuid", uuid.to_string());
        self.run("delete_entity_edge", q).await
    }

    async fn delete_community_edges(&self, community_uuid: Uuid) -> GraphResult<()> {
        let q = query("MATCH (c:Community {uuid: $uuid})-[r:HAS_MEMBER]->() DELETE r")
            .param("uuid", community_uuid.to_string());
        self.run("delete_community_edges", q).await
    }
}
