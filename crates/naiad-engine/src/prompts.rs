//! Prompt and schema builders for every structured LLM call the engine makes
//!
//! Schemas are plain JSON Schema objects; the provider enforces required
//! keys, the call sites parse the rest leniently.

use naiad_graph::{EntityNode, EntityType, EpisodicNode};
use serde_json::{json, Value};

/// Relations the extraction prompt must always surface when present.
const MANDATED_RELATIONS: &str =
    "NAMED_AFTER, FOUNDED_BY, DESCRIBED_BY, DISCOVERED_BY, DEDICATED_TO";

// =============================================================================
// Extraction
// =============================================================================

pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "entity_type": {"type": "string"},
                        "summary": {"type": "string"},
                        "confidence": {"type": "number"}
                    },
                    "required": ["name", "entity_type", "summary", "confidence"]
                }
            },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source_name": {"type": "string"},
                        "target_name": {"type": "string"},
                        "relation_name": {"type": "string"},
                        "confidence": {"type": "number"},
                        "is_negated": {"type": "boolean"},
                        "temporal_validity": {"type": "string", "enum": ["current", "historical"]}
                    },
                    "required": ["source_name", "target_name", "relation_name", "confidence"]
                }
            }
        },
        "required": ["entities", "relations"]
    })
}

pub fn extraction_prompt(content: &str, known_entities: &[EntityNode]) -> String {
    let mut prompt = String::from(
        "Extract entities and typed relations from the text below.\n\n\
         Rules:\n\
         - entity_type must be one of: ",
    );
    prompt.push_str(EntityType::prompt_values());
    prompt.push_str(
        ".\n\
         - Relation names are UPPER_SNAKE_CASE verbs, e.g. WORKS_AT, KNOWS.\n\
         - Always extract attribution and dedication relations when present: ",
    );
    prompt.push_str(MANDATED_RELATIONS);
    prompt.push_str(
        ". These may never be dropped.\n\
         - Mark a relation is_negated when the text denies it.\n\
         - Mark temporal_validity \"historical\" for relations stated in the past tense, \
         \"current\" otherwise.\n\
         - Give each entity a one-sentence summary grounded in the text.\n",
    );

    if !known_entities.is_empty() {
        prompt.push_str(
            "\nKnown entities in this graph. Reuse these exact canonical names when the text \
             refers to them:\n",
        );
        for entity in known_entities {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                entity.name,
                entity.entity_type.as_str(),
                entity.summary
            ));
        }
    }

    prompt.push_str("\nText:\n");
    prompt.push_str(content);
    prompt
}

// =============================================================================
// Summary merge (entity resolution)
// =============================================================================

pub fn merge_summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "merged_summary": {"type": "string"}
        },
        "required": ["merged_summary"]
    })
}

pub fn merge_summary_prompt(entity: &EntityNode, new_summary: &str) -> String {
    format!(
        "Merge the new context into the existing summary of the entity \"{}\" ({}). \
         Keep it to 2-4 sentences and preserve concrete facts from both.\n\n\
         Existing summary:\n{}\n\n\
         New context:\n{}",
        entity.name,
        entity.entity_type.as_str(),
        entity.summary,
        new_summary
    )
}

// =============================================================================
// Consolidation (sleep phase 1)
// =============================================================================

pub fn consolidation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "confidence": {"type": "number"}
        },
        "required": ["summary", "confidence"]
    })
}

pub fn consolidation_prompt(entity: &EntityNode, episodes: &[EpisodicNode]) -> String {
    let mut prompt = format!(
        "Rewrite the summary of the entity \"{}\" ({}) using the new observations.\n\
         Rules: 2-4 sentences; preserve attribution facts; no speculation.\n\n\
         Current summary:\n{}\n\n\
         New observations:\n",
        entity.name,
        entity.entity_type.as_str(),
        entity.summary
    );
    for episode in episodes {
        prompt.push_str(&format!("- {}\n", episode.content));
    }
    prompt
}

/// Tiered merge: the long-term entity, the freshly synthesised short-term
/// summary, and the long-term entity's active relations for context.
pub fn tiered_merge_prompt(
    ltm_entity: &EntityNode,
    stm_summary: &str,
    outgoing: &[(String, String)],
    incoming: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "Integrate the recent findings into the long-term summary of \"{}\" ({}).\n\
         Rules: 2-4 sentences; preserve attribution facts; no speculation.\n\n\
         Long-term summary:\n{}\n\n\
         Recent findings:\n{}\n",
        ltm_entity.name,
        ltm_entity.entity_type.as_str(),
        ltm_entity.summary,
        stm_summary
    );

    if !outgoing.is_empty() || !incoming.is_empty() {
        prompt.push_str("\nKnown relations:\n");
        for (name, peer) in outgoing {
            prompt.push_str(&format!("- {} {} {}\n", ltm_entity.name, name, peer));
        }
        for (name, peer) in incoming {
            prompt.push_str(&format!("- {} {} {}\n", peer, name, ltm_entity.name));
        }
    }
    prompt
}

// =============================================================================
// Community summaries (sleep phase 3)
// =============================================================================

pub fn community_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "summary": {"type": "string"},
            "domain_hints": {"type": "array", "items": {"type": "string"}},
            "importance_score": {"type": "number"}
        },
        "required": ["name", "summary", "domain_hints", "importance_score"]
    })
}

pub fn community_prompt(member_summaries: &[(String, String)]) -> String {
    let mut prompt = String::from(
        "These entities form one cluster of a knowledge graph. Name the cluster, \
         summarise what binds it in 2-4 sentences, list lowercase kebab-case \
         domain_hints tags, and score its importance_score between 0 and 1.\n\n\
         Members:\n",
    );
    for (name, summary) in member_summaries {
        prompt.push_str(&format!("- {name}: {summary}\n"));
    }
    prompt
}
