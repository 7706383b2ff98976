//! Entity and relationship extraction for the contract knowledge graph.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use clauselens_core::{ChunkingConfig, Result};
use clauselens_ingest::ContractChunker;

use crate::llm::LlmClient;

/// Entity taxonomy.
pub const ENTITY_TYPES: [&str; 7] = [
    "party",
    "person",
    "date",
    "amount",
    "location",
    "term",
    "percentage",
];

/// Known relationship types; anything else the model invents becomes
/// `related_to`.
pub const RELATIONSHIP_TYPES: [&str; 10] = [
    "party_to_contract",
    "effective_date",
    "expiration_date",
    "governs",
    "payment_to",
    "employs",
    "subsidiary_of",
    "controls",
    "guarantor_for",
    "beneficiary_of",
];

const EXTRACTION_CONFIDENCE: f64 = 0.8;
const RELATIONSHIP_CONFIDENCE: f64 = 0.7;

static PARTY_SUFFIXES: [&str; 8] = [
    ", INC.", ", LLC", ", LTD.", ", CORP.", " INC", " LLC", " LTD", " CORP",
];
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static DATE_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{2,4})").unwrap());
static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\$€£]?\s*([\d,]+(?:\.\d{2})?)").unwrap());

const EXTRACTION_PROMPT: &str = "You are a legal document analyst specializing in contract entity extraction.\n\
Extract all entities and their relationships from this contract excerpt.\n\n\
Entity types to extract:\n\
- party: Companies, organizations, LLCs, corporations\n\
- person: Named individuals (executives, signatories)\n\
- date: Important dates (effective date, expiration, renewal, payment due)\n\
- amount: Monetary values (contract value, fees, penalties, caps)\n\
- location: Addresses, jurisdictions, governing law locations\n\
- term: Duration terms (1 year, 36 months, perpetual)\n\
- percentage: Rates, percentages (interest, commission, ownership)\n\n\
Contract excerpt:\n{text}\n\n\
Respond with JSON of the form {\"entities\": [{\"type\", \"name\", \"value\", \"context\"}], \
\"relationships\": [{\"source\", \"target\", \"type\", \"description\"}]}.\n\
Extract conservatively - only include entities that are clearly stated.";

/// A validated entity ready for storage.
#[derive(Debug, Clone)]
pub struct ParsedEntity {
    pub entity_type: String,
    pub name: String,
    pub normalized_name: String,
    pub value: Option<String>,
    pub context: Option<String>,
    pub confidence: f64,
}

/// A relationship as the model stated it, by entity name.
#[derive(Debug, Clone)]
pub struct RawRelationship {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    pub description: Option<String>,
}

/// A relationship resolved to stored entity IDs.
#[derive(Debug, Clone)]
pub struct ResolvedRelationship {
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub relationship_type: String,
    pub description: Option<String>,
    pub confidence: f64,
}

/// Canonicalize an entity name for deduplication and cross-document joins.
pub fn normalize_entity_name(name: &str, entity_type: &str) -> String {
    let mut normalized = name.trim().to_uppercase();

    match entity_type {
        "party" => {
            for suffix in PARTY_SUFFIXES {
                normalized = normalized.replace(suffix, "");
            }
            normalized = WHITESPACE.replace_all(&normalized, " ").trim().to_string();
        }
        "date" => {
            if let Some(caps) = DATE_PARTS.captures(name) {
                let m = &caps[1];
                let d = &caps[2];
                let mut y = caps[3].to_string();
                if y.len() == 2 {
                    let n: u32 = y.parse().unwrap_or(0);
                    y = if n < 50 {
                        format!("20{}", y)
                    } else {
                        format!("19{}", y)
                    };
                }
                normalized = format!("{}-{:0>2}-{:0>2}", y, m, d);
            }
        }
        "amount" => {
            if let Some(caps) = AMOUNT.captures(name) {
                normalized = caps[1].replace(',', "");
            }
        }
        _ => {}
    }

    normalized
}

/// Validate one model response into entities plus raw relationships.
pub fn parse_entity_response(value: &Value) -> (Vec<ParsedEntity>, Vec<RawRelationship>) {
    let mut entities = Vec::new();
    if let Some(items) = value["entities"].as_array() {
        for item in items {
            let Some(raw_type) = item["type"].as_str() else {
                continue;
            };
            let Some(name) = item["name"].as_str().filter(|n| !n.trim().is_empty()) else {
                continue;
            };

            let entity_type = raw_type.to_lowercase();
            if !ENTITY_TYPES.contains(&entity_type.as_str()) {
                continue;
            }

            let name: String = name.chars().take(500).collect();
            entities.push(ParsedEntity {
                normalized_name: normalize_entity_name(&name, &entity_type),
                name,
                entity_type,
                value: item["value"].as_str().map(String::from),
                context: item["context"]
                    .as_str()
                    .map(|c| c.chars().take(1000).collect()),
                confidence: EXTRACTION_CONFIDENCE,
            });
        }
    }

    let mut relationships = Vec::new();
    if let Some(items) = value["relationships"].as_array() {
        for item in items {
            let (Some(source), Some(target)) = (item["source"].as_str(), item["target"].as_str())
            else {
                continue;
            };
            relationships.push(RawRelationship {
                source: source.to_string(),
                target: target.to_string(),
                relationship_type: item["type"].as_str().unwrap_or("related_to").to_string(),
                description: item["description"].as_str().map(String::from),
            });
        }
    }

    (entities, relationships)
}

/// Drop entities whose (type, normalized name) pair was already seen.
pub fn deduplicate_entities(entities: Vec<ParsedEntity>) -> Vec<ParsedEntity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert((e.entity_type.clone(), e.normalized_name.clone())))
        .collect()
}

/// Resolve name-based relationships to stored entity IDs.
///
/// Unresolvable names and self-loops are dropped; unknown relationship
/// types collapse to `related_to`.
pub fn resolve_relationships(
    raw: Vec<RawRelationship>,
    id_by_normalized_name: &HashMap<String, i64>,
) -> Vec<ResolvedRelationship> {
    raw.into_iter()
        .filter_map(|rel| {
            let source_name = normalize_entity_name(&rel.source, "party");
            let target_name = normalize_entity_name(&rel.target, "party");
            let source_id = *id_by_normalized_name.get(&source_name)?;
            let target_id = *id_by_normalized_name.get(&target_name)?;
            if source_id == target_id {
                return None;
            }

            let relationship_type = if RELATIONSHIP_TYPES.contains(&rel.relationship_type.as_str())
            {
                rel.relationship_type
            } else {
                "related_to".to_string()
            };

            Some(ResolvedRelationship {
                source_entity_id: source_id,
                target_entity_id: target_id,
                relationship_type,
                description: rel.description,
                confidence: RELATIONSHIP_CONFIDENCE,
            })
        })
        .collect()
}

/// Runs entity extraction over a document's text.
pub struct EntityExtractor {
    llm: LlmClient,
    chunker: ContractChunker,
}

impl EntityExtractor {
    pub fn new(llm: LlmClient, chunking: &ChunkingConfig) -> Self {
        Self {
            llm,
            chunker: ContractChunker::new(
                chunking.extraction_chunk_size,
                chunking.extraction_chunk_overlap,
            ),
        }
    }

    /// Extract deduplicated entities plus unresolved relationships.
    pub async fn extract(&self, text: &str) -> Result<(Vec<ParsedEntity>, Vec<RawRelationship>)> {
        let mut all_entities = Vec::new();
        let mut all_relationships = Vec::new();

        for chunk in self.chunker.chunk(text) {
            // The prompt window is tighter than extraction chunks
            let window: String = chunk.content.chars().take(4000).collect();
            let prompt = EXTRACTION_PROMPT.replace("{text}", &window);

            match self.llm.generate_json(&prompt).await {
                Ok(value) => {
                    let (entities, relationships) = parse_entity_response(&value);
                    all_entities.extend(entities);
                    all_relationships.extend(relationships);
                }
                Err(e) => warn!("Entity extraction window failed: {}", e),
            }
        }

        Ok((deduplicate_entities(all_entities), all_relationships))
    }
}
