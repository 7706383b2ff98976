//! Clause extraction with keyword-based risk scoring.
//!
//! The model proposes clauses; everything it returns is validated against
//! the known clause taxonomy and re-scored with the due-diligence keyword
//! tables before storage.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::{debug, warn};

use clauselens_core::{ChunkingConfig, Result};
use clauselens_ingest::ContractChunker;

use crate::llm::LlmClient;

/// Contract clause taxonomy for M&A review.
pub const CLAUSE_TYPES: [&str; 16] = [
    "change_of_control",
    "termination",
    "ip_assignment",
    "indemnification",
    "limitation_of_liability",
    "confidentiality",
    "non_compete",
    "non_solicitation",
    "payment_terms",
    "warranty",
    "governing_law",
    "dispute_resolution",
    "force_majeure",
    "assignment",
    "audit_rights",
    "data_protection",
];

/// Stored clause content is capped; the full text lives in the chunk.
const MAX_CLAUSE_CONTENT: usize = 5000;

/// Default confidence for model-extracted clauses.
const EXTRACTION_CONFIDENCE: f64 = 0.8;

struct RiskKeywords {
    high: &'static [&'static str],
    critical: &'static [&'static str],
}

/// Keyword triggers per clause type, checked against lowercased content.
/// Critical factors are checked before high.
static RISK_FACTORS: Lazy<HashMap<&'static str, RiskKeywords>> = Lazy::new(|| {
    HashMap::from([
        (
            "change_of_control",
            RiskKeywords {
                high: &["consent required", "may terminate", "acceleration", "buyout"],
                critical: &["automatic termination", "immediate vesting", "put option"],
            },
        ),
        (
            "termination",
            RiskKeywords {
                high: &["convenience", "30 days", "without cause"],
                critical: &["immediate termination", "material breach undefined"],
            },
        ),
        (
            "ip_assignment",
            RiskKeywords {
                high: &["work for hire", "all rights", "worldwide"],
                critical: &["pre-existing ip", "joint ownership", "reversion"],
            },
        ),
        (
            "indemnification",
            RiskKeywords {
                high: &["unlimited", "gross negligence", "willful misconduct"],
                critical: &["uncapped", "consequential damages", "third party claims"],
            },
        ),
        (
            "limitation_of_liability",
            RiskKeywords {
                high: &["cap less than contract value", "12 months fees"],
                critical: &["no limitation", "excludes indemnification"],
            },
        ),
    ])
});

const EXTRACTION_PROMPT: &str = "You are a legal contract analyst specializing in M&A due diligence.\n\
Analyze the following contract excerpt and extract any legal clauses present.\n\n\
For each clause found, provide:\n\
1. clause_type: One of: {clause_types}\n\
2. content: The exact text of the clause\n\
3. summary: A 1-2 sentence plain English summary\n\
4. risk_level: low/medium/high/critical based on M&A implications\n\
5. risk_factors: List of specific concerns for buyers\n\n\
Contract excerpt:\n{text}\n\n\
Respond with a JSON array of extracted clauses. If no relevant clauses are found, return an empty array [].\n\
Only extract clauses that are clearly present. Do not hallucinate or infer clauses that aren't explicitly stated.";

/// A validated clause ready for storage.
#[derive(Debug, Clone)]
pub struct ParsedClause {
    pub clause_type: String,
    pub content: String,
    pub summary: Option<String>,
    pub risk_level: String,
    pub risk_factors: Vec<String>,
    pub confidence: f64,
}

/// Score a clause from its content keywords.
///
/// The model's own risk opinion only overrides this when it is MORE severe
/// (critical or high); it can never downgrade a keyword hit.
pub fn assess_risk(clause_type: &str, content: &str) -> &'static str {
    let content_lower = content.to_lowercase();

    if let Some(factors) = RISK_FACTORS.get(clause_type) {
        if factors.critical.iter().any(|k| content_lower.contains(k)) {
            return "critical";
        }
        if factors.high.iter().any(|k| content_lower.contains(k)) {
            return "high";
        }
    }

    match clause_type {
        "change_of_control" | "ip_assignment" | "indemnification" => "medium",
        _ => "low",
    }
}

/// Validate and normalize one model response into clauses.
pub fn parse_clause_response(value: &Value) -> Vec<ParsedClause> {
    // A lone object is treated as a single-element array
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => return Vec::new(),
    };

    let mut clauses = Vec::new();
    for item in items {
        let Some(raw_type) = item["clause_type"].as_str() else {
            continue;
        };
        let Some(content) = item["content"].as_str().filter(|c| !c.trim().is_empty()) else {
            continue;
        };

        let clause_type = raw_type.to_lowercase().replace(' ', "_");
        if !CLAUSE_TYPES.contains(&clause_type.as_str()) {
            debug!("Dropping clause with unknown type {:?}", raw_type);
            continue;
        }

        let mut risk_level = assess_risk(&clause_type, content).to_string();
        if let Some(model_risk) = item["risk_level"].as_str() {
            if matches!(model_risk, "critical" | "high") {
                risk_level = model_risk.to_string();
            }
        }

        let risk_factors = item["risk_factors"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let content: String = content.chars().take(MAX_CLAUSE_CONTENT).collect();
        clauses.push(ParsedClause {
            clause_type,
            content,
            summary: item["summary"].as_str().map(String::from),
            risk_level,
            risk_factors,
            confidence: EXTRACTION_CONFIDENCE,
        });
    }
    clauses
}

/// Drop clauses whose content prefix was already seen. Extraction windows
/// overlap, so the same clause often comes back twice.
pub fn deduplicate_clauses(clauses: Vec<ParsedClause>) -> Vec<ParsedClause> {
    let mut seen = std::collections::HashSet::new();
    clauses
        .into_iter()
        .filter(|c| {
            let key: String = c.content.to_lowercase().trim().chars().take(200).collect();
            seen.insert(key)
        })
        .collect()
}

/// Overall document risk from per-level clause counts.
pub fn overall_risk(risk_counts: &HashMap<String, i64>) -> &'static str {
    let count = |level: &str| risk_counts.get(level).copied().unwrap_or(0);
    if count("critical") > 0 {
        return "critical";
    }
    if count("high") > 2 {
        return "high";
    }
    if count("high") > 0 || count("medium") > 5 {
        return "medium";
    }
    "low"
}

/// Runs clause extraction over a document's text.
pub struct ClauseExtractor {
    llm: LlmClient,
    chunker: ContractChunker,
}

impl ClauseExtractor {
    pub fn new(llm: LlmClient, chunking: &ChunkingConfig) -> Self {
        Self {
            llm,
            chunker: ContractChunker::new(
                chunking.extraction_chunk_size,
                chunking.extraction_chunk_overlap,
            ),
        }
    }

    /// Extract and deduplicate clauses from full document text.
    ///
    /// A failed model call for one window skips that window rather than
    /// failing the document.
    pub async fn extract(&self, text: &str) -> Result<Vec<ParsedClause>> {
        let mut all = Vec::new();
        for chunk in self.chunker.chunk(text) {
            let prompt = EXTRACTION_PROMPT
                .replace("{clause_types}", &CLAUSE_TYPES.join(", "))
                .replace("{text}", &chunk.content);

            match self.llm.generate_json(&prompt).await {
                Ok(value) => all.extend(parse_clause_response(&value)),
                Err(e) => warn!("Clause extraction window failed: {}", e),
            }
        }
        Ok(deduplicate_clauses(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assess_risk_keyword_tiers() {
        assert_eq!(
            assess_risk("indemnification", "Supplier's liability is uncapped."),
            "critical"
        );
        assert_eq!(
            assess_risk("indemnification", "Excludes gross negligence only."),
            "high"
        );
        assert_eq!(
            assess_risk("indemnification", "Standard mutual indemnity."),
            "medium"
        );
        assert_eq!(assess_risk("governing_law", "Delaware law governs."), "low");
    }

    #[test]
    fn test_critical_checked_before_high() {
        // Contains both an "unlimited" (high) and "uncapped" (critical) trigger
        let risk = assess_risk("indemnification", "unlimited and uncapped obligations");
        assert_eq!(risk, "critical");
    }

    #[test]
    fn test_parse_validates_type_and_content() {
        let value = json!([
            {"clause_type": "termination", "content": "Either party may terminate.", "risk_level": "low"},
            {"clause_type": "horoscope", "content": "not a clause"},
            {"clause_type": "warranty", "content": ""},
            {"clause_type": "warranty"}
        ]);
        let clauses = parse_clause_response(&value);
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].clause_type, "termination");
        assert_eq!(clauses[0].confidence, 0.8);
    }

    #[test]
    fn test_parse_normalizes_spaced_types() {
        let value = json!([
            {"clause_type": "Limitation of Liability", "content": "Liability is capped at fees paid."}
        ]);
        let clauses = parse_clause_response(&value);
        assert_eq!(clauses[0].clause_type, "limitation_of_liability");
    }

    #[test]
    fn test_model_risk_only_escalates() {
        let value = json!([
            {"clause_type": "governing_law", "content": "New York law.", "risk_level": "high"},
            {"clause_type": "indemnification", "content": "uncapped liability", "risk_level": "low"}
        ]);
        let clauses = parse_clause_response(&value);
        // Model escalated a low-keyword clause
        assert_eq!(clauses[0].risk_level, "high");
        // Model cannot downgrade a critical keyword hit
        assert_eq!(clauses[1].risk_level, "critical");
    }

    #[test]
    fn test_single_object_response_accepted() {
        let value = json!({"clause_type": "force_majeure", "content": "Neither party is liable for acts of God."});
        assert_eq!(parse_clause_response(&value).len(), 1);
    }

    #[test]
    fn test_dedup_by_content_prefix() {
        let clause = |content: &str| ParsedClause {
            clause_type: "termination".into(),
            content: content.into(),
            summary: None,
            risk_level: "low".into(),
            risk_factors: Vec::new(),
            confidence: 0.8,
        };
        let long = "x".repeat(250);
        let deduped = deduplicate_clauses(vec![
            clause("Either party may terminate."),
            clause("EITHER PARTY MAY TERMINATE."),
            clause(&long),
            // Same 200-char prefix, different tail
            clause(&format!("{}different", &long[..240])),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_overall_risk_thresholds() {
        let counts = |pairs: &[(&str, i64)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>()
        };
        assert_eq!(overall_risk(&counts(&[("critical", 1)])), "critical");
        assert_eq!(overall_risk(&counts(&[("high", 3)])), "high");
        assert_eq!(overall_risk(&counts(&[("high", 1)])), "medium");
        assert_eq!(overall_risk(&counts(&[("medium", 6)])), "medium");
        assert_eq!(overall_risk(&counts(&[("medium", 2), ("low", 9)])), "low");
    }
}
