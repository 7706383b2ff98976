//! Search request/response types and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use clauselens_core::{Error, Result};

/// How a search request scores candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Fused semantic + keyword ranking (default).
    Hybrid,
    /// Vector similarity only.
    Semantic,
    /// FTS5 lexical rank only.
    Keyword,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
        };
        f.write_str(s)
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            other => Err(Error::InvalidSearchMode(other.to_string())),
        }
    }
}

/// A validated search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub mode: SearchMode,
    /// Number of results to return, 1..=50.
    pub limit: usize,
    /// Semantic contribution weight, 0..=1. Weights are used as given and
    /// never normalized to sum to one.
    pub semantic_weight: f64,
    /// Keyword contribution weight, 0..=1.
    pub keyword_weight: f64,
    /// Minimum cosine similarity for semantic candidates, 0..=1.
    pub min_similarity: f32,
    /// Restrict search to one document.
    pub document_id: Option<i64>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::Hybrid,
            limit: 10,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            min_similarity: 0.3,
            document_id: None,
        }
    }
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Validate bounds. The query must have at least 3 non-whitespace-
    /// delimited characters after trimming.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().chars().count() < 3 {
            return Err(Error::InvalidQuery(
                "query must be at least 3 characters".into(),
            ));
        }
        if self.limit < 1 || self.limit > 50 {
            return Err(Error::InvalidQuery(format!(
                "limit must be between 1 and 50, got {}",
                self.limit
            )));
        }
        if !(0.0..=1.0).contains(&self.semantic_weight) {
            return Err(Error::InvalidQuery(format!(
                "semantic_weight must be in [0, 1], got {}",
                self.semantic_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.keyword_weight) {
            return Err(Error::InvalidQuery(format!(
                "keyword_weight must be in [0, 1], got {}",
                self.keyword_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::InvalidQuery(format!(
                "min_similarity must be in [0, 1], got {}",
                self.min_similarity
            )));
        }
        Ok(())
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    /// Cosine similarity, present when the semantic oracle scored this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_similarity: Option<f32>,
    /// Lexical score, present when the keyword oracle matched this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    /// Final ranking score. Its meaning depends on the mode actually used:
    /// fused RRF score for hybrid, raw similarity for semantic, raw lexical
    /// score for keyword.
    pub combined_score: f64,
}

/// A completed search with the mode that actually ran.
///
/// `mode_used` differs from the requested mode when retrieval degraded to
/// keyword-only because no query embedding was available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<ScoredCandidate>,
    pub mode_used: SearchMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!("SEMANTIC".parse::<SearchMode>().unwrap(), SearchMode::Semantic);
        assert_eq!("keyword".parse::<SearchMode>().unwrap(), SearchMode::Keyword);

        let err = "fuzzy".parse::<SearchMode>().unwrap_err();
        assert!(matches!(err, Error::InvalidSearchMode(m) if m == "fuzzy"));
    }

    #[test]
    fn test_query_length_counts_trimmed_chars() {
        assert!(SearchQuery::new("ab").validate().is_err());
        assert!(SearchQuery::new("  ab  ").validate().is_err());
        assert!(SearchQuery::new("abc").validate().is_ok());
        // Whitespace padding around a short query does not help
        assert!(SearchQuery::new(" a \t\n ").validate().is_err());
    }

    #[test]
    fn test_limit_bounds() {
        let mut q = SearchQuery::new("indemnification");
        q.limit = 0;
        assert!(q.validate().is_err());
        q.limit = 51;
        assert!(q.validate().is_err());
        q.limit = 50;
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_weight_bounds() {
        let mut q = SearchQuery::new("indemnification");
        q.semantic_weight = 1.5;
        assert!(q.validate().is_err());
        q.semantic_weight = 0.0;
        q.keyword_weight = -0.1;
        assert!(q.validate().is_err());
        q.keyword_weight = 1.0;
        assert!(q.validate().is_ok());

        q.min_similarity = 1.1;
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let q = SearchQuery::new("governing law");
        assert_eq!(q.mode, SearchMode::Hybrid);
        assert_eq!(q.limit, 10);
        assert_eq!(q.semantic_weight, 0.7);
        assert_eq!(q.keyword_weight, 0.3);
        assert_eq!(q.min_similarity, 0.3);
    }
}
