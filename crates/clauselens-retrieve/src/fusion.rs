//! Weighted Reciprocal Rank Fusion.
//!
//! The fused set is anchored on the semantic ranking: every fused candidate
//! comes from the semantic oracle's list, and the keyword oracle only
//! adjusts ordering. A chunk that matched lexically but was not among the
//! semantic candidates does not appear in hybrid results.

use std::collections::HashMap;

use clauselens_store::{LexicalHit, SemanticHit};

use crate::types::ScoredCandidate;

/// RRF smoothing constant. Rank 1 contributes weight/61.
pub const RRF_K: f64 = 60.0;

/// Rank assigned to a semantic candidate with no keyword match. Large
/// enough that the keyword term is effectively floor noise, but still
/// nonzero so weights behave continuously.
pub const ABSENT_RANK: usize = 1000;

/// Each oracle is asked for `limit * OVERFETCH_FACTOR` candidates so the
/// fused ordering has enough overlap to be meaningful.
pub const OVERFETCH_FACTOR: usize = 3;

/// Fuse the two oracle rankings into a combined top-`limit` list.
///
/// combined = w_s / (K + semantic_rank) + w_k / (K + keyword_rank)
///
/// Ranks are 1-based positions within each oracle's own ordering. Ties on
/// combined score break toward the better semantic rank, then the smaller
/// chunk ID.
pub fn fuse(
    semantic: Vec<SemanticHit>,
    lexical: Vec<LexicalHit>,
    semantic_weight: f64,
    keyword_weight: f64,
    limit: usize,
) -> Vec<ScoredCandidate> {
    let keyword_ranks: HashMap<i64, (usize, f64)> = lexical
        .iter()
        .enumerate()
        .map(|(i, hit)| (hit.chunk_id, (i + 1, hit.score)))
        .collect();

    let mut fused: Vec<(usize, ScoredCandidate)> = semantic
        .into_iter()
        .enumerate()
        .map(|(i, hit)| {
            let semantic_rank = i + 1;
            let (keyword_rank, keyword_score) = match keyword_ranks.get(&hit.chunk_id) {
                Some(&(rank, score)) => (rank, Some(score)),
                None => (ABSENT_RANK, None),
            };

            let combined_score = semantic_weight / (RRF_K + semantic_rank as f64)
                + keyword_weight / (RRF_K + keyword_rank as f64);

            let candidate = ScoredCandidate {
                chunk_id: hit.chunk_id,
                document_id: hit.doc_id,
                document_name: hit.document_name,
                content: hit.content,
                page_number: hit.page_number,
                semantic_similarity: Some(hit.similarity),
                keyword_score,
                combined_score,
            };
            (semantic_rank, candidate)
        })
        .collect();

    fused.sort_by(|(rank_a, a), (rank_b, b)| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(rank_a.cmp(rank_b))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });

    fused
        .into_iter()
        .take(limit)
        .map(|(_, candidate)| candidate)
        .collect()
}
