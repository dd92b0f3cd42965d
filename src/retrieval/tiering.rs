//! Token-budget packing for tiered retrieval results.

use crate::model::estimate_tokens;
use crate::search::SearchHit;

/// Outcome of packing candidates behind an already-reserved tier 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Packed {
    pub candidates: Vec<SearchHit>,
    pub tokens_used: usize,
    pub tier0_over_budget: bool,
    /// Candidates cut by the budget.
    pub dropped: usize,
}

/// Tier 0 is always kept in full, even past the budget. Tier 1 is taken in
/// order while it fits; the first candidate that does not fit ends packing.
pub fn pack(tier0_tokens: usize, candidates: Vec<SearchHit>, budget: Option<usize>) -> Packed {
    let Some(budget) = budget else {
        let tokens_used = tier0_tokens + candidates.iter().map(hit_tokens).sum::<usize>();
        return Packed {
            candidates,
            tokens_used,
            tier0_over_budget: false,
            dropped: 0,
        };
    };

    let mut tokens_used = tier0_tokens;
    let total = candidates.len();
    let mut kept = Vec::with_capacity(total);
    for hit in candidates {
        let cost = hit_tokens(&hit);
        if tokens_used + cost > budget {
            break;
        }
        tokens_used += cost;
        kept.push(hit);
    }

    Packed {
        dropped: total - kept.len(),
        candidates: kept,
        tokens_used,
        tier0_over_budget: tier0_tokens > budget,
    }
}

pub fn hit_tokens(hit: &SearchHit) -> usize {
    estimate_tokens(hit.item.content())
}
