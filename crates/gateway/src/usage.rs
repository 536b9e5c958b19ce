//! Per-stage token usage aggregation.
//!
//! Grounded on `examples/original_source/src/adapter_critic/usage.py`'s `aggregate_usage`.

use indexmap::IndexMap;
use serde::Serialize;

use crate::messages::TokenUsage;

/// Per-stage usage plus the clamped total across all stages.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBreakdown {
    /// Token usage by stage name (`api`, `adapter`, `critic`, `api_final`, `advisor`, ...).
    pub stages: IndexMap<String, TokenUsage>,
    /// Field-by-field sum of every stage's usage, each field first clamped to non-negative.
    pub total: TokenUsage,
}

/// Sum `stages` into a [`TokenBreakdown`], clamping each stage's fields to non-negative before
/// summing so a misbehaving upstream cannot drive the reported total negative.
pub fn aggregate_usage(stages: IndexMap<String, TokenUsage>) -> TokenBreakdown {
    let total = stages
        .values()
        .fold(TokenUsage::default(), |total, usage| total.add(usage.clamped()));

    TokenBreakdown { stages, total }
}
