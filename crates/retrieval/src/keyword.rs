//! Lexical relevance scoring.

use std::collections::BTreeSet;
use std::sync::Arc;

use edflow_rules::RuleStore;

use crate::engine::ScoredRule;
use crate::query::{tokenize, QueryContext};

/// Ranks rules by term overlap with the query.
///
/// Relevance is the share of query terms found in the rule's indexed text,
/// so it lies in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct KeywordStrategy {
    store: Arc<RuleStore>,
    rule_terms: Vec<BTreeSet<String>>,
}

impl KeywordStrategy {
    /// Index every rule in the store.
    pub fn new(store: Arc<RuleStore>) -> Self {
        let rule_terms = store.all().iter().map(|r| tokenize(&r.search_text())).collect();
        Self { store, rule_terms }
    }

    /// Top `k` rules for the context.
    ///
    /// With a category filter every rule of that category is a candidate,
    /// even at zero relevance. Without one, rules sharing no term are dropped.
    pub fn rank(&self, ctx: &QueryContext<'_>, k: usize) -> Vec<ScoredRule> {
        let query = ctx.terms();

        let mut scored: Vec<ScoredRule> = self
            .store
            .all()
            .iter()
            .enumerate()
            .filter(|(_, rule)| ctx.category.map_or(true, |c| rule.category == c))
            .map(|(position, rule)| ScoredRule {
                rule: rule.clone(),
                relevance: relevance(&query, &self.rule_terms[position]),
                position,
            })
            .filter(|hit| ctx.category.is_some() || hit.relevance > 0.0)
            .collect();

        sort_hits(&mut scored);
        scored.truncate(k);
        scored
    }
}

fn relevance(query: &BTreeSet<String>, rule: &BTreeSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(rule).count();
    shared as f32 / query.len() as f32
}

/// Sort by relevance, highest first; equal relevance keeps load order.
pub(crate) fn sort_hits(hits: &mut [ScoredRule]) {
    hits.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use edflow_rules::RuleCategory;

    const RULES: &str = r#"[
        {"id": "transfer-icu", "category": "transfer",
         "trigger": {"kind": "triage_at_least", "class": "critical"},
         "action": {"type": "transfer", "unit": "ICU"},
         "rationale": "Critical patients with hypoxia go to intensive care."},
        {"id": "transfer-cardio", "category": "transfer",
         "trigger": {"kind": "capability", "subject": "patient", "tags": ["cardiology"]},
         "action": {"type": "transfer", "unit": "cardiology"},
         "rationale": "Chest pain with tachycardia goes to cardiology."},
        {"id": "discharge-minor", "category": "transfer",
         "trigger": {"kind": "threshold", "attribute": "triage_rank", "op": "<=", "value": 0},
         "action": {"type": "discharge"},
         "rationale": "Minor complaints return home."},
        {"id": "admit-oxygen", "category": "admission",
         "trigger": {"kind": "threshold", "attribute": "oxygen_saturation", "op": "<", "value": 92},
         "action": {"type": "require_capabilities", "tags": ["oxygen"]},
         "rationale": "Hypoxia needs oxygen supply."}
    ]"#;

    fn strategy() -> KeywordStrategy {
        KeywordStrategy::new(Arc::new(RuleStore::from_json_str(RULES, "test").unwrap()))
    }

    fn ids(hits: &[ScoredRule]) -> Vec<&str> {
        hits.iter().map(|h| h.rule.id.as_str()).collect()
    }

    #[test]
    fn test_rank_orders_by_overlap() {
        let hits = strategy().rank(&QueryContext::new("tachycardia chest pain"), 8);
        assert_eq!(ids(&hits)[0], "transfer-cardio");
        assert!(hits.iter().all(|h| h.relevance > 0.0 && h.relevance <= 1.0));
    }

    #[test]
    fn test_rank_is_deterministic() {
        let s = strategy();
        let ctx = QueryContext::new("hypoxia oxygen intensive");
        let first = s.rank(&ctx, 8);
        for _ in 0..5 {
            assert_eq!(s.rank(&ctx, 8), first);
        }
    }

    #[test]
    fn test_category_filter_keeps_all_candidates_in_load_order() {
        let hits = strategy().rank(&QueryContext::new("zzz unrelated").with_category(RuleCategory::Transfer), 8);
        assert_eq!(ids(&hits), vec!["transfer-icu", "transfer-cardio", "discharge-minor"]);
    }

    #[test]
    fn test_no_filter_drops_unrelated_and_respects_k() {
        let s = strategy();
        assert!(s.rank(&QueryContext::new("zzz unrelated"), 8).is_empty());
        assert_eq!(s.rank(&QueryContext::new("hypoxia"), 1).len(), 1);
        assert!(s.rank(&QueryContext::new("hypoxia"), 0).is_empty());
    }
}
