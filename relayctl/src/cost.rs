//! Model credit cost resolution.
//!
//! Both credit cost rules and quota rules are selected by longest-prefix match on the model
//! name. The empty pattern matches every model with length 0, so any more specific rule
//! outranks it. Among rules of equal pattern length the first one in iteration order wins;
//! callers pass rules in ascending id order so the result does not depend on storage order.

use crate::db::models::rules::ModelCreditRule;

/// Return the rule with the longest pattern that prefixes `model`.
///
/// Ties resolve to the earliest rule in `rules`.
pub fn longest_prefix_match<'a, T>(model: &str, rules: &'a [T], pattern: impl Fn(&T) -> &str) -> Option<&'a T> {
    let mut best: Option<(&T, usize)> = None;
    for rule in rules {
        let p = pattern(rule);
        if !model.starts_with(p) {
            continue;
        }
        match best {
            Some((_, len)) if len >= p.len() => {}
            _ => best = Some((rule, p.len())),
        }
    }
    best.map(|(rule, _)| rule)
}

/// Credit cost of one request for `model`, never negative.
pub fn resolve_cost(model: &str, rules: &[ModelCreditRule], default_cost: i64) -> i64 {
    let cost = longest_prefix_match(model, rules, |r| r.model_pattern.as_str())
        .map(|rule| rule.credit_cost)
        .unwrap_or(default_cost);
    cost.max(0)
}
