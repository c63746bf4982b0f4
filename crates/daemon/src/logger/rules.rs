//! Include/exclude glob rules over `file:func` keys, most-recently-added
//! matching rule wins, with a per-key memoized decision cache (§4.A).

use std::collections::HashMap;

use glob::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
pub struct Rule {
    /// A glob over the `file:func` key, e.g. `plugin_foo.c:*` or `*:bar`.
    pub pattern: String,
    pub action: RuleAction,
}

pub struct RuleSet {
    rules: Vec<(Pattern, RuleAction)>,
    cache: HashMap<String, Option<RuleAction>>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet { rules: Vec::new(), cache: HashMap::new() }
    }

    pub fn add(&mut self, rule: Rule) {
        if let Ok(pattern) = Pattern::new(&rule.pattern) {
            self.rules.push((pattern, rule.action));
            self.cache.clear();
        }
    }

    pub fn clear(&mut self) {
        self.rules.clear();
        self.cache.clear();
    }

    /// Returns the action of the most recently added rule whose pattern
    /// matches `file:func`, or `None` if no rule matches (fall back to
    /// verbosity-based filtering).
    pub fn decide(&mut self, file: &str, func: &str) -> Option<RuleAction> {
        let key = format!("{file}:{func}");
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        let decision = self
            .rules
            .iter()
            .rev()
            .find(|(pattern, _)| pattern.matches(&key))
            .map(|(_, action)| *action);
        self.cache.insert(key, decision);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rules_means_no_decision() {
        let mut rs = RuleSet::new();
        assert_eq!(rs.decide("a.rs", "f"), None);
    }

    #[yare::parameterized(
        include = { RuleAction::Include },
        exclude = { RuleAction::Exclude },
    )]
    fn a_single_matching_rule_decides(action: RuleAction) {
        let mut rs = RuleSet::new();
        rs.add(Rule { pattern: "a.rs:*".into(), action });
        assert_eq!(rs.decide("a.rs", "f"), Some(action));
    }

    #[test]
    fn most_recent_rule_overrides_earlier_ones() {
        let mut rs = RuleSet::new();
        rs.add(Rule { pattern: "a.rs:*".into(), action: RuleAction::Include });
        rs.add(Rule { pattern: "a.rs:*".into(), action: RuleAction::Exclude });
        assert_eq!(rs.decide("a.rs", "f"), Some(RuleAction::Exclude));
    }

    #[test]
    fn decision_is_cached_per_key() {
        let mut rs = RuleSet::new();
        rs.add(Rule { pattern: "a.rs:*".into(), action: RuleAction::Include });
        assert_eq!(rs.decide("a.rs", "f"), Some(RuleAction::Include));
        // Adding a rule that doesn't match "a.rs:f" must not disturb the
        // cached decision for that key once re-derived.
        rs.add(Rule { pattern: "b.rs:*".into(), action: RuleAction::Exclude });
        assert_eq!(rs.decide("a.rs", "f"), Some(RuleAction::Include));
    }

    #[test]
    fn clear_rules_resets_all_decisions() {
        let mut rs = RuleSet::new();
        rs.add(Rule { pattern: "a.rs:*".into(), action: RuleAction::Exclude });
        assert_eq!(rs.decide("a.rs", "f"), Some(RuleAction::Exclude));
        rs.clear();
        assert_eq!(rs.decide("a.rs", "f"), None);
    }
}
