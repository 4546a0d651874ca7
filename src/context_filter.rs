//! Pattern-based include/exclude/transform rules applied to a context as it
//! flows along a satisfied edge.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::expr::{ExpressionEvaluator, Scope};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleType {
    Include,
    Exclude,
    Transform,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterTarget {
    Variables,
    History,
    Metadata,
}

#[derive(Clone, Debug)]
pub struct FilterRule {
    pub rule_type: RuleType,
    pub pattern: String,
    pub target: FilterTarget,
    pub transform_name: Option<String>,
    pub condition: Option<String>,
}

impl FilterRule {
    pub fn include(pattern: impl Into<String>, target: FilterTarget) -> Self {
        Self {
            rule_type: RuleType::Include,
            pattern: pattern.into(),
            target,
            transform_name: None,
            condition: None,
        }
    }

    pub fn exclude(pattern: impl Into<String>, target: FilterTarget) -> Self {
        Self {
            rule_type: RuleType::Exclude,
            pattern: pattern.into(),
            target,
            transform_name: None,
            condition: None,
        }
    }

    pub fn transform(
        pattern: impl Into<String>,
        target: FilterTarget,
        transform_name: impl Into<String>,
    ) -> Self {
        Self {
            rule_type: RuleType::Transform,
            pattern: pattern.into(),
            target,
            transform_name: Some(transform_name.into()),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    fn regex(&self) -> regex::Regex {
        let escaped = regex::escape(&self.pattern).replace("\\*", ".*");
        regex::Regex::new(&format!("^{escaped}$")).unwrap_or_else(|_| {
            regex::Regex::new("$^").expect("empty-match fallback regex is always valid")
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultBehavior {
    Pass,
    Block,
}

/// An ordered rule list plus a fallback behavior and priority.
#[derive(Clone, Debug)]
pub struct ContextFilter {
    pub rules: Vec<FilterRule>,
    pub default_behavior: DefaultBehavior,
    pub priority: i64,
}

impl Default for ContextFilter {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_behavior: DefaultBehavior::Pass,
            priority: 0,
        }
    }
}

impl ContextFilter {
    pub fn pass_all() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Apply the filter to `ctx`, returning a new, filtered context. `ctx`
    /// itself is never mutated ("always returns a new context").
    pub fn apply(&self, ctx: &ExecutionContext, evaluator: &ExpressionEvaluator) -> ExecutionContext {
        if self.default_behavior == DefaultBehavior::Block && self.rules.is_empty() {
            return ctx.with_empty_filterable_state();
        }

        let mut variables = ctx.variables();
        let mut metadata = ctx.metadata();
        let prompt_history = ctx.prompt_history();
        let mut history_indices: Vec<usize> = (0..prompt_history.len()).collect();

        let transforms: Vec<&FilterRule> = self
            .rules
            .iter()
            .filter(|r| r.rule_type == RuleType::Transform)
            .collect();
        let includes_excludes: Vec<&FilterRule> = self
            .rules
            .iter()
            .filter(|r| r.rule_type != RuleType::Transform)
            .collect();

        for rule in transforms {
            if !self.condition_holds(rule, &variables, evaluator) {
                continue;
            }
            self.apply_transform_rule(rule, &mut variables, &mut metadata, evaluator);
        }

        let mut variable_keep: Option<Vec<String>> = None;
        let mut metadata_keep: Option<Vec<String>> = None;
        let mut history_keep: Option<Vec<usize>> = None;

        for rule in includes_excludes {
            if !self.condition_holds(rule, &variables, evaluator) {
                continue;
            }
            let re = rule.regex();
            match rule.target {
                FilterTarget::Variables => {
                    let matching: Vec<String> = variables
                        .keys()
                        .filter(|k| re.is_match(k))
                        .cloned()
                        .collect();
                    apply_keep_rule(&mut variable_keep, rule.rule_type, matching, variables.keys().cloned().collect());
                }
                FilterTarget::Metadata => {
                    let matching: Vec<String> = metadata
                        .keys()
                        .filter(|k| re.is_match(k))
                        .cloned()
                        .collect();
                    apply_keep_rule(&mut metadata_keep, rule.rule_type, matching, metadata.keys().cloned().collect());
                }
                FilterTarget::History => {
                    let matching: Vec<usize> = history_indices
                        .iter()
                        .copied()
                        .filter(|&i| {
                            prompt_history
                                .get(i)
                                .map(|e| re.is_match(&e.role_str()))
                                .unwrap_or(false)
                        })
                        .collect();
                    apply_keep_rule(&mut history_keep, rule.rule_type, matching, history_indices.clone());
                }
            }
        }

        if let Some(keep) = variable_keep {
            variables.retain(|k, _| keep.contains(k));
        }
        if let Some(keep) = metadata_keep {
            metadata.retain(|k, _| keep.contains(k));
        }
        if let Some(keep) = history_keep {
            history_indices.retain(|i| keep.contains(i));
        }

        let prompt_history = history_indices
            .into_iter()
            .filter_map(|i| prompt_history.get(i).cloned())
            .collect();

        ctx.with_filtered_state(variables, prompt_history, metadata)
    }

    fn condition_holds(
        &self,
        rule: &FilterRule,
        variables: &FxHashMap<String, Value>,
        evaluator: &ExpressionEvaluator,
    ) -> bool {
        match &rule.condition {
            None => true,
            Some(expr) => {
                let scope = Scope::new(variables);
                evaluator
                    .evaluate(expr, &scope)
                    .value
                    .map(|v| crate::expr::evaluator::is_truthy(&v))
                    .unwrap_or(false)
            }
        }
    }

    fn apply_transform_rule(
        &self,
        rule: &FilterRule,
        variables: &mut FxHashMap<String, Value>,
        metadata: &mut FxHashMap<String, Value>,
        evaluator: &ExpressionEvaluator,
    ) {
        let re = rule.regex();
        let transform_name = rule.transform_name.as_deref();
        let target = match rule.target {
            FilterTarget::Variables => &mut *variables,
            FilterTarget::Metadata => &mut *metadata,
            FilterTarget::History => return,
        };
        let matching_keys: Vec<String> = target
            .keys()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect();
        for key in matching_keys {
            if let Some(value) = target.get(&key).cloned() {
                let transformed = match transform_name {
                    Some(name) => evaluator.apply_named_transform(name, &value).unwrap_or(value),
                    None => value,
                };
                target.insert(key, transformed);
            }
        }
    }
}

fn apply_keep_rule<T: PartialEq + Clone>(
    keep: &mut Option<Vec<T>>,
    rule_type: RuleType,
    matching: Vec<T>,
    all: Vec<T>,
) {
    match rule_type {
        RuleType::Include => {
            let base = keep.get_or_insert_with(Vec::new);
            for item in matching {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
        }
        RuleType::Exclude => {
            let base = keep.get_or_insert_with(|| all);
            base.retain(|item| !matching.contains(item));
        }
        RuleType::Transform => {}
    }
}

/// Merge two filters: concatenate rule lists, take the higher priority, keep
/// `a`'s `default_behavior`.
pub fn merge(a: &ContextFilter, b: &ContextFilter) -> ContextFilter {
    let mut rules = a.rules.clone();
    rules.extend(b.rules.clone());
    ContextFilter {
        rules,
        default_behavior: a.default_behavior,
        priority: a.priority.max(b.priority),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[test]
    fn include_keeps_only_matching_keys() {
        let evaluator = ExpressionEvaluator::new(16);
        let ctx = ExecutionContext::new()
            .set_variable("keep_me", Value::from(1))
            .set_variable("drop_me", Value::from(2));
        let filter = ContextFilter::pass_all()
            .with_rule(FilterRule::include("keep_*", FilterTarget::Variables));
        let filtered = filter.apply(&ctx, &evaluator);
        assert!(filtered.variables().contains_key("keep_me"));
        assert!(!filtered.variables().contains_key("drop_me"));
    }

    #[test]
    fn block_default_with_no_rules_empties_everything() {
        let evaluator = ExpressionEvaluator::new(16);
        let ctx = ExecutionContext::new().set_variable("x", Value::from(1));
        let filter = ContextFilter {
            rules: Vec::new(),
            default_behavior: DefaultBehavior::Block,
            priority: 0,
        };
        let filtered = filter.apply(&ctx, &evaluator);
        assert!(filtered.variables().is_empty());
        assert!(filtered.metadata().is_empty());
        assert!(filtered.prompt_history().is_empty());
    }

    #[test]
    fn merge_concatenates_rules_and_keeps_a_default_behavior() {
        let a = ContextFilter::pass_all()
            .with_rule(FilterRule::include("x", FilterTarget::Variables));
        let mut b = ContextFilter::pass_all()
            .with_rule(FilterRule::exclude("y", FilterTarget::Variables));
        b.default_behavior = DefaultBehavior::Block;
        b.priority = 5;
        let merged = merge(&a, &b);
        assert_eq!(merged.rules.len(), 2);
        assert_eq!(merged.default_behavior, DefaultBehavior::Pass);
        assert_eq!(merged.priority, 5);
    }
}
