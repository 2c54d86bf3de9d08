//! Filter sets decide which tests of a tree are selected for a run.

mod parse;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{TestIndex, TestTree};

pub use parse::{FilterParseError, parse_filter, parse_filter_set};

/// Tri-state verdict of a filter set for one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSetResult {
    /// The test matched an inclusion rule.
    Include,
    /// The test matched an exclusion rule; its whole subtree is pruned.
    Exclude,
    /// Neither; the test may still be kept for the sake of its descendants.
    Descend,
}

/// Anything that can judge tests for selection.
pub trait TestFilterEvaluator {
    fn evaluate(&self, tree: &TestTree, test: TestIndex) -> FilterSetResult;

    /// Whether any positive rule exists. Without one, every test not
    /// excluded is selected.
    fn has_inclusion_rules(&self) -> bool;
}

/// A predicate over a single test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Any,
    None,
    Id(String),
    Name(String),
    FullName(String),
    Metadata { key: String, value: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn is_match(&self, tree: &TestTree, test: TestIndex) -> bool {
        let t = &tree[test];
        match self {
            Self::Any => true,
            Self::None => false,
            Self::Id(pattern) => matches_value(pattern, t.id()),
            Self::Name(pattern) => matches_value(pattern, t.name()),
            Self::FullName(pattern) => matches_value(pattern, &tree.full_name(test)),
            Self::Metadata { key, value } => t
                .metadata_value(key)
                .is_some_and(|actual| matches_value(value, actual)),
            Self::And(filters) => filters.iter().all(|f| f.is_match(tree, test)),
            Self::Or(filters) => filters.iter().any(|f| f.is_match(tree, test)),
            Self::Not(filter) => !filter.is_match(tree, test),
        }
    }
}

/// A trailing `*` matches by prefix; anything else must match exactly.
fn matches_value(pattern: &str, actual: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => actual.starts_with(prefix),
        None => pattern == actual,
    }
}

/// Renders in the syntax accepted by [`parse_filter`].
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::None => f.write_str("NOT *"),
            Self::Id(v) => write_keyed(f, "id", v),
            Self::Name(v) => write_keyed(f, "name", v),
            Self::FullName(v) => write_keyed(f, "fullname", v),
            Self::Metadata { key, value } => write_keyed(f, key, value),
            Self::And(filters) => write_joined(f, filters, " AND "),
            Self::Or(filters) => write_joined(f, filters, ","),
            Self::Not(filter) => {
                f.write_str("NOT ")?;
                write_operand(f, filter)
            }
        }
    }
}

fn write_keyed(f: &mut fmt::Formatter<'_>, key: &str, value: &str) -> fmt::Result {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';' | '"' | '\\'));
    if !needs_quotes {
        return write!(f, "{key}:{value}");
    }
    write!(f, "{key}:\"")?;
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

fn write_joined(f: &mut fmt::Formatter<'_>, filters: &[Filter], sep: &str) -> fmt::Result {
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        if sep == "," {
            write!(f, "{filter}")?;
        } else {
            write_operand(f, filter)?;
        }
    }
    Ok(())
}

/// Compound operands of AND and NOT are parenthesized.
fn write_operand(f: &mut fmt::Formatter<'_>, filter: &Filter) -> fmt::Result {
    match filter {
        Filter::And(_) | Filter::Or(_) => write!(f, "({filter})"),
        _ => write!(f, "{filter}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRuleType {
    Inclusion,
    Exclusion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub rule_type: FilterRuleType,
    pub filter: Filter,
}

impl FilterRule {
    pub fn include(filter: Filter) -> Self {
        Self {
            rule_type: FilterRuleType::Inclusion,
            filter,
        }
    }

    pub fn exclude(filter: Filter) -> Self {
        Self {
            rule_type: FilterRuleType::Exclusion,
            filter,
        }
    }
}

/// Ordered inclusion and exclusion rules.
///
/// Exclusion wins over inclusion. The empty set selects everything and
/// marks nothing as explicitly chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterSet {
    rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A set with a single inclusion rule.
    pub fn including(filter: Filter) -> Self {
        Self::new(vec![FilterRule::include(filter)])
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn push(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }
}

impl TestFilterEvaluator for FilterSet {
    fn evaluate(&self, tree: &TestTree, test: TestIndex) -> FilterSetResult {
        let mut result = FilterSetResult::Descend;
        for rule in &self.rules {
            if rule.filter.is_match(tree, test) {
                match rule.rule_type {
                    FilterRuleType::Inclusion => result = FilterSetResult::Include,
                    FilterRuleType::Exclusion => return FilterSetResult::Exclude,
                }
            }
        }
        result
    }

    fn has_inclusion_rules(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.rule_type == FilterRuleType::Inclusion)
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match rule.rule_type {
                FilterRuleType::Inclusion => write!(f, "include {}", rule.filter)?,
                FilterRuleType::Exclusion => write!(f, "exclude {}", rule.filter)?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for FilterSet {
    type Error = FilterParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_filter_set(&value)
    }
}

impl From<FilterSet> for String {
    fn from(set: FilterSet) -> Self {
        set.to_string()
    }
}
