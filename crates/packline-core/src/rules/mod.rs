//! Rule matching.
//!
//! Rules are kept in three buckets (`pre`, `normal`, `post`) and evaluated
//! top to bottom in declaration order. A `terminal` rule stops evaluation of
//! its own bucket only; the other buckets always run. Rules flattened from one
//! `oneOf` share a [`RuleGroup`]: the first child that matches claims the
//! group, and rules outside it keep evaluating.

mod matcher;

pub use matcher::PathPredicate;

use packline_util::hash::{fingerprint_parts, Fingerprinter};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Evaluation bucket of a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforce {
    Pre,
    #[default]
    Normal,
    Post,
}

impl Enforce {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Normal => "normal",
            Self::Post => "post",
        }
    }
}

/// A transform named by a rule, with its options.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRef {
    pub name: String,
    pub options: serde_json::Value,
}

/// Conditions of an enclosing `oneOf` rule, required by each of its children.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pub id: usize,
    pub test: Option<PathPredicate>,
    pub include: Vec<PathPredicate>,
}

impl RuleGroup {
    fn matches(&self, path: &Path) -> bool {
        self.test.as_ref().map_or(true, |t| t.matches(path))
            && (self.include.is_empty() || self.include.iter().any(|p| p.matches(path)))
    }
}

/// A predicate-to-transform-chain binding.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Position in the flattened rule list.
    pub index: usize,
    pub test: Option<PathPredicate>,
    pub include: Vec<PathPredicate>,
    pub exclude: Vec<PathPredicate>,
    /// Applied left to right.
    pub transforms: Vec<TransformRef>,
    pub terminal: bool,
    pub enforce: Enforce,
    /// Set on `oneOf` children.
    pub group: Option<RuleGroup>,
    /// Digest of everything above except `index`.
    pub fingerprint: String,
}

impl Rule {
    /// Build a rule and compute its fingerprint.
    #[must_use]
    pub fn new(
        index: usize,
        test: Option<PathPredicate>,
        include: Vec<PathPredicate>,
        exclude: Vec<PathPredicate>,
        transforms: Vec<TransformRef>,
        terminal: bool,
        enforce: Enforce,
    ) -> Self {
        let mut rule = Self {
            index,
            test,
            include,
            exclude,
            transforms,
            terminal,
            enforce,
            group: None,
            fingerprint: String::new(),
        };
        rule.fingerprint = rule.compute_fingerprint();
        rule
    }

    /// Make this rule a child of `group`.
    #[must_use]
    pub fn with_group(mut self, group: RuleGroup) -> Self {
        self.group = Some(group);
        self.fingerprint = self.compute_fingerprint();
        self
    }

    fn compute_fingerprint(&self) -> String {
        let mut fp = Fingerprinter::new();
        fp.part(self.test.as_ref().map(PathPredicate::describe).unwrap_or_default());
        for p in &self.include {
            fp.part("include").part(p.describe());
        }
        for p in &self.exclude {
            fp.part("exclude").part(p.describe());
        }
        for t in &self.transforms {
            // serde_json maps are ordered, so this text is canonical.
            fp.part("use").part(&t.name).part(t.options.to_string());
        }
        fp.part(self.enforce.as_str())
            .part([u8::from(self.terminal)]);
        if let Some(group) = &self.group {
            fp.part("group")
                .part(group.id.to_le_bytes())
                .part(group.test.as_ref().map(PathPredicate::describe).unwrap_or_default());
            for p in &group.include {
                fp.part("group-include").part(p.describe());
            }
        }
        fp.finish()
    }

    /// The group's conditions and `test` must hold, then at least one
    /// `include` (if any), then no `exclude`.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        if let Some(group) = &self.group {
            if !group.matches(path) {
                return false;
            }
        }
        if let Some(test) = &self.test {
            if !test.matches(path) {
                return false;
            }
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(path)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(path))
    }
}

/// Outcome of matching a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult<'a> {
    /// Rules to apply, in order.
    Rules(Vec<&'a Rule>),
    /// Nothing matched: copy the file verbatim.
    Passthrough,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.fingerprint == other.fingerprint
    }
}

impl Eq for Rule {}

impl<'a> MatchResult<'a> {
    #[must_use]
    pub fn rules(&self) -> &[&'a Rule] {
        match self {
            Self::Rules(rules) => rules,
            Self::Passthrough => &[],
        }
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    /// Fingerprint of exactly the rules that matched, in order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_parts(self.rules().iter().map(|r| r.fingerprint.as_bytes()))
    }
}

/// An ordered, bucketed rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    fingerprint: String,
}

impl RuleSet {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        let fingerprint = fingerprint_parts(rules.iter().map(|r| r.fingerprint.as_bytes()));
        Self { rules, fingerprint }
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Digest of the whole rule list.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Matching rules for `path`: `pre`, then `normal`, then `post`.
    ///
    /// Pure: depends only on `path` and the rule list.
    #[must_use]
    pub fn match_path(&self, path: &Path) -> MatchResult<'_> {
        let mut matched = Vec::new();
        let mut claimed: Vec<usize> = Vec::new();
        for bucket in [Enforce::Pre, Enforce::Normal, Enforce::Post] {
            for rule in self.rules.iter().filter(|r| r.enforce == bucket) {
                let group = rule.group.as_ref().map(|g| g.id);
                if group.is_some_and(|id| claimed.contains(&id)) {
                    continue;
                }
                if rule.matches(path) {
                    matched.push(rule);
                    claimed.extend(group);
                    if rule.terminal {
                        break;
                    }
                }
            }
        }
        if matched.is_empty() {
            MatchResult::Passthrough
        } else {
            MatchResult::Rules(matched)
        }
    }
}
