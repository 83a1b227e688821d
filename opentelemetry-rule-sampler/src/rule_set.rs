//! Sampling rules and their compiled, span kind partitioned form.
use crate::error::ConfigurationError;
use crate::matcher::{MatchKind, Pattern};
use opentelemetry::trace::SpanKind;
use opentelemetry::{KeyValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// What happens to a span once a rule matches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Action {
    /// The span is neither recorded nor sampled.
    Drop,
    /// The span is recorded and sampled.
    RecordAndSample,
    /// Rule evaluation stops and the fallback sampler decides.
    Delegate,
}

impl Action {
    /// Name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Drop => "drop",
            Action::RecordAndSample => "record_and_sample",
            Action::Delegate => "delegate",
        }
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(Action::Drop),
            "record_and_sample" => Ok(Action::RecordAndSample),
            "delegate" => Ok(Action::Delegate),
            _ => Err(()),
        }
    }
}

/// The span kind a rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RuleScope {
    /// Inbound request handling.
    Server,
    /// Outbound calls: HTTP clients, database drivers.
    Client,
    /// Message publishing.
    Producer,
    /// Message processing.
    Consumer,
    /// Everything else.
    Internal,
}

impl RuleScope {
    const COUNT: usize = 5;

    /// Name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::Server => "server",
            RuleScope::Client => "client",
            RuleScope::Producer => "producer",
            RuleScope::Consumer => "consumer",
            RuleScope::Internal => "internal",
        }
    }

    fn slot(self) -> usize {
        match self {
            RuleScope::Server => 0,
            RuleScope::Client => 1,
            RuleScope::Producer => 2,
            RuleScope::Consumer => 3,
            RuleScope::Internal => 4,
        }
    }
}

impl From<&SpanKind> for RuleScope {
    fn from(kind: &SpanKind) -> Self {
        match kind {
            SpanKind::Server => RuleScope::Server,
            SpanKind::Client => RuleScope::Client,
            SpanKind::Producer => RuleScope::Producer,
            SpanKind::Consumer => RuleScope::Consumer,
            SpanKind::Internal => RuleScope::Internal,
        }
    }
}

impl FromStr for RuleScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(RuleScope::Server),
            "client" => Ok(RuleScope::Client),
            "producer" => Ok(RuleScope::Producer),
            "consumer" => Ok(RuleScope::Consumer),
            "internal" => Ok(RuleScope::Internal),
            _ => Err(()),
        }
    }
}

/// A sampling rule as written in configuration.
///
/// Unless `match` is `regex`, `pattern` may hold several comma separated
/// patterns; each one becomes its own rule on the same key. A regex pattern is
/// always a single expression, so it may contain commas. When `scope` is
/// omitted the rule applies to server spans. When `match` is omitted, patterns
/// containing `*` are globs and all others are compared literally.
///
/// Unknown fields are rejected when deserializing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRuleEntry {
    /// Attribute key looked up on the span.
    pub key: String,
    /// Pattern, or comma separated list of literal and glob patterns.
    pub pattern: String,
    /// One of `drop`, `record_and_sample` or `delegate`.
    pub action: String,
    /// Span kind the rule applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// One of `literal`, `glob` or `regex`.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<String>,
}

impl RawRuleEntry {
    /// Creates an entry with the default scope and inferred match kind.
    pub fn new(
        key: impl Into<String>,
        pattern: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        RawRuleEntry {
            key: key.into(),
            pattern: pattern.into(),
            action: action.into(),
            scope: None,
            match_kind: None,
        }
    }

    /// Sets the span kind this entry applies to.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets how the pattern is matched.
    pub fn with_match_kind(mut self, match_kind: impl Into<String>) -> Self {
        self.match_kind = Some(match_kind.into());
        self
    }
}

impl Display for RawRuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::json!(self))
    }
}

/// A single compiled rule.
#[derive(Clone, Debug)]
pub struct Rule {
    key: String,
    pattern: Pattern,
    action: Action,
}

impl Rule {
    /// Attribute key this rule inspects.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compiled pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Action taken on a match.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Returns `true` if the span carries this rule's attribute as a string
    /// and the value matches the pattern.
    pub fn matches(&self, attributes: &[KeyValue]) -> bool {
        // Later duplicates win, as they do when the SDK records the attributes.
        attributes
            .iter()
            .rev()
            .find(|kv| kv.key.as_str() == self.key)
            .and_then(|kv| match &kv.value {
                Value::String(value) => Some(value.as_str()),
                _ => None,
            })
            .is_some_and(|value| self.pattern.matches(value))
    }
}

/// Result of evaluating a [`RuleSet`] against a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Outcome {
    /// A rule dropped the span.
    Drop,
    /// A rule sampled the span.
    RecordAndSample,
    /// No rule decided; the fallback sampler must.
    Delegate,
}

impl From<Action> for Outcome {
    fn from(action: Action) -> Self {
        match action {
            Action::Drop => Outcome::Drop,
            Action::RecordAndSample => Outcome::RecordAndSample,
            Action::Delegate => Outcome::Delegate,
        }
    }
}

/// Ordered, validated rules grouped by span kind.
///
/// Within a span kind, rules are evaluated in the order they were declared and
/// the first match wins. A `RuleSet` is immutable once compiled.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    partitions: [Vec<Rule>; RuleScope::COUNT],
}

impl RuleSet {
    /// A rule set with no rules; every span is delegated.
    pub fn empty() -> Self {
        RuleSet::default()
    }

    /// Compiles raw entries into a rule set.
    ///
    /// Comma separated patterns are split into one rule each. The first
    /// malformed entry aborts compilation.
    pub fn compile<I>(entries: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = RawRuleEntry>,
    {
        let mut rule_set = RuleSet::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let (scope, rules) = compile_entry(index, &entry)?;
            rule_set.partitions[scope.slot()].extend(rules);
        }
        Ok(rule_set)
    }

    /// Rules that apply to spans of the given scope, in evaluation order.
    pub fn rules(&self, scope: RuleScope) -> &[Rule] {
        &self.partitions[scope.slot()]
    }

    /// Total number of rules across all scopes.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    /// Returns `true` if no scope has any rule.
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    /// Evaluates the rules for `span_kind` against `attributes`.
    ///
    /// Returns the action of the first matching rule, or
    /// [`Outcome::Delegate`] if none match. Missing attributes never match.
    pub fn evaluate(&self, span_kind: &SpanKind, attributes: &[KeyValue]) -> Outcome {
        self.rules(RuleScope::from(span_kind))
            .iter()
            .find(|rule| rule.matches(attributes))
            .map_or(Outcome::Delegate, |rule| rule.action.into())
    }
}

/// Validates one raw entry and expands it into one rule per listed pattern.
fn compile_entry(
    index: usize,
    entry: &RawRuleEntry,
) -> Result<(RuleScope, Vec<Rule>), ConfigurationError> {
    if entry.key.is_empty() {
        return Err(ConfigurationError::EmptyKey {
            index,
            entry: entry.to_string(),
        });
    }

    let action =
        Action::from_str(&entry.action).map_err(|_| ConfigurationError::UnknownAction {
            index,
            action: entry.action.clone(),
            entry: entry.to_string(),
        })?;

    let scope = match entry.scope.as_deref() {
        None => RuleScope::Server,
        Some(scope) => {
            RuleScope::from_str(scope).map_err(|_| ConfigurationError::UnknownScope {
                index,
                scope: scope.to_string(),
                entry: entry.to_string(),
            })?
        }
    };

    let declared_kind = match entry.match_kind.as_deref() {
        None => None,
        Some(kind) => Some(MatchKind::from_str(kind).map_err(|_| {
            ConfigurationError::UnknownMatchKind {
                index,
                kind: kind.to_string(),
                entry: entry.to_string(),
            }
        })?),
    };

    let sources: Vec<&str> = match declared_kind {
        Some(MatchKind::Regex) => vec![entry.pattern.trim()],
        _ => entry.pattern.split(',').map(str::trim).collect(),
    };

    let mut rules = Vec::new();
    for source in sources {
        if source.is_empty() {
            return Err(ConfigurationError::EmptyPattern {
                index,
                entry: entry.to_string(),
            });
        }
        let kind = declared_kind.unwrap_or_else(|| MatchKind::infer(source));
        let pattern =
            Pattern::new(source, kind).map_err(|source_err| ConfigurationError::InvalidRegex {
                index,
                pattern: source.to_string(),
                source: source_err,
            })?;
        rules.push(Rule {
            key: entry.key.clone(),
            pattern,
            action,
        });
    }

    Ok((scope, rules))
}
