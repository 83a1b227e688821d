use crate::error::ConfigurationError;
use crate::rule_set::{Action, Outcome, RawRuleEntry, RuleScope, RuleSet};
use opentelemetry::{
    otel_info,
    trace::{
        Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    },
    Context, KeyValue,
};
use opentelemetry_sdk::trace::ShouldSample;
use std::sync::Arc;

/// Runs `rule_set` against a span and, when no rule decides, asks `fallback`.
///
/// Rule decisions carry no extra attributes and keep the parent's trace
/// state. A delegated decision is the fallback's result, unchanged.
#[allow(clippy::too_many_arguments)]
pub fn decide(
    rule_set: &RuleSet,
    fallback: &dyn ShouldSample,
    parent_context: Option<&Context>,
    trace_id: TraceId,
    name: &str,
    span_kind: &SpanKind,
    attributes: &[KeyValue],
    links: &[Link],
) -> SamplingResult {
    let decision = match rule_set.evaluate(span_kind, attributes) {
        Outcome::Drop => SamplingDecision::Drop,
        Outcome::RecordAndSample => SamplingDecision::RecordAndSample,
        Outcome::Delegate => {
            return fallback.should_sample(
                parent_context,
                trace_id,
                name,
                span_kind,
                attributes,
                links,
            )
        }
    };
    SamplingResult {
        decision,
        attributes: Vec::new(),
        trace_state: match parent_context {
            Some(ctx) => ctx.span().span_context().trace_state().clone(),
            None => TraceState::default(),
        },
    }
}

/// A sampler that drops or samples spans whose attributes match configured
/// rules, and leaves every other span to a fallback sampler.
///
/// Because it implements [`ShouldSample`] itself, it can be the fallback of
/// another `RuleBasedRoutingSampler`, which is how server and client rules are
/// chained.
///
/// ```
/// use opentelemetry_rule_sampler::RuleBasedRoutingSampler;
/// use opentelemetry_sdk::trace::Sampler;
/// use opentelemetry::trace::SpanKind;
///
/// let sampler = RuleBasedRoutingSampler::builder(
///     SpanKind::Server,
///     Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
/// )
/// .drop("url.path", "*/actuator/health")
/// .build()
/// .expect("valid rules");
/// # drop(sampler);
/// ```
#[derive(Clone, Debug)]
pub struct RuleBasedRoutingSampler {
    rule_set: Arc<RuleSet>,
    fallback: Box<dyn ShouldSample>,
}

impl RuleBasedRoutingSampler {
    /// Wraps `fallback` with an already compiled rule set.
    pub fn new<S>(rule_set: impl Into<Arc<RuleSet>>, fallback: S) -> Self
    where
        S: ShouldSample + 'static,
    {
        Self::from_parts(rule_set.into(), Box::new(fallback))
    }

    fn from_parts(rule_set: Arc<RuleSet>, fallback: Box<dyn ShouldSample>) -> Self {
        otel_info!(
            name: "RuleBasedRoutingSampler.Built",
            server_rules = rule_set.rules(RuleScope::Server).len() as u64,
            client_rules = rule_set.rules(RuleScope::Client).len() as u64,
            producer_rules = rule_set.rules(RuleScope::Producer).len() as u64,
            consumer_rules = rule_set.rules(RuleScope::Consumer).len() as u64,
            internal_rules = rule_set.rules(RuleScope::Internal).len() as u64
        );
        RuleBasedRoutingSampler { rule_set, fallback }
    }

    /// Starts a builder whose rules all apply to spans of `span_kind`.
    pub fn builder<S>(span_kind: SpanKind, fallback: S) -> RuleBasedRoutingSamplerBuilder
    where
        S: ShouldSample + 'static,
    {
        RuleBasedRoutingSamplerBuilder {
            scope: RuleScope::from(&span_kind),
            fallback: Box::new(fallback),
            entries: Vec::new(),
        }
    }

    /// The compiled rules.
    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }
}

impl ShouldSample for RuleBasedRoutingSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        decide(
            &self.rule_set,
            self.fallback.as_ref(),
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}

/// Builder for [`RuleBasedRoutingSampler`].
///
/// Rules keep the order in which they were added. Patterns are validated when
/// [`build`](Self::build) is called.
#[derive(Debug)]
pub struct RuleBasedRoutingSamplerBuilder {
    scope: RuleScope,
    fallback: Box<dyn ShouldSample>,
    entries: Vec<RawRuleEntry>,
}

impl RuleBasedRoutingSamplerBuilder {
    /// Drops spans whose `key` attribute matches `pattern`.
    pub fn drop(self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with_action(Action::Drop, key, pattern)
    }

    /// Records and samples spans whose `key` attribute matches `pattern`.
    pub fn record_and_sample(self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with_action(Action::RecordAndSample, key, pattern)
    }

    /// Leaves spans whose `key` attribute matches `pattern` to the fallback,
    /// skipping any rule added after this one.
    pub fn delegate(self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with_action(Action::Delegate, key, pattern)
    }

    /// Adds a raw entry. Its scope, when unset, is the builder's span kind.
    pub fn with_entry(mut self, mut entry: RawRuleEntry) -> Self {
        if entry.scope.is_none() {
            entry.scope = Some(self.scope.as_str().to_string());
        }
        self.entries.push(entry);
        self
    }

    /// Adds several raw entries.
    pub fn with_entries<I>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = RawRuleEntry>,
    {
        entries
            .into_iter()
            .fold(self, |builder, entry| builder.with_entry(entry))
    }

    /// Compiles the rules and builds the sampler.
    pub fn build(self) -> Result<RuleBasedRoutingSampler, ConfigurationError> {
        let rule_set = RuleSet::compile(self.entries)?;
        Ok(RuleBasedRoutingSampler::from_parts(
            Arc::new(rule_set),
            self.fallback,
        ))
    }

    fn with_action(
        self,
        action: Action,
        key: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        self.with_entry(RawRuleEntry::new(key, pattern, action.as_str()))
    }
}
