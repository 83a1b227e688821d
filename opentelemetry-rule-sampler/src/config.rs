//! Environment driven configuration.
//!
//! [`RuleSamplerConfig`] reproduces the usual deployment: health check
//! requests are dropped from server spans, and connection chatter (`PING`,
//! `AUTH`, keep-alive queries) is dropped from client spans. Both lists and any
//! additional rules can be overridden through environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `OTEL_RULE_SAMPLER_SERVER_DROP` | `*/actuator/health` |
//! | `OTEL_RULE_SAMPLER_CLIENT_DROP` | `PING,QUIT,AUTH*,select * from dual` |
//! | `OTEL_RULE_SAMPLER_RULES` | none; a JSON array of [`RawRuleEntry`] |
//!
//! Setting a drop list variable to an empty string disables it. If
//! `OTEL_RULE_SAMPLER_RULES` is not a valid rule list,
//! [`RuleSamplerConfig::into_sampler`] fails with
//! [`ConfigurationError::InvalidJson`].
use crate::error::ConfigurationError;
use crate::rule_set::{RawRuleEntry, RuleSet};
use crate::sampler::RuleBasedRoutingSampler;
use opentelemetry::otel_warn;
use opentelemetry_sdk::trace::ShouldSample;
use std::env::{self, VarError};
use std::fmt::{self, Display};
use std::ops::Deref;
use std::str::FromStr;

/// Comma separated patterns dropped from server spans.
pub(crate) const OTEL_RULE_SAMPLER_SERVER_DROP: &str = "OTEL_RULE_SAMPLER_SERVER_DROP";
/// Default for `OTEL_RULE_SAMPLER_SERVER_DROP`.
pub(crate) const OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT: &str = "*/actuator/health";
/// Comma separated patterns dropped from client spans.
pub(crate) const OTEL_RULE_SAMPLER_CLIENT_DROP: &str = "OTEL_RULE_SAMPLER_CLIENT_DROP";
/// Default for `OTEL_RULE_SAMPLER_CLIENT_DROP`.
pub(crate) const OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT: &str =
    "PING,QUIT,AUTH*,select * from dual";
/// JSON array of additional rules.
pub(crate) const OTEL_RULE_SAMPLER_RULES: &str = "OTEL_RULE_SAMPLER_RULES";

/// Span attribute keys inspected by the default drop lists.
pub mod attribute {
    /// Path of an inbound HTTP request.
    pub const URL_PATH: &str = "url.path";
    /// Request target of an inbound HTTP request, in older semantic conventions.
    pub const HTTP_TARGET: &str = "http.target";
    /// Full URL of an outbound HTTP request.
    pub const URL_FULL: &str = "url.full";
    /// Full URL of an outbound HTTP request, in older semantic conventions.
    pub const HTTP_URL: &str = "http.url";
    /// Statement sent to a database.
    pub const DB_STATEMENT: &str = "db.statement";

    /// Keys matched against the server drop list.
    pub const SERVER_KEYS: [&str; 2] = [URL_PATH, HTTP_TARGET];
    /// Keys matched against the client drop list.
    pub const CLIENT_KEYS: [&str; 3] = [HTTP_URL, URL_FULL, DB_STATEMENT];
}

/// A JSON list of raw rules, as found in `OTEL_RULE_SAMPLER_RULES`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedRules {
    /// The rules in declaration order.
    pub rules: Vec<RawRuleEntry>,
}

impl Deref for ParsedRules {
    type Target = [RawRuleEntry];

    fn deref(&self) -> &Self::Target {
        &self.rules
    }
}

impl From<ParsedRules> for Vec<RawRuleEntry> {
    fn from(parsed: ParsedRules) -> Self {
        parsed.rules
    }
}

impl FromStr for ParsedRules {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(ParsedRules::default());
        }
        let rules: Vec<RawRuleEntry> = serde_json::from_str(s)?;
        Ok(ParsedRules { rules })
    }
}

impl Display for ParsedRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::json!(self.rules))
    }
}

/// Configuration of the server and client rule samplers.
///
/// Use [`RuleSamplerConfigBuilder`] to set values programmatically. The
/// default is read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSamplerConfig {
    pub(crate) server_drop: String,
    pub(crate) client_drop: String,
    pub(crate) rules: Vec<RawRuleEntry>,
    /// Rule JSON that failed to parse; reported by `into_sampler`.
    pub(crate) invalid_rules: Option<String>,
}

impl Default for RuleSamplerConfig {
    fn default() -> Self {
        RuleSamplerConfigBuilder::default().build()
    }
}

impl RuleSamplerConfig {
    /// Creates a builder initialised from defaults and the environment.
    pub fn builder() -> RuleSamplerConfigBuilder {
        RuleSamplerConfigBuilder::default()
    }

    /// Comma separated patterns dropped from server spans.
    pub fn server_drop(&self) -> &str {
        &self.server_drop
    }

    /// Comma separated patterns dropped from client spans.
    pub fn client_drop(&self) -> &str {
        &self.client_drop
    }

    /// Additional rules.
    pub fn rules(&self) -> &[RawRuleEntry] {
        &self.rules
    }

    /// Raw entries for the server sampler: the server drop list on every
    /// server key, then additional server scoped rules.
    pub fn server_entries(&self) -> Vec<RawRuleEntry> {
        let mut entries = drop_entries(&self.server_drop, &attribute::SERVER_KEYS, "server");
        entries.extend(
            self.rules
                .iter()
                .filter(|entry| is_server_scoped(entry))
                .cloned(),
        );
        entries
    }

    /// Raw entries for the client sampler: the client drop list on every
    /// client key, then every additional rule that is not server scoped.
    pub fn client_entries(&self) -> Vec<RawRuleEntry> {
        let mut entries = drop_entries(&self.client_drop, &attribute::CLIENT_KEYS, "client");
        entries.extend(
            self.rules
                .iter()
                .filter(|entry| !is_server_scoped(entry))
                .cloned(),
        );
        entries
    }

    /// Wraps `fallback` in a server rule sampler, itself wrapped in a client
    /// rule sampler.
    ///
    /// Any malformed rule is returned as an error; nothing is dropped silently.
    pub fn into_sampler<S>(
        self,
        fallback: S,
    ) -> Result<RuleBasedRoutingSampler, ConfigurationError>
    where
        S: ShouldSample + 'static,
    {
        if let Some(raw) = &self.invalid_rules {
            ParsedRules::from_str(raw)?;
        }
        let server_rules = RuleSet::compile(self.server_entries())?;
        let client_rules = RuleSet::compile(self.client_entries())?;
        let server = RuleBasedRoutingSampler::new(server_rules, fallback);
        Ok(RuleBasedRoutingSampler::new(client_rules, server))
    }
}

fn is_server_scoped(entry: &RawRuleEntry) -> bool {
    matches!(entry.scope.as_deref(), None | Some("server"))
}

/// One entry per key, so the same comma separated list is applied to each of
/// them in turn.
fn drop_entries(patterns: &str, keys: &[&str], scope: &str) -> Vec<RawRuleEntry> {
    if patterns.trim().is_empty() {
        return Vec::new();
    }
    keys.iter()
        .map(|key| RawRuleEntry::new(*key, patterns, "drop").with_scope(scope))
        .collect()
}

/// A builder for creating [`RuleSamplerConfig`] instances.
#[derive(Debug)]
pub struct RuleSamplerConfigBuilder {
    server_drop: String,
    client_drop: String,
    rules: Vec<RawRuleEntry>,
    invalid_rules: Option<String>,
}

impl Default for RuleSamplerConfigBuilder {
    /// Create a new [`RuleSamplerConfigBuilder`] initialized with the default
    /// drop lists. The values are overridden by environment variables if set.
    /// The supported environment variables are:
    /// * `OTEL_RULE_SAMPLER_SERVER_DROP`
    /// * `OTEL_RULE_SAMPLER_CLIENT_DROP`
    /// * `OTEL_RULE_SAMPLER_RULES`
    fn default() -> Self {
        RuleSamplerConfigBuilder {
            server_drop: OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT.to_string(),
            client_drop: OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT.to_string(),
            rules: Vec::new(),
            invalid_rules: None,
        }
        .init_from_env_vars()
    }
}

impl RuleSamplerConfigBuilder {
    /// Set the comma separated patterns dropped from server spans.
    pub fn with_server_drop(mut self, patterns: impl Into<String>) -> Self {
        self.server_drop = patterns.into();
        self
    }

    /// Set the comma separated patterns dropped from client spans.
    pub fn with_client_drop(mut self, patterns: impl Into<String>) -> Self {
        self.client_drop = patterns.into();
        self
    }

    /// Append a rule evaluated after the drop lists.
    pub fn with_rule(mut self, rule: RawRuleEntry) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the additional rules, including any read from an invalid
    /// `OTEL_RULE_SAMPLER_RULES`.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = RawRuleEntry>) -> Self {
        self.rules = rules.into_iter().collect();
        self.invalid_rules = None;
        self
    }

    /// Builds a `RuleSamplerConfig`. Patterns are validated later, by
    /// [`RuleSamplerConfig::into_sampler`].
    pub fn build(self) -> RuleSamplerConfig {
        RuleSamplerConfig {
            server_drop: self.server_drop,
            client_drop: self.client_drop,
            rules: self.rules,
            invalid_rules: self.invalid_rules,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(server_drop) = read_env_var(OTEL_RULE_SAMPLER_SERVER_DROP) {
            self.server_drop = server_drop;
        }

        if let Some(client_drop) = read_env_var(OTEL_RULE_SAMPLER_CLIENT_DROP) {
            self.client_drop = client_drop;
        }

        if let Some(rules) = read_env_var(OTEL_RULE_SAMPLER_RULES) {
            match ParsedRules::from_str(&rules) {
                Ok(parsed) => self.rules = parsed.into(),
                Err(err) => {
                    otel_warn!(
                        name: "RuleSamplerConfig.InvalidRules",
                        message = "OTEL_RULE_SAMPLER_RULES is not a valid JSON array of rules; building the sampler will fail",
                        error = format!("{err}")
                    );
                    self.rules = Vec::new();
                    self.invalid_rules = Some(rules);
                }
            }
        }

        self
    }
}

fn read_env_var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(_)) => {
            otel_warn!(
                name: "RuleSamplerConfig.UnreadableVariable",
                message = "environment variable is not valid unicode and is ignored",
                variable = key.to_string()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_set::RuleScope;
    use opentelemetry::trace::{SamplingDecision, SpanKind, TraceId};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace::Sampler;

    const ENV_VARS: [&str; 3] = [
        OTEL_RULE_SAMPLER_SERVER_DROP,
        OTEL_RULE_SAMPLER_CLIENT_DROP,
        OTEL_RULE_SAMPLER_RULES,
    ];

    fn decision(
        sampler: &RuleBasedRoutingSampler,
        kind: SpanKind,
        key: &'static str,
        value: &'static str,
    ) -> SamplingDecision {
        sampler
            .should_sample(
                None,
                TraceId::from(7u128),
                "span",
                &kind,
                &[KeyValue::new(key, value)],
                &[],
            )
            .decision
    }

    #[test]
    fn test_default_const_values() {
        assert_eq!(OTEL_RULE_SAMPLER_SERVER_DROP, "OTEL_RULE_SAMPLER_SERVER_DROP");
        assert_eq!(OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT, "*/actuator/health");
        assert_eq!(OTEL_RULE_SAMPLER_CLIENT_DROP, "OTEL_RULE_SAMPLER_CLIENT_DROP");
        assert_eq!(
            OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT,
            "PING,QUIT,AUTH*,select * from dual"
        );
        assert_eq!(OTEL_RULE_SAMPLER_RULES, "OTEL_RULE_SAMPLER_RULES");
    }

    #[test]
    fn test_default_config_without_env_vars() {
        let config = temp_env::with_vars_unset(ENV_VARS, RuleSamplerConfig::default);
        assert_eq!(config.server_drop(), OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT);
        assert_eq!(config.client_drop(), OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT);
        assert!(config.rules().is_empty());
    }

    #[test]
    fn test_config_configurable_by_env_vars() {
        let env_vars = vec![
            (OTEL_RULE_SAMPLER_SERVER_DROP, Some("/ready,/live")),
            (OTEL_RULE_SAMPLER_CLIENT_DROP, Some("*/metrics")),
            (
                OTEL_RULE_SAMPLER_RULES,
                Some(r#"[{"key": "messaging.destination.name", "pattern": "heartbeat", "action": "drop", "scope": "producer"}]"#),
            ),
        ];
        let config = temp_env::with_vars(env_vars, RuleSamplerConfig::default);
        assert_eq!(config.server_drop(), "/ready,/live");
        assert_eq!(config.client_drop(), "*/metrics");
        assert_eq!(config.rules().len(), 1);
        assert_eq!(config.rules()[0].scope.as_deref(), Some("producer"));
    }

    #[test]
    fn test_empty_env_var_disables_drop_list() {
        let env_vars = vec![
            (OTEL_RULE_SAMPLER_SERVER_DROP, Some("")),
            (OTEL_RULE_SAMPLER_CLIENT_DROP, Some("")),
            (OTEL_RULE_SAMPLER_RULES, None),
        ];
        let config = temp_env::with_vars(env_vars, RuleSamplerConfig::default);
        assert!(config.server_entries().is_empty());
        assert!(config.client_entries().is_empty());

        let sampler = config.into_sampler(Sampler::AlwaysOn).unwrap();
        assert_eq!(
            decision(&sampler, SpanKind::Server, "url.path", "/actuator/health"),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn test_invalid_rules_json_fails_sampler_construction() {
        for rules in [
            "[{not json",
            r#"[{"key": "url.path", "pattern": "/ready", "acton": "drop"}]"#,
            r#"[{"key": "db.statement", "pattern": "PING", "action": "drop", "scop": "client"}]"#,
        ] {
            let env_vars = vec![
                (OTEL_RULE_SAMPLER_SERVER_DROP, None),
                (OTEL_RULE_SAMPLER_CLIENT_DROP, None),
                (OTEL_RULE_SAMPLER_RULES, Some(rules)),
            ];
            let config = temp_env::with_vars(env_vars, RuleSamplerConfig::default);
            assert!(config.rules().is_empty());
            assert_eq!(config.server_drop(), OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT);
            assert!(
                matches!(
                    config.into_sampler(Sampler::AlwaysOn),
                    Err(ConfigurationError::InvalidJson(_))
                ),
                "{rules}"
            );
        }
    }

    #[test]
    fn test_with_rules_replaces_invalid_rules_json() {
        let env_vars = vec![
            (OTEL_RULE_SAMPLER_SERVER_DROP, None),
            (OTEL_RULE_SAMPLER_CLIENT_DROP, None),
            (OTEL_RULE_SAMPLER_RULES, Some("[{not json")),
        ];
        let config = temp_env::with_vars(env_vars, || {
            RuleSamplerConfig::builder()
                .with_rules([RawRuleEntry::new("url.path", "/ready", "drop")])
                .build()
        });
        let sampler = config.into_sampler(Sampler::AlwaysOn).unwrap();
        assert_eq!(
            decision(&sampler, SpanKind::Server, "url.path", "/ready"),
            SamplingDecision::Drop
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_env_var_keeps_default() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let invalid = OsString::from_vec(vec![b'/', 0x80, b'a']);
        let config = temp_env::with_vars_unset(
            [OTEL_RULE_SAMPLER_CLIENT_DROP, OTEL_RULE_SAMPLER_RULES],
            || {
                temp_env::with_var(
                    OTEL_RULE_SAMPLER_SERVER_DROP,
                    Some(invalid),
                    RuleSamplerConfig::default,
                )
            },
        );
        assert_eq!(config.server_drop(), OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT);
        assert!(config.into_sampler(Sampler::AlwaysOn).is_ok());
    }

    #[test]
    fn test_parsed_rules_from_str() {
        assert!(ParsedRules::from_str("").unwrap().is_empty());
        assert!(ParsedRules::from_str("  ").unwrap().is_empty());
        assert!(matches!(
            ParsedRules::from_str("{}"),
            Err(ConfigurationError::InvalidJson(_))
        ));

        let parsed =
            ParsedRules::from_str(r#"[{"key": "url.path", "pattern": "/a", "action": "drop"}]"#)
                .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed.to_string(),
            r#"[{"action":"drop","key":"url.path","pattern":"/a"}]"#
        );
    }

    #[test]
    fn test_default_lists_expand_per_key() {
        let config = RuleSamplerConfig::builder()
            .with_server_drop(OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT)
            .with_client_drop(OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT)
            .with_rules([])
            .build();

        let server = RuleSet::compile(config.server_entries()).unwrap();
        assert_eq!(server.rules(RuleScope::Server).len(), 2);

        let client = RuleSet::compile(config.client_entries()).unwrap();
        // four patterns on each of three keys
        assert_eq!(client.rules(RuleScope::Client).len(), 12);
        assert!(client.rules(RuleScope::Server).is_empty());
    }

    #[test]
    fn test_default_sampler_drops_health_checks_and_chatter() {
        let config = RuleSamplerConfig::builder()
            .with_server_drop(OTEL_RULE_SAMPLER_SERVER_DROP_DEFAULT)
            .with_client_drop(OTEL_RULE_SAMPLER_CLIENT_DROP_DEFAULT)
            .with_rules([])
            .build();
        let sampler = config.into_sampler(Sampler::AlwaysOn).unwrap();

        for (kind, key, value) in [
            (SpanKind::Server, "url.path", "/app/actuator/health"),
            (SpanKind::Server, "http.target", "/actuator/health"),
            (SpanKind::Client, "db.statement", "PING"),
            (SpanKind::Client, "db.statement", "AUTH user pass"),
            (SpanKind::Client, "db.statement", "select 1 from dual"),
            (SpanKind::Client, "url.full", "QUIT"),
        ] {
            assert_eq!(
                decision(&sampler, kind, key, value),
                SamplingDecision::Drop,
                "{key}={value}"
            );
        }

        for (kind, key, value) in [
            (SpanKind::Server, "url.path", "/orders"),
            (SpanKind::Server, "url.path", "/actuator/health/liveness"),
            (SpanKind::Client, "db.statement", "select * from orders"),
            (SpanKind::Client, "url.path", "/actuator/health"),
            (SpanKind::Internal, "db.statement", "PING"),
        ] {
            assert_eq!(
                decision(&sampler, kind, key, value),
                SamplingDecision::RecordAndSample,
                "{key}={value}"
            );
        }
    }

    #[test]
    fn test_additional_rules_are_routed_by_scope() {
        let config = RuleSamplerConfig::builder()
            .with_server_drop("")
            .with_client_drop("")
            .with_rules([])
            .with_rule(RawRuleEntry::new("url.path", "/ready", "drop"))
            .with_rule(
                RawRuleEntry::new("messaging.destination.name", "heartbeat", "drop")
                    .with_scope("producer"),
            )
            .build();
        assert_eq!(config.server_entries().len(), 1);
        assert_eq!(config.client_entries().len(), 1);

        let sampler = config.into_sampler(Sampler::AlwaysOn).unwrap();
        assert_eq!(
            decision(&sampler, SpanKind::Server, "url.path", "/ready"),
            SamplingDecision::Drop
        );
        assert_eq!(
            decision(
                &sampler,
                SpanKind::Producer,
                "messaging.destination.name",
                "heartbeat"
            ),
            SamplingDecision::Drop
        );
    }

    #[test]
    fn test_malformed_rule_fails_sampler_construction() {
        let config = RuleSamplerConfig::builder()
            .with_server_drop("/a,,/b")
            .with_client_drop("")
            .with_rules([])
            .build();
        let err = config.into_sampler(Sampler::AlwaysOn).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyPattern { index: 0, .. }));

        let config = RuleSamplerConfig::builder()
            .with_server_drop("")
            .with_client_drop("")
            .with_rules([])
            .with_rule(RawRuleEntry::new("url.path", "/a", "keep"))
            .build();
        assert!(matches!(
            config.into_sampler(Sampler::AlwaysOn),
            Err(ConfigurationError::UnknownAction { .. })
        ));
    }
}
