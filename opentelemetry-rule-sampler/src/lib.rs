//! # OpenTelemetry Rule Sampler
//!
//! A [`ShouldSample`] implementation that drops (or force-samples) spans whose
//! attributes match configured patterns and leaves every other span to a
//! wrapped sampler. Typical uses are keeping health checks, readiness probes
//! and database keep-alive statements out of exported traces.
//!
//! Rules are compiled once into an immutable [`RuleSet`]. Per span, the rules
//! for the span's kind are evaluated in declaration order and the first match
//! decides; when nothing matches the wrapped sampler's result is returned
//! unchanged.
//!
//! ```
//! use opentelemetry::trace::SpanKind;
//! use opentelemetry_rule_sampler::RuleBasedRoutingSampler;
//! use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
//!
//! let server = RuleBasedRoutingSampler::builder(
//!     SpanKind::Server,
//!     Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
//! )
//! .drop("url.path", "*/actuator/health")
//! .build()?;
//!
//! let sampler = RuleBasedRoutingSampler::builder(SpanKind::Client, server)
//!     .drop("db.statement", "PING,QUIT,AUTH*")
//!     .build()?;
//!
//! let provider = SdkTracerProvider::builder().with_sampler(sampler).build();
//! # drop(provider);
//! # Ok::<(), opentelemetry_rule_sampler::ConfigurationError>(())
//! ```
//!
//! The same chain can be configured from the environment with
//! [`RuleSamplerConfig`]; see the [`config`] module.
//!
//! ## Patterns
//!
//! Patterns are literal unless they contain `*`, in which case `*` matches any
//! run of characters. Rules may opt into anchored regular expressions. A single
//! literal or glob pattern may list several alternatives separated by commas;
//! regular expressions are never split.
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: emits a diagnostic event through `tracing` when a
//!   sampler is built and when configuration is ignored. Enabled by default.
//!
//! [`ShouldSample`]: opentelemetry_sdk::trace::ShouldSample
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod config;
mod error;
pub mod matcher;
mod rule_set;
mod sampler;

pub use config::{ParsedRules, RuleSamplerConfig, RuleSamplerConfigBuilder};
pub use error::ConfigurationError;
pub use matcher::{MatchKind, Pattern};
pub use rule_set::{Action, Outcome, RawRuleEntry, Rule, RuleScope, RuleSet};
pub use sampler::{decide, RuleBasedRoutingSampler, RuleBasedRoutingSamplerBuilder};
