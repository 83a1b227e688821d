use thiserror::Error;

/// Errors raised while compiling sampling rules.
///
/// These only ever surface when a sampler is being constructed; evaluating a
/// compiled [`RuleSet`](crate::RuleSet) cannot fail. Entry level variants carry
/// the zero based position of the offending entry and the entry itself.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The attribute key of a rule is empty.
    #[error("rule #{index} has an empty attribute key: {entry}")]
    EmptyKey {
        /// Position of the entry in the configuration.
        index: usize,
        /// The entry as written.
        entry: String,
    },

    /// A rule has an empty pattern, or an empty item in a comma separated list.
    #[error("rule #{index} has an empty pattern: {entry}")]
    EmptyPattern {
        /// Position of the entry in the configuration.
        index: usize,
        /// The entry as written.
        entry: String,
    },

    /// The action is not one of `drop`, `record_and_sample` or `delegate`.
    #[error("rule #{index} has unknown action '{action}' (expected drop, record_and_sample or delegate): {entry}")]
    UnknownAction {
        /// Position of the entry in the configuration.
        index: usize,
        /// The unrecognised action.
        action: String,
        /// The entry as written.
        entry: String,
    },

    /// The scope is not a span kind.
    #[error("rule #{index} has unknown scope '{scope}' (expected server, client, producer, consumer or internal): {entry}")]
    UnknownScope {
        /// Position of the entry in the configuration.
        index: usize,
        /// The unrecognised scope.
        scope: String,
        /// The entry as written.
        entry: String,
    },

    /// The match kind is not one of `literal`, `glob` or `regex`.
    #[error("rule #{index} has unknown match kind '{kind}' (expected literal, glob or regex): {entry}")]
    UnknownMatchKind {
        /// Position of the entry in the configuration.
        index: usize,
        /// The unrecognised match kind.
        kind: String,
        /// The entry as written.
        entry: String,
    },

    /// A `regex` pattern does not compile.
    #[error("rule #{index} has invalid regular expression '{pattern}': {source}")]
    InvalidRegex {
        /// Position of the entry in the configuration.
        index: usize,
        /// The pattern that failed to compile.
        pattern: String,
        /// Why it failed.
        #[source]
        source: regex::Error,
    },

    /// A JSON rule list could not be parsed.
    #[error("invalid sampling rules JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ConfigurationError {
    /// Position of the offending entry, if the error concerns a single entry.
    pub fn index(&self) -> Option<usize> {
        match self {
            ConfigurationError::EmptyKey { index, .. }
            | ConfigurationError::EmptyPattern { index, .. }
            | ConfigurationError::UnknownAction { index, .. }
            | ConfigurationError::UnknownScope { index, .. }
            | ConfigurationError::UnknownMatchKind { index, .. }
            | ConfigurationError::InvalidRegex { index, .. } => Some(*index),
            ConfigurationError::InvalidJson(_) => None,
        }
    }
}
