//! Attribute value matching.
//!
//! A [`Pattern`] is compiled once, when a [`RuleSet`] is built, and then
//! consulted for every sampled span. None of the match kinds backtrack, so the
//! cost of a match is bounded by the length of the pattern and the value.
//!
//! [`RuleSet`]: crate::RuleSet
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// How a rule pattern is compared against an attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MatchKind {
    /// Exact, case-sensitive string equality.
    Literal,
    /// `*` matches any run of characters, including none. No other wildcard.
    Glob,
    /// Regular expression that must match the whole value.
    Regex,
}

impl MatchKind {
    /// The kind used when a rule does not name one: patterns containing `*`
    /// are globs, everything else is a literal.
    pub fn infer(pattern: &str) -> Self {
        if pattern.contains('*') {
            MatchKind::Glob
        } else {
            MatchKind::Literal
        }
    }

    /// Name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Literal => "literal",
            MatchKind::Glob => "glob",
            MatchKind::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "literal" => Ok(MatchKind::Literal),
            "glob" => Ok(MatchKind::Glob),
            "regex" => Ok(MatchKind::Regex),
            _ => Err(()),
        }
    }
}

/// A compiled pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    inner: Inner,
}

#[derive(Clone, Debug)]
enum Inner {
    Literal,
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Pattern {
    /// Compiles `source` as a pattern of the given kind.
    ///
    /// Only regular expressions can fail to compile.
    pub fn new(source: &str, kind: MatchKind) -> Result<Self, regex::Error> {
        let inner = match kind {
            MatchKind::Literal => Inner::Literal,
            MatchKind::Glob => Inner::Glob(GlobMatcher::new(source)),
            MatchKind::Regex => Inner::Regex(Regex::new(&format!("^(?:{source})$"))?),
        };
        Ok(Pattern {
            source: source.to_string(),
            inner,
        })
    }

    /// The pattern as it was written in configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The kind this pattern was compiled as.
    pub fn kind(&self) -> MatchKind {
        match self.inner {
            Inner::Literal => MatchKind::Literal,
            Inner::Glob(_) => MatchKind::Glob,
            Inner::Regex(_) => MatchKind::Regex,
        }
    }

    /// Returns `true` if `candidate` matches this pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.inner {
            Inner::Literal => self.source == candidate,
            Inner::Glob(glob) => glob.matches(candidate),
            Inner::Regex(regex) => regex.is_match(candidate),
        }
    }
}

/// Glob matcher supporting only the `*` wildcard.
///
/// The pattern is split on `*` into literal segments. A candidate matches when
/// it starts with the first segment, ends with the last one, and contains the
/// segments in between in order without overlapping. Placing each middle
/// segment at its leftmost occurrence is always optimal, so the search never
/// has to revisit an earlier choice.
#[derive(Clone, Debug, PartialEq, Eq)]
struct GlobMatcher {
    /// Literal text before the first `*`, or the whole pattern when there is
    /// no wildcard.
    prefix: String,
    /// Literal text after the last `*`.
    suffix: String,
    /// Non-empty literal runs between wildcards.
    middle: Vec<String>,
    has_wildcard: bool,
}

impl GlobMatcher {
    fn new(pattern: &str) -> Self {
        let mut parts = pattern.split('*');
        let prefix = parts.next().unwrap_or_default().to_string();
        let mut rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return GlobMatcher {
                prefix,
                suffix: String::new(),
                middle: Vec::new(),
                has_wildcard: false,
            };
        }
        let suffix = rest.pop().unwrap_or_default().to_string();
        GlobMatcher {
            prefix,
            suffix,
            middle: rest
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            has_wildcard: true,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        if !self.has_wildcard {
            return self.prefix == candidate;
        }
        if candidate.len() < self.prefix.len() + self.suffix.len() {
            return false;
        }
        if !candidate.starts_with(self.prefix.as_str())
            || !candidate.ends_with(self.suffix.as_str())
        {
            return false;
        }

        // The prefix and suffix are anchored; middle segments must fit in between.
        let mut remaining = &candidate[self.prefix.len()..candidate.len() - self.suffix.len()];
        for segment in &self.middle {
            match remaining.find(segment.as_str()) {
                Some(at) => remaining = &remaining[at + segment.len()..],
                None => return false,
            }
        }
        true
    }
}

/// Matches `candidate` against a `*` glob without compiling it first.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    GlobMatcher::new(pattern).matches(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("AUTH*", "AUTH2", true)]
    #[case("AUTH*", "AUTHOR", true)]
    #[case("AUTH*", "AUTH", true)]
    #[case("AUTH*", "AUT", false)]
    #[case("AUTH*", "auth2", false)]
    #[case("*/actuator/health", "/app/actuator/health", true)]
    #[case("*/actuator/health", "/actuator/health", true)]
    #[case("*/actuator/health", "/app/actuator/health/liveness", false)]
    #[case("*", "", true)]
    #[case("*", "anything", true)]
    #[case("**", "", true)]
    #[case("", "", true)]
    #[case("", "x", false)]
    #[case("a*", "", false)]
    #[case("h*o", "hello", true)]
    #[case("h*o", "ho", true)]
    #[case("h*o", "hell", false)]
    #[case("a*b*c", "abc", true)]
    #[case("a*b*c", "aXbYc", true)]
    #[case("a*b*c", "acb", false)]
    #[case("*service*", "my service name", true)]
    #[case("*service*", "svc", false)]
    #[case("aa*aa", "aaa", false)]
    #[case("aa*aa", "aaaa", true)]
    #[case("select * from dual", "select 1 from dual", true)]
    #[case("select * from dual", "select 1 from users", false)]
    fn glob(#[case] pattern: &str, #[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(
            glob_matches(pattern, candidate),
            expected,
            "glob {pattern:?} against {candidate:?}"
        );
    }

    #[test]
    fn glob_handles_multibyte_text() {
        assert!(glob_matches("健康*", "健康检查"));
        assert!(glob_matches("*检查", "健康检查"));
        assert!(!glob_matches("*检查", "健康"));
    }

    #[test]
    fn glob_long_input_does_not_blow_up() {
        let candidate = "a".repeat(100_000);
        let pattern = format!("*{}b*", "a*".repeat(1_000));
        assert!(!glob_matches(&pattern, &candidate));
    }

    #[test]
    fn literal_is_exact() {
        let pattern = Pattern::new("PING", MatchKind::Literal).unwrap();
        assert!(pattern.matches("PING"));
        assert!(!pattern.matches("ping"));
        assert!(!pattern.matches("PING "));
        assert_eq!(pattern.kind(), MatchKind::Literal);
    }

    #[test]
    fn literal_treats_star_as_text() {
        let pattern = Pattern::new("a*", MatchKind::Literal).unwrap();
        assert!(pattern.matches("a*"));
        assert!(!pattern.matches("ab"));
    }

    #[test]
    fn regex_is_anchored() {
        let pattern = Pattern::new(".*/actuator/health", MatchKind::Regex).unwrap();
        assert!(pattern.matches("/app/actuator/health"));
        assert!(!pattern.matches("/app/actuator/health/liveness"));

        let pattern = Pattern::new("select .* from dual", MatchKind::Regex).unwrap();
        assert!(pattern.matches("select 1 from dual"));
        assert!(!pattern.matches("/* hint */ select 1 from dual"));
    }

    #[test]
    fn regex_alternation_stays_anchored() {
        let pattern = Pattern::new("PING|QUIT", MatchKind::Regex).unwrap();
        assert!(pattern.matches("QUIT"));
        assert!(!pattern.matches("PINGQUIT"));
        assert!(!pattern.matches("xQUIT"));
    }

    #[test]
    fn invalid_regex_fails_to_compile() {
        assert!(Pattern::new("(unclosed", MatchKind::Regex).is_err());
    }

    #[test]
    fn infer_kind() {
        assert_eq!(MatchKind::infer("PING"), MatchKind::Literal);
        assert_eq!(MatchKind::infer("AUTH*"), MatchKind::Glob);
        assert_eq!(MatchKind::infer("select .* from dual"), MatchKind::Glob);
    }

    #[test]
    fn kind_round_trips_through_config_names() {
        for kind in [MatchKind::Literal, MatchKind::Glob, MatchKind::Regex] {
            assert_eq!(kind.as_str().parse::<MatchKind>(), Ok(kind));
        }
        assert!("wildcard".parse::<MatchKind>().is_err());
    }
}
