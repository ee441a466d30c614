use std::{fmt, str::FromStr};
use thiserror::Error;

const WILDCARD: char = '*';

/// Matches `(namespace, service account)` pairs against a list of
/// operator-supplied rules.
///
/// Rules are parsed from a string of comma-separated
/// `namespacePattern:serviceAccountPattern` entries. Each half is either an
/// exact name or a prefix terminated by a single trailing `*`. Any other use
/// of the wildcard is rejected when the matcher is built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Matcher {
    rules: Vec<Rule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Rule {
    namespace: Pattern,
    service_account: Pattern,
}

/// Matches a single namespace or service account name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// An exact match.
    Exact(String),

    /// A prefix match.
    Prefix(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidPattern {
    #[error("entry '{0}' must have the form 'namespace:serviceaccount'")]
    Format(String),

    #[error("entry '{0}' must not have an empty namespace or service account")]
    Empty(String),

    #[error("'{0}' may only use a single wildcard at the end of the name to indicate a prefix")]
    Wildcard(String),
}

// === impl Matcher ===

impl Matcher {
    /// Parses a matcher from a comma-separated list of
    /// `namespace:serviceaccount` patterns.
    ///
    /// Empty entries are ignored, so an empty pattern produces a matcher that
    /// matches nothing.
    pub fn build(patterns: &str) -> Result<Self, InvalidPattern> {
        let rules = patterns
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Rule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Returns true if any rule matches both the namespace and the service
    /// account name.
    pub fn matches(&self, namespace: &str, service_account: &str) -> bool {
        self.rules.iter().any(|rule| {
            rule.namespace.matches(namespace) && rule.service_account.matches(service_account)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromStr for Matcher {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::build(s)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", rule.namespace, rule.service_account)?;
        }
        Ok(())
    }
}

// === impl Rule ===

impl Rule {
    fn parse(entry: &str) -> Result<Self, InvalidPattern> {
        let entry = entry.trim();
        let (ns, sa) = entry
            .split_once(':')
            .ok_or_else(|| InvalidPattern::Format(entry.to_string()))?;
        if sa.contains(':') {
            return Err(InvalidPattern::Format(entry.to_string()));
        }

        let (ns, sa) = (ns.trim(), sa.trim());
        if ns.is_empty() || sa.is_empty() {
            return Err(InvalidPattern::Empty(entry.to_string()));
        }

        Ok(Self {
            namespace: ns.parse()?,
            service_account: sa.parse()?,
        })
    }
}

// === impl Pattern ===

impl Pattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

impl FromStr for Pattern {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.find(WILDCARD) {
            None => Ok(Self::Exact(s.to_string())),
            Some(idx) if idx == s.len() - WILDCARD.len_utf8() => {
                Ok(Self::Prefix(s[..idx].to_string()))
            }
            Some(_) => Err(InvalidPattern::Wildcard(s.to_string())),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => name.fmt(f),
            Self::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
        }
    }
}
