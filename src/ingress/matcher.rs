use regex::Regex;

/// Hostname side of an ingress rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatcher {
    /// `*` or no hostname at all
    Any,
    /// Exact hostname, case-insensitive
    Exact(String),
    /// `*.example.com`: any name ending in `.example.com`
    Wildcard { suffix: String },
}

impl HostMatcher {
    /// Builds a matcher from a configured hostname.
    ///
    /// Returns `None` for patterns with a `*` anywhere but the leftmost label.
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == "*" {
            return Some(HostMatcher::Any);
        }

        if let Some(rest) = pattern.strip_prefix("*.") {
            if rest.is_empty() || rest.contains('*') {
                return None;
            }
            return Some(HostMatcher::Wildcard {
                suffix: format!(".{}", rest.to_ascii_lowercase()),
            });
        }

        if pattern.contains('*') {
            return None;
        }
        Some(HostMatcher::Exact(pattern.to_ascii_lowercase()))
    }

    pub fn matches(&self, hostname: &str) -> bool {
        match self {
            HostMatcher::Any => true,
            HostMatcher::Exact(expected) => hostname.eq_ignore_ascii_case(expected),
            HostMatcher::Wildcard { suffix } => {
                hostname.len() > suffix.len()
                    && hostname.to_ascii_lowercase().ends_with(suffix.as_str())
            }
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, HostMatcher::Any)
    }
}

/// Path side of an ingress rule: an unanchored regular expression.
#[derive(Debug, Clone)]
pub struct PathMatcher(Regex);

impl PathMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(Regex::new(pattern)?))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}
