use regex::{Regex, RegexBuilder};

/// Upper bound on the compiled size of a viewer-supplied pattern
const MAX_PATTERN_SIZE: usize = 1 << 20;

#[derive(Clone, Debug)]
enum Matcher {
    Regex(Regex),
    /// Lowercased needle
    Substring(String),
}

/// Compiled line filter
///
/// The pattern is tried as a case-insensitive regular expression first. A
/// pattern that does not compile is matched as a literal, case-insensitive
/// substring instead, so a filter never fails to build.
#[derive(Clone, Debug)]
pub struct LineFilter {
    matcher: Matcher,

    /// Original pattern string
    pattern: String,
}

impl LineFilter {
    /// Create a new filter from a pattern string
    pub fn new(pattern: &str) -> Self {
        let matcher = match RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(MAX_PATTERN_SIZE)
            .build()
        {
            Ok(regex) => Matcher::Regex(regex),
            Err(e) => {
                tracing::debug!(pattern, error = %e, "Filter is not a valid regex, matching as text");
                Matcher::Substring(pattern.to_lowercase())
            }
        };

        Self {
            matcher,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a line matches this filter
    pub fn matches(&self, line: &str) -> bool {
        match &self.matcher {
            Matcher::Regex(re) => re.is_match(line),
            Matcher::Substring(needle) => line.to_lowercase().contains(needle.as_str()),
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern compiled as a regular expression
    pub fn is_regex(&self) -> bool {
        matches!(self.matcher, Matcher::Regex(_))
    }
}

/// One-shot form of [`LineFilter::matches`]
pub fn matches(line: &str, pattern: &str) -> bool {
    LineFilter::new(pattern).matches(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_filter() {
        let filter = LineFilter::new(r"error|warn");
        assert!(filter.is_regex());
        assert!(filter.matches("ERROR: connection refused"));
        assert!(filter.matches("WARN retrying"));
        assert!(!filter.matches("INFO ready"));
    }

    #[test]
    fn test_invalid_regex_falls_back_to_substring() {
        let filter = LineFilter::new("timeout (30s");
        assert!(!filter.is_regex());
        assert!(filter.matches("request Timeout (30s elapsed)"));
        assert!(!filter.matches("request timeout after 30s"));
        assert_eq!(filter.pattern(), "timeout (30s");
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert!(matches("anything", ""));
        assert!(matches("", ""));
    }

    #[test]
    fn test_one_shot_helper() {
        assert!(matches("OOMKilled", "oomkilled"));
        assert!(!matches("Started container", "^error"));
        assert!(matches("[warn] disk", "[warn"));
    }
}
