//! Compiled per-rule matcher.

use hyper::Method;
use parking_lot::Mutex;
use regex::Regex;
use tracing::warn;

use super::rewrite::CompiledReplacement;
use crate::config::OverrideRule;

enum UrlMatcher {
    /// Substring containment on `path?query`.
    Substring(String),
    /// Pre-compiled pattern matched against `path?query`.
    Regex(Regex),
}

/// Stateful counters, mutated only under the rule's lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub request_count: u64,
    pub trigger_count: u64,
}

pub struct CompiledOverride {
    pub rule: OverrideRule,
    pub replacements: Vec<CompiledReplacement>,
    matcher: Option<UrlMatcher>,
    enabled: bool,
    counters: Mutex<Counters>,
}

impl CompiledOverride {
    /// Compile a rule. A rule whose regex fails to compile is disabled rather
    /// than rejected, so one bad pattern cannot take down the whole file.
    pub fn compile(rule: OverrideRule) -> Self {
        let mut enabled = rule.enabled;
        let matcher = if rule.is_regex {
            match Regex::new(&rule.url_pattern) {
                Ok(regex) => Some(UrlMatcher::Regex(regex)),
                Err(e) => {
                    warn!(rule = %rule.name, pattern = %rule.url_pattern, error = %e,
                        "invalid url_pattern regex, disabling rule");
                    enabled = false;
                    None
                }
            }
        } else {
            Some(UrlMatcher::Substring(rule.url_pattern.clone()))
        };

        let replacements = rule
            .body_replacements
            .iter()
            .map(CompiledReplacement::compile)
            .collect();

        Self {
            rule,
            replacements,
            matcher,
            enabled,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Method filter plus URL pattern, without touching counters.
    pub fn matches(&self, method: &Method, full_url: &str) -> bool {
        if self.rule.method != "*" && !self.rule.method.eq_ignore_ascii_case(method.as_str()) {
            return false;
        }
        match &self.matcher {
            Some(UrlMatcher::Substring(pattern)) => full_url.contains(pattern.as_str()),
            Some(UrlMatcher::Regex(regex)) => regex.is_match(full_url),
            None => false,
        }
    }

    pub(super) fn counters(&self) -> &Mutex<Counters> {
        &self.counters
    }

    pub fn snapshot_counters(&self) -> Counters {
        *self.counters.lock()
    }
}

#[cfg(test)]
pub(crate) fn test_rule(name: &str) -> OverrideRule {
    OverrideRule {
        name: name.to_string(),
        method: "*".to_string(),
        url_pattern: "/".to_string(),
        is_regex: false,
        status_code: 200,
        headers: Default::default(),
        body_file: String::new(),
        body_text: String::new(),
        body_replacements: Vec::new(),
        enabled: true,
        trigger_after: 0,
        max_triggers: -1,
        reset_after: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_wildcard_matches_all() {
        let mut rule = test_rule("any-method");
        rule.url_pattern = "/bindings".to_string();
        let compiled = CompiledOverride::compile(rule);

        assert!(compiled.matches(&Method::GET, "/bindings"));
        assert!(compiled.matches(&Method::POST, "/bindings"));
        assert!(compiled.matches(&Method::DELETE, "/v1/bindings?page=2"));
    }

    #[test]
    fn test_method_filter_case_insensitive() {
        let mut rule = test_rule("get-only");
        rule.method = "get".to_string();
        rule.url_pattern = "/api".to_string();
        let compiled = CompiledOverride::compile(rule);

        assert!(compiled.matches(&Method::GET, "/api"));
        assert!(!compiled.matches(&Method::POST, "/api"));
    }

    #[test]
    fn test_substring_match_includes_query() {
        let mut rule = test_rule("query");
        rule.url_pattern = "page=2".to_string();
        let compiled = CompiledOverride::compile(rule);

        assert!(compiled.matches(&Method::GET, "/list?page=2"));
        assert!(!compiled.matches(&Method::GET, "/list?page=3"));
    }

    #[test]
    fn test_regex_match() {
        let mut rule = test_rule("users");
        rule.url_pattern = r"/api/users/\d+".to_string();
        rule.is_regex = true;
        let compiled = CompiledOverride::compile(rule);

        assert!(compiled.matches(&Method::GET, "/api/users/42"));
        assert!(!compiled.matches(&Method::GET, "/api/users/abc"));
    }

    #[test]
    fn test_invalid_regex_disables_rule() {
        let mut rule = test_rule("broken");
        rule.url_pattern = "[invalid(".to_string();
        rule.is_regex = true;
        let compiled = CompiledOverride::compile(rule);

        assert!(!compiled.is_enabled());
        assert!(!compiled.matches(&Method::GET, "[invalid("));
    }

    #[test]
    fn test_disabled_rule_keeps_flag() {
        let mut rule = test_rule("off");
        rule.enabled = false;
        let compiled = CompiledOverride::compile(rule);
        assert!(!compiled.is_enabled());
    }

    #[test]
    fn test_counters_start_at_zero() {
        let compiled = CompiledOverride::compile(test_rule("fresh"));
        assert_eq!(compiled.snapshot_counters(), Counters::default());
    }
}
