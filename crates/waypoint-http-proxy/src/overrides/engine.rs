//! First-match rule selection with counter accounting.

use hyper::Method;
use serde::Serialize;
use tracing::{debug, info};

use super::matcher::CompiledOverride;
use crate::config::OverrideFile;

/// The rule table. Built once at startup; per-rule counters are the only
/// mutable state and are guarded by each rule's own lock.
pub struct OverrideEngine {
    rules: Vec<CompiledOverride>,
}

/// Point-in-time view of a rule for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideStats {
    pub name: String,
    pub enabled: bool,
    pub url_pattern: String,
    pub method: String,
    pub trigger_after: u64,
    pub max_triggers: i64,
    pub reset_after: u64,
    pub request_count: u64,
    pub trigger_count: u64,
}

impl OverrideEngine {
    pub fn from_config(file: OverrideFile) -> Self {
        let rules = file
            .overrides
            .into_iter()
            .map(CompiledOverride::compile)
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.is_enabled()).count()
    }

    /// Stateful selection: walk the rules in declaration order and return the
    /// first one that matches and is authorized to fire.
    ///
    /// Counter accounting happens under the matched rule's lock:
    /// every match bumps `request_count`; reaching `reset_after` zeroes both
    /// counters, releases the match and moves on to the next rule; a match
    /// below the `trigger_after` threshold or past `max_triggers` consumes
    /// the request without firing.
    pub fn select(&self, method: &Method, full_url: &str) -> Option<&CompiledOverride> {
        for rule in &self.rules {
            if !rule.is_enabled() || !rule.matches(method, full_url) {
                continue;
            }

            let mut counters = rule.counters().lock();
            counters.request_count += 1;

            if rule.rule.reset_after > 0 && counters.request_count >= rule.rule.reset_after {
                info!(
                    rule = %rule.rule.name,
                    after = rule.rule.reset_after,
                    "request counters reset"
                );
                counters.request_count = 0;
                counters.trigger_count = 0;
                continue;
            }

            let mut should_fire = counters.request_count > rule.rule.trigger_after;
            if rule.rule.max_triggers > 0
                && counters.trigger_count >= rule.rule.max_triggers as u64
            {
                should_fire = false;
            }

            if should_fire {
                counters.trigger_count += 1;
                info!(
                    rule = %rule.rule.name,
                    request = counters.request_count,
                    trigger = counters.trigger_count,
                    "rule fired"
                );
                return Some(rule);
            }

            debug!(
                rule = %rule.rule.name,
                request = counters.request_count,
                needed = rule.rule.trigger_after + 1,
                "rule matched but did not fire"
            );
            return None;
        }
        None
    }

    /// Counter-free selection used after a forward: the first enabled rule
    /// that matches and carries body replacements.
    pub fn select_for_rewrite(&self, method: &Method, full_url: &str) -> Option<&CompiledOverride> {
        self.rules.iter().find(|rule| {
            rule.is_enabled()
                && !rule.replacements.is_empty()
                && rule.matches(method, full_url)
        })
    }

    pub fn stats(&self) -> Vec<OverrideStats> {
        self.rules
            .iter()
            .map(|rule| {
                let counters = rule.snapshot_counters();
                OverrideStats {
                    name: rule.rule.name.clone(),
                    enabled: rule.is_enabled(),
                    url_pattern: rule.rule.url_pattern.clone(),
                    method: rule.rule.method.clone(),
                    trigger_after: rule.rule.trigger_after,
                    max_triggers: rule.rule.max_triggers,
                    reset_after: rule.rule.reset_after,
                    request_count: counters.request_count,
                    trigger_count: counters.trigger_count,
                }
            })
            .collect()
    }
}
