//! Override rules file.
//!
//! The rules live in a JSON document of the form `{ "overrides": [ ... ] }`.
//! Unknown fields are ignored and optional fields take the defaults documented
//! on each field, so hand-written files stay terse.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A find/replace applied to a response body, in declaration order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BodyReplacement {
    pub find: String,
    #[serde(default)]
    pub replace: String,
    /// Treat `find` as a regular expression instead of a literal substring.
    #[serde(default)]
    pub is_regex: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverrideRule {
    /// Rule name, used in logs and the stats document.
    pub name: String,
    /// HTTP method filter; `*` matches any method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Matched against `path?query`: literal substring, or a regular
    /// expression when `is_regex` is set.
    pub url_pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    /// Status code for mocked responses.
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Response headers for mocked responses.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Mock body loaded from a file. Mutually exclusive with `body_text`;
    /// when both are set the file wins.
    #[serde(default)]
    pub body_file: String,
    /// Mock body given inline.
    #[serde(default)]
    pub body_text: String,
    /// Replacements applied to the response body. A rule with replacements
    /// but no body rewrites the proxied origin response instead of mocking.
    #[serde(default)]
    pub body_replacements: Vec<BodyReplacement>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Number of matching requests to let through before the rule fires.
    #[serde(default)]
    pub trigger_after: u64,
    /// Maximum number of firings; values <= 0 mean unbounded.
    #[serde(default = "default_max_triggers")]
    pub max_triggers: i64,
    /// Reset both counters once this many matching requests were seen;
    /// 0 disables the reset.
    #[serde(default)]
    pub reset_after: u64,
}

impl OverrideRule {
    /// Whether the rule mocks a full response rather than rewriting one.
    pub fn has_body(&self) -> bool {
        !self.body_file.is_empty() || !self.body_text.is_empty()
    }
}

fn default_method() -> String {
    "*".to_string()
}

fn default_status_code() -> u16 {
    200
}

fn default_enabled() -> bool {
    true
}

fn default_max_triggers() -> i64 {
    -1
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OverrideFile {
    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
}

impl OverrideFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: OverrideFile = serde_json::from_str(&contents)?;
        Ok(file)
    }

    /// Load the rules file, generating an example when it does not exist.
    /// Unreadable or malformed files degrade to an empty rule set.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            if let Err(e) = create_example_config(path) {
                warn!(path = %path.display(), error = %e, "failed to write example config");
            }
        }
        match Self::load(path) {
            Ok(file) => {
                info!(path = %path.display(), rules = file.overrides.len(), "loaded override config");
                file
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load override config, continuing without rules");
                Self::default()
            }
        }
    }
}

/// Write an example rules file plus a sample body file next to it. The
/// sample lands in a `responses/` directory beside the config file, so the
/// generated rule works wherever the config lives.
pub fn create_example_config(path: &Path) -> anyhow::Result<()> {
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let sample_file = base.join("responses").join("bindings.json");

    let example = OverrideFile {
        overrides: vec![
            OverrideRule {
                name: "bindings - fires after 3 requests".to_string(),
                method: "*".to_string(),
                url_pattern: "/bindings".to_string(),
                is_regex: false,
                status_code: 200,
                headers: HashMap::from([
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("X-Custom".to_string(), "overridden-after-3-requests".to_string()),
                ]),
                body_file: sample_file.to_string_lossy().into_owned(),
                body_text: String::new(),
                body_replacements: Vec::new(),
                enabled: true,
                trigger_after: 3,
                max_triggers: 2,
                reset_after: 10,
            },
            OverrideRule {
                name: "api users - immediate mock".to_string(),
                method: "GET".to_string(),
                url_pattern: r"/api/users/\d+".to_string(),
                is_regex: true,
                status_code: 200,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                body_file: String::new(),
                body_text: r#"{"id": 123, "name": "Mock User", "email": "mock@example.com", "mocked": true}"#
                    .to_string(),
                body_replacements: Vec::new(),
                enabled: false,
                trigger_after: 0,
                max_triggers: -1,
                reset_after: 0,
            },
            OverrideRule {
                name: "error simulation - after 5 requests".to_string(),
                method: "POST".to_string(),
                url_pattern: "/api/submit".to_string(),
                is_regex: false,
                status_code: 500,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                body_file: String::new(),
                body_text: r#"{"error": "Simulated server error after 5 requests", "code": "MOCK_ERROR"}"#
                    .to_string(),
                body_replacements: Vec::new(),
                enabled: false,
                trigger_after: 5,
                max_triggers: 1,
                reset_after: 0,
            },
        ],
    };

    std::fs::write(path, serde_json::to_string_pretty(&example)?)?;
    info!(path = %path.display(), "created example override config");

    std::fs::create_dir_all(base.join("responses"))?;
    let sample = serde_json::json!({
        "status": "success",
        "data": {
            "bindings": [
                {"id": 1, "name": "binding1", "type": "primary"},
                {"id": 2, "name": "binding2", "type": "secondary"},
                {"id": 3, "name": "binding3", "type": "primary"},
            ],
            "total": 3,
        },
        "message": "Mocked response served from file after N matching requests",
    });
    std::fs::write(&sample_file, serde_json::to_string_pretty(&sample)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_with_defaults() {
        let json = r#"{
            "overrides": [
                {"name": "minimal", "url_pattern": "/api"}
            ]
        }"#;
        let file: OverrideFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.overrides.len(), 1);

        let rule = &file.overrides[0];
        assert_eq!(rule.method, "*");
        assert_eq!(rule.status_code, 200);
        assert!(rule.enabled);
        assert!(!rule.is_regex);
        assert_eq!(rule.trigger_after, 0);
        assert_eq!(rule.max_triggers, -1);
        assert_eq!(rule.reset_after, 0);
        assert!(!rule.has_body());
    }

    #[test]
    fn test_parse_full_rule() {
        let json = r#"{
            "overrides": [{
                "name": "users mock",
                "method": "GET",
                "url_pattern": "/api/users/\\d+",
                "is_regex": true,
                "status_code": 503,
                "headers": {"Content-Type": "application/json"},
                "body_text": "{\"mocked\": true}",
                "body_replacements": [
                    {"find": "mocked", "replace": "rewritten"}
                ],
                "trigger_after": 3,
                "max_triggers": 2,
                "reset_after": 10,
                "enabled": true
            }]
        }"#;
        let file: OverrideFile = serde_json::from_str(json).unwrap();
        let rule = &file.overrides[0];
        assert!(rule.is_regex);
        assert_eq!(rule.status_code, 503);
        assert!(rule.has_body());
        assert_eq!(rule.body_replacements.len(), 1);
        assert_eq!(rule.body_replacements[0].find, "mocked");
        assert_eq!(rule.trigger_after, 3);
        assert_eq!(rule.max_triggers, 2);
        assert_eq!(rule.reset_after, 10);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "overrides": [
                {"name": "n", "url_pattern": "/x", "some_future_field": 42}
            ],
            "version": "3"
        }"#;
        let file: OverrideFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.overrides.len(), 1);
    }

    #[test]
    fn test_load_or_default_generates_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");

        let file = OverrideFile::load_or_default(&path);
        assert!(path.exists());
        assert_eq!(file.overrides.len(), 3);
        assert!(file.overrides[0].enabled);

        // The generated rule points at a sample body file next to the config.
        let sample = std::path::Path::new(&file.overrides[0].body_file);
        assert!(sample.exists());
        assert!(sample.starts_with(dir.path()));
    }

    #[test]
    fn test_load_or_default_survives_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let file = OverrideFile::load_or_default(&path);
        assert!(file.overrides.is_empty());
    }
}
