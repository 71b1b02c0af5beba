//! Body replacements.
//!
//! Replacements run in declaration order over the decompressed body. Literal
//! patterns are byte-substring replace-all; regex patterns use a pre-compiled
//! global replacement. Operating on bytes keeps non-UTF-8 bodies intact.

use regex::bytes::Regex;
use tracing::{debug, warn};

use crate::config::BodyReplacement;

pub struct CompiledReplacement {
    pub find: String,
    pub replace: String,
    pub is_regex: bool,
    regex: Option<Regex>,
}

impl CompiledReplacement {
    /// Compile a replacement. A regex that fails to compile leaves the
    /// replacement inert (it applies nothing) instead of failing the rule.
    pub fn compile(cfg: &BodyReplacement) -> Self {
        let regex = if cfg.is_regex {
            match Regex::new(&cfg.find) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %cfg.find, error = %e, "invalid replacement regex");
                    None
                }
            }
        } else {
            None
        };
        Self {
            find: cfg.find.clone(),
            replace: cfg.replace.clone(),
            is_regex: cfg.is_regex,
            regex,
        }
    }
}

/// Apply all replacements in order, reporting match counts per replacement.
/// A replacement with no matches is a no-op.
pub fn apply_replacements(body: &[u8], replacements: &[CompiledReplacement]) -> Vec<u8> {
    let mut result = body.to_vec();
    let mut applied = 0usize;

    for (index, replacement) in replacements.iter().enumerate() {
        let (next, matches) = if replacement.is_regex {
            match &replacement.regex {
                Some(regex) => {
                    let matches = regex.find_iter(&result).count();
                    let next = regex
                        .replace_all(&result, replacement.replace.as_bytes())
                        .into_owned();
                    (next, matches)
                }
                // Failed to compile at load time.
                None => (result.clone(), 0),
            }
        } else {
            replace_all_literal(
                &result,
                replacement.find.as_bytes(),
                replacement.replace.as_bytes(),
            )
        };

        debug!(
            index = index + 1,
            find = %replacement.find,
            matches,
            before = result.len(),
            after = next.len(),
            "body replacement"
        );

        if matches > 0 {
            applied += 1;
        }
        result = next;
    }

    if applied > 0 {
        debug!(applied, total = replacements.len(), "body replacements applied");
    }
    result
}

fn replace_all_literal(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> (Vec<u8>, usize) {
    if needle.is_empty() || haystack.is_empty() {
        return (haystack.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut count = 0usize;
    let mut i = 0usize;
    while i < haystack.len() {
        if i + needle.len() <= haystack.len() && &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
            count += 1;
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    (out, count)
}
