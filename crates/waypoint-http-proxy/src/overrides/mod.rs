//! Response override rules.
//!
//! A rule matches on method and URL and either mocks a full response or
//! rewrites the origin's response body. Rules carry stateful counters
//! (`trigger_after`, `max_triggers`, `reset_after`) so a rule can stay dormant
//! for the first N matching requests, fire a bounded number of times and then
//! recycle.
//!
//! # Module Structure
//!
//! - `matcher` - per-rule compiled matcher (method filter + URL pattern)
//! - `engine` - first-match selection with counter accounting
//! - `rewrite` - compiled body replacements

mod engine;
mod matcher;
mod rewrite;

pub use engine::{OverrideEngine, OverrideStats};
pub use matcher::{CompiledOverride, Counters};
pub use rewrite::{apply_replacements, CompiledReplacement};
