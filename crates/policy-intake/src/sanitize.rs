//! Helpers for sanitizing data before it enters log records and span fields.
//!
//! Owner ids and raw document or model text are personal data; logs carry
//! a short correlation hash or a bounded snippet instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const SNIPPET_CHARS: usize = 120;

/// Returns a short deterministic hash of an identifier for correlation
/// without exposing it.
pub fn hash_id(id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// Truncates text to a bounded single-line snippet.
pub fn snippet(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
    format!("{}…", cut)
}
