//! Resource identifiers

use regex::Regex;
use std::sync::LazyLock;

/// Longest id a resource may carry
pub const MAX_ID_LENGTH: usize = 64;

/// Characters kept from the end of an over-long id
const KEPT_TAIL: usize = 55;

static INVALID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^_0-9a-zA-Z]+").unwrap());

/// `{project}_{stack}_{type}_{name}` with every run of characters outside
/// `[_0-9a-zA-Z]` replaced by `_`
///
/// Ids longer than [`MAX_ID_LENGTH`] keep their last characters and end with
/// an 8-digit hash of the full id, so distinct long ids stay distinct.
pub fn resource_id(project: &str, stack: &str, resource_type: &str, name: &str) -> String {
    let raw = format!("{}_{}_{}_{}", project, stack, resource_type, name);
    let id = INVALID.replace_all(&raw, "_").into_owned();
    if id.len() <= MAX_ID_LENGTH {
        return id;
    }

    let hash = blake3::hash(id.as_bytes()).to_hex();
    // the sanitized id is ASCII, any byte offset is a char boundary
    let tail = &id[id.len() - KEPT_TAIL..];
    format!("{}_{}", tail, &hash.as_str()[..8])
}
