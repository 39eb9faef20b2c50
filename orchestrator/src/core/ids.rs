//! Deterministic identifiers and content hashing.
//!
//! Every id derived here is a pure function of its input: two processes given
//! the same payload compute the same id without coordination.

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of the hex digest prefix used in short ids.
const SHORT_HASH_LEN: usize = 16;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialize JSON with object keys sorted and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash of the canonical JSON form of `payload`.
pub fn content_hash<T: Serialize>(payload: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(payload)?;
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

/// `<prefix>-<short hash>` over the canonical payload.
pub fn deterministic_id<T: Serialize>(prefix: &str, payload: &T) -> serde_json::Result<String> {
    let hash = content_hash(payload)?;
    Ok(format!("{prefix}-{}", &hash[..SHORT_HASH_LEN]))
}

/// Candidate id for a sequence. Case and surrounding whitespace do not matter.
pub fn candidate_id_for(sequence: &str) -> String {
    let normalized = sequence.trim().to_ascii_uppercase();
    let hash = sha256_hex(normalized.as_bytes());
    format!("cand-{}", &hash[..SHORT_HASH_LEN])
}

/// Why an id cannot be used as a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdProblem {
    Empty,
    /// Contains a separator or a parent-directory segment.
    Traversal,
    /// Contains characters outside `[A-Za-z0-9._-]`.
    Charset,
}

/// Check that `id` can be used as a single filesystem path segment.
pub fn id_problem(id: &str) -> Option<IdProblem> {
    if id.is_empty() {
        return Some(IdProblem::Empty);
    }
    if id == "." || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Some(IdProblem::Traversal);
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Some(IdProblem::Charset);
    }
    None
}

/// Validate a run id for use as a workspace directory name.
pub fn validate_id(id: &str) -> Result<()> {
    match id_problem(id) {
        None => Ok(()),
        Some(IdProblem::Empty) => Err(anyhow!("id must not be empty")),
        Some(IdProblem::Traversal) => Err(anyhow!("id must not contain path segments (got '{id}')")),
        Some(IdProblem::Charset) => Err(anyhow!("id must be [A-Za-z0-9._-] only (got '{id}')")),
    }
}
