//! Per-record credential merge rule.
//!
//! Applied in both sync directions with `base` = the destination record and
//! `overlay` = the record carrying new information:
//!
//! 1. Every top-level key other than [`SERVER_MAP_KEY`] is taken from the
//!    overlay when the overlay has it.
//! 2. The per-server map is the union of both sides. A server present on both
//!    sides keeps whichever record has the greater `expiresAt`; ties go to the
//!    overlay. A record without a numeric `expiresAt` ranks below any record
//!    that has one.
//! 3. `changed` is true iff the serialized merge differs byte-for-byte from
//!    the re-serialized base.
//!
//! The rule is idempotent (`merge(a, a)` never reports a change) and never
//! replaces a per-server record with one that expires earlier.

use super::{ACCOUNT_OAUTH_KEY, EXPIRES_AT_KEY, SERVER_MAP_KEY};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a merge attempt was abandoned. Neither side is modified.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{side} credential record is not valid JSON: {source}")]
    InvalidJson {
        side: &'static str,
        source: serde_json::Error,
    },

    #[error("{side} credential record is not a JSON object")]
    NotAnObject { side: &'static str },
}

/// Result of merging two credential records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Serialized merged record.
    pub merged: String,
    /// `true` when `merged` differs from the normalized base.
    pub changed: bool,
}

/// Merge `overlay` into `base`.
///
/// An empty or whitespace-only `base` is treated as `{}` so that the first
/// write into an empty shared store goes through the same path.
pub fn merge_credentials(base: &str, overlay: &str) -> Result<MergeOutcome, MergeError> {
    let base = parse_object(base, "base")?;
    let overlay = parse_object(overlay, "overlay")?;

    let normalized_base = Value::Object(base.clone()).to_string();

    let mut merged = base;
    for (key, overlay_value) in overlay {
        if key == SERVER_MAP_KEY {
            let combined = merge_server_maps(merged.get(&key), overlay_value);
            merged.insert(key, combined);
        } else {
            merged.insert(key, overlay_value);
        }
    }

    let merged = Value::Object(merged).to_string();
    let changed = merged != normalized_base;
    Ok(MergeOutcome { merged, changed })
}

/// Expiry of the agent's own OAuth token (`claudeAiOauth.expiresAt`, epoch
/// milliseconds), if the record carries one.
pub fn token_expiry_millis(blob: &str) -> Option<i64> {
    let value: Value = serde_json::from_str(blob).ok()?;
    let expires = value.get(ACCOUNT_OAUTH_KEY)?.get(EXPIRES_AT_KEY)?;
    expires
        .as_i64()
        .or_else(|| expires.as_f64().map(|f| f as i64))
}

fn parse_object(raw: &str, side: &'static str) -> Result<Map<String, Value>, MergeError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MergeError::NotAnObject { side }),
        Err(source) => Err(MergeError::InvalidJson { side, source }),
    }
}

fn merge_server_maps(base: Option<&Value>, overlay: Value) -> Value {
    let (base_map, overlay_map) = match (base, overlay) {
        (Some(Value::Object(b)), Value::Object(o)) => (b.clone(), o),
        // A malformed map on the overlay side never clobbers a good one.
        (Some(b @ Value::Object(_)), _) => return b.clone(),
        (_, overlay) => return overlay,
    };

    let mut result = base_map;
    for (server, overlay_record) in overlay_map {
        let keep_base = result
            .get(&server)
            .is_some_and(|existing| expires_at(existing) > expires_at(&overlay_record));
        if !keep_base {
            result.insert(server, overlay_record);
        }
    }
    Value::Object(result)
}

fn expires_at(record: &Value) -> Option<f64> {
    record.get(EXPIRES_AT_KEY).and_then(Value::as_f64)
}
