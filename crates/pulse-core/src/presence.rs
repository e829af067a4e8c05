//! Ordered decoders for agent-count payloads.
//!
//! The backend is not consistent about how it reports the online-agent
//! count, so both the push-channel frames and the REST fallback are decoded
//! by explicit precedence rather than a fixed schema. The order below is
//! the contract; callers must not re-sniff shapes themselves.

use regex::Regex;
use serde_json::Value;

/// Decode a raw push-channel frame. Precedence: JSON payload via
/// [`count_from_push`], then the whole text as a bare integer, then the
/// first integer substring anywhere in the text.
pub fn count_from_frame(text: &str) -> Option<u64> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return count_from_push(&value);
    }
    if let Ok(count) = text.trim().parse::<u64>() {
        return Some(count);
    }
    first_integer(text)
}

/// Decode a parsed push payload. Key precedence: `online_count`, `count`,
/// `total`, `online`, `agents` (array length or number), a numeric
/// `message`, then the first numeric-valued field in key order.
pub fn count_from_push(value: &Value) -> Option<u64> {
    if let Some(count) = value.as_u64() {
        return Some(count);
    }
    let object = value.as_object()?;
    for key in ["online_count", "count", "total", "online"] {
        if let Some(count) = object.get(key).and_then(Value::as_u64) {
            return Some(count);
        }
    }
    if let Some(agents) = object.get("agents") {
        if let Some(items) = agents.as_array() {
            return Some(items.len() as u64);
        }
        if let Some(count) = agents.as_u64() {
            return Some(count);
        }
    }
    if let Some(count) = object.get("message").and_then(Value::as_u64) {
        return Some(count);
    }
    object.values().find_map(Value::as_u64)
}

/// Decode the REST fallback body: an array is its own length, an object
/// yields `count`, `agents` (array length or number), `total`, or its
/// key count as the last resort.
pub fn count_from_pull(value: &Value) -> u64 {
    if let Some(items) = value.as_array() {
        return items.len() as u64;
    }
    if let Some(object) = value.as_object() {
        if let Some(count) = object.get("count").and_then(Value::as_u64) {
            return count;
        }
        if let Some(agents) = object.get("agents") {
            if let Some(items) = agents.as_array() {
                return items.len() as u64;
            }
            if let Some(count) = agents.as_u64() {
                return count;
            }
        }
        if let Some(count) = object.get("total").and_then(Value::as_u64) {
            return count;
        }
        return object.len() as u64;
    }
    value.as_u64().unwrap_or(0)
}

fn first_integer(text: &str) -> Option<u64> {
    let pattern = Regex::new(r"[0-9]+").expect("valid regex");
    pattern
        .find(text)
        .and_then(|found| found.as_str().parse::<u64>().ok())
}
