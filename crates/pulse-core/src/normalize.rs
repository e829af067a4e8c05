//! Pure derivation of display results from raw check outcomes.
//!
//! Deterministic and side-effect free; the same outcome and check type
//! always produce the same normalized result.

use crate::{CheckOutcome, CheckType};
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Round-trip times at or above this are shown as the over-threshold
/// sentinel and demote the check to `bad`.
pub const PING_THRESHOLD_MS: f64 = 100.0;
pub const OVER_THRESHOLD_LABEL: &str = ">99 мс";
pub const NO_TIME_LABEL: &str = "—";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Ok,
    Bad,
    Pending,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Ok => "ok",
            DisplayStatus::Bad => "bad",
            DisplayStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub ok: bool,
    pub display_time: String,
    pub display_status: DisplayStatus,
}

impl NormalizedResult {
    fn ok(display_time: impl Into<String>) -> Self {
        Self {
            ok: true,
            display_time: display_time.into(),
            display_status: DisplayStatus::Ok,
        }
    }

    fn bad(display_time: impl Into<String>) -> Self {
        Self {
            ok: false,
            display_time: display_time.into(),
            display_status: DisplayStatus::Bad,
        }
    }

    fn pending() -> Self {
        Self {
            ok: false,
            display_time: NO_TIME_LABEL.to_string(),
            display_status: DisplayStatus::Pending,
        }
    }
}

pub fn normalize(outcome: &CheckOutcome, check_type: CheckType) -> NormalizedResult {
    if outcome.status.is_success() {
        if check_type == CheckType::Ping {
            return match ping_millis(outcome) {
                Some(millis) if millis < PING_THRESHOLD_MS => {
                    NormalizedResult::ok(format!("{millis:.1} мс"))
                }
                Some(_) => NormalizedResult::bad(OVER_THRESHOLD_LABEL),
                None => NormalizedResult::ok(NO_TIME_LABEL),
            };
        }
        let seconds = outcome.response_time.or(outcome.client_response_time);
        return match seconds {
            Some(seconds) => NormalizedResult::ok(format!("{:.1} мс", seconds * 1000.0)),
            None => NormalizedResult::ok("OK"),
        };
    }
    if outcome.status.is_failure() {
        return NormalizedResult::bad(NO_TIME_LABEL);
    }
    // Non-terminal (or unknown vocabulary) should not normally reach the
    // normalizer; render it as still pending rather than guessing.
    NormalizedResult::pending()
}

/// Round-trip millis for a ping outcome: the server-reported duration wins,
/// otherwise the first time-like match scanned out of the payload text.
pub fn ping_millis(outcome: &CheckOutcome) -> Option<f64> {
    if let Some(seconds) = outcome.response_time {
        return Some(seconds * 1000.0);
    }
    let payload = outcome.data.as_ref()?;
    extract_millis(&flatten_payload(payload))
}

fn extract_millis(text: &str) -> Option<f64> {
    let patterns = [
        Regex::new(r"(?i)time=([0-9.]+)\s*ms").expect("valid regex"),
        Regex::new(r"(?i)time[=:\s]+([0-9.]+)\s*ms").expect("valid regex"),
        Regex::new(r"(?i)время[=:\s]+([0-9.]+)\s*мс").expect("valid regex"),
        Regex::new(r"(?i)([0-9.]+)\s*ms").expect("valid regex"),
    ];

    for pattern in &patterns {
        if let Some(captures) = pattern.captures(text) {
            if let Some(value) = captures.get(1) {
                if let Ok(millis) = value.as_str().parse::<f64>() {
                    return Some(millis);
                }
            }
        }
    }
    None
}

/// Flatten an arbitrary payload into scannable text: a string as-is, else
/// a string `output` field, else a string `data` field, else the payload
/// pretty-printed.
pub fn flatten_payload(payload: &Value) -> String {
    if let Value::String(text) = payload {
        return text.clone();
    }
    for key in ["output", "data"] {
        if let Some(Value::String(text)) = payload.get(key) {
            return text.clone();
        }
    }
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckStatus;
    use serde_json::json;

    fn success_outcome(data: Value) -> CheckOutcome {
        CheckOutcome {
            status: CheckStatus::Ok,
            data: Some(data),
            ..CheckOutcome::default()
        }
    }

    #[test]
    fn fast_ping_time_formats_to_one_decimal() {
        let outcome = success_outcome(json!("64 bytes: time=45.2 ms"));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, "45.2 мс");
        assert_eq!(result.display_status, DisplayStatus::Ok);
        assert!(result.ok);
    }

    #[test]
    fn slow_ping_time_shows_sentinel_and_demotes() {
        let outcome = success_outcome(json!("reply: time=150 ms"));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, OVER_THRESHOLD_LABEL);
        assert_eq!(result.display_status, DisplayStatus::Bad);
        assert!(!result.ok);
    }

    #[test]
    fn server_response_time_wins_over_payload_text() {
        let outcome = CheckOutcome {
            status: CheckStatus::Success,
            response_time: Some(0.012),
            data: Some(json!("time=90 ms")),
            ..CheckOutcome::default()
        };
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, "12.0 мс");
        assert_eq!(result.display_status, DisplayStatus::Ok);
    }

    #[test]
    fn localized_time_pattern_is_scanned() {
        let outcome = success_outcome(json!("ответ: время: 23.5 мс"));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, "23.5 мс");
    }

    #[test]
    fn bare_millis_pattern_is_the_last_resort() {
        let outcome = success_outcome(json!("rtt 31 ms over 4 hops"));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, "31.0 мс");
    }

    #[test]
    fn nested_output_field_is_flattened() {
        let outcome = success_outcome(json!({"output": "time=18.4 ms", "hops": 3}));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, "18.4 мс");
    }

    #[test]
    fn successful_ping_without_time_stays_ok() {
        let outcome = success_outcome(json!({"packets": 4}));
        let result = normalize(&outcome, CheckType::Ping);
        assert_eq!(result.display_time, NO_TIME_LABEL);
        assert_eq!(result.display_status, DisplayStatus::Ok);
    }

    #[test]
    fn non_ping_success_prefers_server_time_then_client_time() {
        let outcome = CheckOutcome {
            status: CheckStatus::Completed,
            response_time: Some(0.25),
            client_response_time: Some(4.0),
            ..CheckOutcome::default()
        };
        assert_eq!(normalize(&outcome, CheckType::Http).display_time, "250.0 мс");

        let outcome = CheckOutcome {
            status: CheckStatus::Completed,
            client_response_time: Some(4.0),
            ..CheckOutcome::default()
        };
        assert_eq!(normalize(&outcome, CheckType::Http).display_time, "4000.0 мс");
    }

    #[test]
    fn non_ping_success_without_any_time_shows_ok_label() {
        let outcome = CheckOutcome {
            status: CheckStatus::Success,
            ..CheckOutcome::default()
        };
        let result = normalize(&outcome, CheckType::Dns);
        assert_eq!(result.display_time, "OK");
        assert_eq!(result.display_status, DisplayStatus::Ok);
    }

    #[test]
    fn failure_statuses_normalize_to_bad() {
        for label in ["fail", "error", "timeout"] {
            let outcome = CheckOutcome {
                status: CheckStatus::from_label(label),
                response_time: Some(0.010),
                ..CheckOutcome::default()
            };
            let result = normalize(&outcome, CheckType::Ping);
            assert_eq!(result.display_time, NO_TIME_LABEL, "{label}");
            assert_eq!(result.display_status, DisplayStatus::Bad, "{label}");
        }
    }

    #[test]
    fn non_terminal_and_unknown_statuses_normalize_to_pending() {
        for label in ["pending", "queued", "half-done"] {
            let outcome = CheckOutcome {
                status: CheckStatus::from_label(label),
                ..CheckOutcome::default()
            };
            let result = normalize(&outcome, CheckType::Full);
            assert_eq!(result.display_status, DisplayStatus::Pending, "{label}");
            assert_eq!(result.display_time, NO_TIME_LABEL, "{label}");
        }
    }

    #[test]
    fn normalize_is_deterministic() {
        let outcome = success_outcome(json!("time=62.0 ms"));
        let first = normalize(&outcome, CheckType::Ping);
        let second = normalize(&outcome, CheckType::Ping);
        assert_eq!(first, second);
    }
}
