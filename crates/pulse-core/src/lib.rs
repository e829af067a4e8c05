use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub mod error;
pub mod normalize;
pub mod presence;

pub use error::PulseError;

/// The diagnostic check kinds the backend understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Ping,
    Dns,
    Http,
    Traceroute,
    Tcp,
    Full,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Ping => "ping",
            CheckType::Dns => "dns",
            CheckType::Http => "http",
            CheckType::Traceroute => "traceroute",
            CheckType::Tcp => "tcp",
            CheckType::Full => "full",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "ping" => Ok(CheckType::Ping),
            "dns" => Ok(CheckType::Dns),
            "http" => Ok(CheckType::Http),
            "traceroute" => Ok(CheckType::Traceroute),
            "tcp" => Ok(CheckType::Tcp),
            "full" => Ok(CheckType::Full),
            other => Err(format!("Unknown check type: {other}")),
        }
    }
}

/// One diagnostic request. Immutable once submitted; `port` is only
/// meaningful (and required) for TCP checks.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckRequest {
    pub target: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl CheckRequest {
    pub fn new(target: impl Into<String>, check_type: CheckType, port: Option<u16>) -> Self {
        Self {
            target: target.into().trim().to_string(),
            check_type,
            port,
        }
    }

    /// Local pre-flight validation; rejected requests never reach the
    /// network.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.target.is_empty() {
            return Err(PulseError::Validation(
                "target must not be empty".to_string(),
            ));
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err(PulseError::Validation(
                    "port must be between 1 and 65535".to_string(),
                ));
            }
        }
        if self.check_type == CheckType::Tcp && self.port.is_none() {
            return Err(PulseError::Validation(
                "tcp checks require a port".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opaque handle returned by check submission; the only key used to poll.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CheckHandle {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

/// Backend status vocabulary for a check task. Anything the backend
/// reports outside the known set is preserved verbatim in `Other` and
/// treated as terminal: the backend distinguishes exactly two terminal
/// classes, success and failure, and nothing hidden beyond that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pending,
    Queued,
    Ok,
    Completed,
    Success,
    Fail,
    Error,
    Timeout,
    Other(String),
}

impl CheckStatus {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pending" => CheckStatus::Pending,
            "queued" => CheckStatus::Queued,
            "ok" => CheckStatus::Ok,
            "completed" => CheckStatus::Completed,
            "success" => CheckStatus::Success,
            "fail" => CheckStatus::Fail,
            "error" => CheckStatus::Error,
            "timeout" => CheckStatus::Timeout,
            _ => CheckStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Queued => "queued",
            CheckStatus::Ok => "ok",
            CheckStatus::Completed => "completed",
            CheckStatus::Success => "success",
            CheckStatus::Fail => "fail",
            CheckStatus::Error => "error",
            CheckStatus::Timeout => "timeout",
            CheckStatus::Other(raw) => raw,
        }
    }

    /// Anything other than pending/queued ends the poll loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckStatus::Pending | CheckStatus::Queued)
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CheckStatus::Ok | CheckStatus::Completed | CheckStatus::Success
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CheckStatus::Fail | CheckStatus::Error | CheckStatus::Timeout
        )
    }
}

impl Default for CheckStatus {
    fn default() -> Self {
        CheckStatus::Pending
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CheckStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CheckStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(CheckStatus::from_label(&raw))
    }
}

/// The polled state of a check task, decoded tolerantly: every field the
/// backend may omit, rename, or retype stays optional, and unknown fields
/// are retained in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckOutcome {
    #[serde(default)]
    pub status: CheckStatus,
    /// Server-measured duration in seconds, when the backend reports one.
    #[serde(default, deserialize_with = "deserialize_opt_f64")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    /// Wall-clock seconds measured by the client around the whole
    /// submit-and-poll cycle; attached locally, never sent by the backend.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_response_time: Option<f64>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_opt_stringish")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_stringish")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_stringish")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckOutcome {
    /// Terminal error outcome for a call that failed before or instead of
    /// producing a backend result.
    pub fn from_error(error: &PulseError) -> Self {
        let http_status = match error {
            PulseError::Transport { status, .. } => *status,
            PulseError::Authorization { status } => Some(*status),
            _ => None,
        };
        Self {
            status: CheckStatus::Error,
            error: Some(error.to_string()),
            http_status,
            ..Self::default()
        }
    }

    /// Synthesized terminal outcome for an exhausted poll budget; keeps
    /// whatever fields the last response carried.
    pub fn into_timeout(mut self, message: impl Into<String>) -> Self {
        self.status = CheckStatus::Timeout;
        self.error = Some(message.into());
        self
    }

    pub fn with_client_time(mut self, seconds: f64) -> Self {
        self.client_response_time = Some(seconds);
        self
    }
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_opt_stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom(
            "expected string or number",
        )),
    }
}

fn deserialize_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("expected number for duration")),
    }
}
