//! Authenticated HTTP client for the CheckPulse backend.
//!
//! Everything network-facing goes through [`ApiClient`]: it attaches the
//! session credential to every outgoing request, surfaces failure bodies
//! uniformly, and forces a sign-out when the backend answers an
//! authenticated call with 401/403.

use pulse_core::{presence, PulseError};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub mod checks;
pub mod probes;
pub mod session;

pub use checks::{submit_and_await, CheckBackend, PollConfig};
pub use probes::{PanelEntry, ProbeScheduler, DEFAULT_PANEL_TARGETS};
pub use session::{Credential, Session};

/// Timeout for the one-shot agent-count pull; it substitutes for a live
/// push channel and must fail fast rather than hang the display.
const AGENT_COUNT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    session: Session,
}

impl ApiClient {
    pub fn new(base: Url, session: Session) -> Self {
        Self {
            base: with_trailing_slash(base),
            http: reqwest::Client::new(),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sign in and store the resulting bearer token in the session.
    /// A 401 here means bad credentials, not an expired session, so it is
    /// surfaced as a transport failure without touching stored state.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), PulseError> {
        let url = self.endpoint("login")?;
        let body = serde_json::json!({"username": username, "password": password});
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| PulseError::transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = failure_message(response).await;
            return Err(PulseError::Transport {
                message,
                status: Some(status.as_u16()),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|err| PulseError::transport(err.to_string()))?;
        let token = session::extract_token_text(&text).ok_or_else(|| {
            PulseError::Protocol("login response did not contain a token".to_string())
        })?;
        self.session.login(token);
        Ok(())
    }

    /// Whether the currently stored credential is accepted by the backend.
    /// Any failure, including a network one, means the credential cannot be
    /// trusted; a 401/403 additionally clears it through the usual path.
    pub async fn validate_session(&self) -> bool {
        self.get_json("agents").await.is_ok()
    }

    /// One-shot pull of the online-agent count.
    pub async fn agent_count(&self) -> Result<u64, PulseError> {
        let url = self.endpoint("agents")?;
        let request = self.http.get(url).timeout(AGENT_COUNT_TIMEOUT);
        let body = self.execute_json(request).await?;
        Ok(presence::count_from_pull(&body))
    }

    /// Directory listing for the administrative surface. The admin endpoint
    /// is preferred; the public agents endpoint is the fallback when it is
    /// unavailable (authorization failures are not retried downward).
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, PulseError> {
        let body = match self.get_json("admin").await {
            Ok(body) => body,
            Err(err) if err.is_authorization() => return Err(err),
            Err(err) => {
                debug!("agent_list_fallback: {err}");
                self.get_json("agents").await?
            }
        };
        Ok(decode_agent_listing(&body))
    }

    pub async fn register_agent(
        &self,
        registration: &AgentRegistration,
    ) -> Result<Value, PulseError> {
        let url = self.endpoint("agents/register")?;
        let response = self.execute(self.http.post(url).json(registration)).await?;
        let text = response
            .text()
            .await
            .map_err(|err| PulseError::transport(err.to_string()))?;
        // Any 2xx is a successful registration; the body shape varies.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn delete_agent(&self, id: &str) -> Result<(), PulseError> {
        let url = self.endpoint(&format!("admin/agents/{id}"))?;
        self.execute(self.http.delete(url)).await?;
        Ok(())
    }

    pub(crate) async fn get_json(&self, path: &str) -> Result<Value, PulseError> {
        let url = self.endpoint(path)?;
        self.execute_json(self.http.get(url)).await
    }

    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<Value, PulseError> {
        let url = self.endpoint(path)?;
        self.execute_json(self.http.post(url).json(body)).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, PulseError> {
        self.base
            .join(path)
            .map_err(|err| PulseError::Protocol(format!("invalid endpoint {path}: {err}")))
    }

    async fn execute_json(&self, request: reqwest::RequestBuilder) -> Result<Value, PulseError> {
        let response = self.execute(request).await?;
        response
            .json()
            .await
            .map_err(|err| PulseError::Protocol(format!("undecodable response body: {err}")))
    }

    /// The authenticated transport wrapper: injects the bearer credential
    /// when one is held, and turns an authorization failure on any
    /// authenticated call into a forced sign-out.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PulseError> {
        let bearer = self.session.bearer();
        let authenticated = bearer.is_some();
        let request = match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| PulseError::transport(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            if authenticated {
                self.session.force_logout();
            }
            return Err(PulseError::Authorization {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = failure_message(response).await;
            return Err(PulseError::Transport {
                message,
                status: Some(status.as_u16()),
            });
        }
        Ok(response)
    }
}

/// A directory entry as the admin surface renders it. The backend is loose
/// about field names, so each field falls back through its known aliases.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub desc: String,
    pub status: String,
    pub last_active: Option<String>,
    pub created: Option<String>,
    pub address: Option<String>,
    pub version: Option<String>,
}

impl AgentRecord {
    fn from_value(index: usize, value: &Value) -> Self {
        let fallback_id = format!("agent-{}", index + 1);
        Self {
            id: string_field(value, &["id", "_id"]).unwrap_or(fallback_id),
            name: string_field(value, &["name", "hostname"])
                .unwrap_or_else(|| format!("agent-{}", index + 1)),
            email: string_field(value, &["email", "contact"]).unwrap_or_default(),
            desc: string_field(value, &["desc", "description", "purpose"]).unwrap_or_default(),
            status: string_field(value, &["status", "state"])
                .unwrap_or_else(|| "active".to_string()),
            last_active: string_field(value, &["last_active", "lastActive", "last_seen"]),
            created: string_field(value, &["created_at", "created", "registered"]),
            address: string_field(value, &["ip", "address"]),
            version: string_field(value, &["version"]),
        }
    }
}

/// Registration request for a new monitoring agent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentRegistration {
    pub name: String,
    pub email: String,
    pub desc: String,
}

/// The listing may be a bare array, wrapped under `agents` or `data`, or an
/// object keyed by agent id; precedence in that order.
fn decode_agent_listing(body: &Value) -> Vec<AgentRecord> {
    let items: Vec<&Value> = if let Some(items) = body.as_array() {
        items.iter().collect()
    } else if let Some(items) = body.get("agents").and_then(Value::as_array) {
        items.iter().collect()
    } else if let Some(items) = body.get("data").and_then(Value::as_array) {
        items.iter().collect()
    } else if let Some(object) = body.as_object() {
        object.values().collect()
    } else {
        Vec::new()
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, value)| AgentRecord::from_value(index, value))
        .collect()
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match value.get(key) {
            Some(Value::String(text)) if !text.is_empty() => return Some(text.clone()),
            Some(Value::Number(number)) => return Some(number.to_string()),
            _ => {}
        }
    }
    None
}

/// Uniform failure surfacing: prefer a structured `detail`/`message` field
/// from the body, else the raw body text, else the bare status code.
async fn failure_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<Value>(&text) {
        for key in ["detail", "message"] {
            if let Some(message) = body.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    format!("request failed with status {status}")
}

fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}
