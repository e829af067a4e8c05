//! Bearer-credential session gate.
//!
//! The credential lives in a single watch channel so any number of views
//! can observe sign-in state; writes happen only through `login`/`logout`
//! (and the transport wrapper's forced variant on authorization failure).

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

pub const BEARER_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
}

impl Credential {
    pub fn header_value(&self) -> String {
        format!("{BEARER_SCHEME} {}", self.token)
    }
}

#[derive(Clone)]
pub struct Session {
    tx: watch::Sender<Option<Credential>>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.login(token);
        session
    }

    pub fn login(&self, token: impl Into<String>) {
        self.tx.send_replace(Some(Credential {
            token: token.into(),
        }));
    }

    /// Unconditional and idempotent.
    pub fn logout(&self) {
        self.tx.send_replace(None);
    }

    /// Logout triggered by an authorization failure on an authenticated
    /// call. Clears at most once; repeated failures are no-ops.
    pub fn force_logout(&self) {
        let previous = self.tx.send_replace(None);
        if previous.is_some() {
            info!("session_cleared: authorization failure");
        }
    }

    pub fn bearer(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|cred| cred.token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Observe credential changes; receivers see `None` after any logout,
    /// which is the cue to route back to the sign-in surface.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Token extraction from a login response body: `access_token`, `token`,
/// `jwt`, then the body itself when it is a bare string.
pub fn extract_token(body: &Value) -> Option<String> {
    for key in ["access_token", "token", "jwt"] {
        if let Some(token) = body.get(key).and_then(Value::as_str) {
            return Some(token.to_string());
        }
    }
    body.as_str().map(|token| token.to_string())
}

/// Like [`extract_token`], but accepts a raw body that may not be JSON at
/// all, in which case the trimmed text itself is the token.
pub fn extract_token_text(text: &str) -> Option<String> {
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        return extract_token(&body);
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
