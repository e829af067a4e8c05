use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://checkpulse.ru/api";
pub const DEFAULT_WS_URL: &str = "wss://checkpulse.ru/ws/onlineag";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: Url,
    pub ws_url: Url,
    pub token_path: PathBuf,
}

impl Settings {
    /// Flags win over environment, environment over defaults.
    pub fn resolve(api_flag: Option<String>, ws_flag: Option<String>) -> Result<Self> {
        let api_raw = api_flag
            .or_else(|| env::var("PULSE_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let ws_raw = ws_flag
            .or_else(|| env::var("PULSE_WS_URL").ok())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        Ok(Self {
            api_url: Url::parse(&api_raw).with_context(|| format!("invalid API URL: {api_raw}"))?,
            ws_url: Url::parse(&ws_raw).with_context(|| format!("invalid WS URL: {ws_raw}"))?,
            token_path: token_path(),
        })
    }
}

fn token_path() -> PathBuf {
    if let Ok(path) = env::var("PULSE_TOKEN_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("checkpulse/token")
}

fn config_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    home_dir().join(".config")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn load_token(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let token = contents.trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn save_token(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, token).with_context(|| format!("failed to write {}", path.display()))
}

pub fn clear_token(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}
