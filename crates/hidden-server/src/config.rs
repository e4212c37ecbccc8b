//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use hidden_chat::ChatSettings;
use hidden_shared::constants::{DEFAULT_HTTP_PORT, MAX_MESSAGE_LEN, ONLINE_WINDOW_SECS};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `hidden.db` in the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Presence window in seconds.
    /// Env: `ONLINE_WINDOW_SECS`
    pub online_window_secs: i64,

    /// Longest accepted text message, in characters.
    /// Env: `MAX_MESSAGE_LEN`
    pub max_message_len: usize,

    /// Allow any origin, method and header.
    /// Env: `CORS_PERMISSIVE` (true/false)
    /// Default: `true`
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            online_window_secs: ONLINE_WINDOW_SECS,
            max_message_len: MAX_MESSAGE_LEN,
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("ONLINE_WINDOW_SECS") {
            match val.parse::<i64>() {
                Ok(secs) if secs > 0 => config.online_window_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid ONLINE_WINDOW_SECS, using default"),
            }
        }

        if let Some(val) = lookup("MAX_MESSAGE_LEN") {
            match val.parse::<usize>() {
                Ok(len) if len > 0 => config.max_message_len = len,
                _ => tracing::warn!(value = %val, "Invalid MAX_MESSAGE_LEN, using default"),
            }
        }

        if let Some(val) = lookup("CORS_PERMISSIVE") {
            config.cors_permissive = val != "false" && val != "0";
        }

        config
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            online_window: chrono::Duration::seconds(self.online_window_secs),
            max_message_len: self.max_message_len,
        }
    }
}
