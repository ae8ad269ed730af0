use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use groups_client::{ClientConfig, DEFAULT_API_URL, RefreshPolicy};

const DEFAULT_SESSION_FILE: &str = ".groups_session.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub session_file: PathBuf,
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
    pub refresh_policy: RefreshPolicy,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = non_blank(lookup("GROUPS_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let session_file = non_blank(lookup("GROUPS_SESSION_FILE"))
            .unwrap_or_else(|| DEFAULT_SESSION_FILE.to_string())
            .into();
        let http_connect_timeout_secs =
            parse_u64(&lookup, "HTTP_CONNECT_TIMEOUT_SECS", 5)?;
        let http_request_timeout_secs =
            parse_u64(&lookup, "HTTP_REQUEST_TIMEOUT_SECS", 15)?;
        let refresh_policy = match non_blank(lookup("GROUPS_REFRESH_POLICY")) {
            Some(raw) => raw
                .parse::<RefreshPolicy>()
                .map_err(|e| anyhow!("GROUPS_REFRESH_POLICY: {e}"))?,
            None => RefreshPolicy::default(),
        };
        let log_level = non_blank(lookup("LOG_LEVEL")).unwrap_or_else(|| "warn".to_string());

        Ok(Self {
            api_url,
            session_file,
            http_connect_timeout_secs,
            http_request_timeout_secs,
            refresh_policy,
            log_level,
        })
    }

    /// `server` из `--server` перекрывает `GROUPS_API_URL`.
    pub fn client_config(&self, server: Option<String>) -> ClientConfig {
        let base_url = server
            .map(normalize_server)
            .unwrap_or_else(|| self.api_url.clone());
        ClientConfig {
            base_url,
            connect_timeout: Duration::from_secs(self.http_connect_timeout_secs),
            request_timeout: Duration::from_secs(self.http_request_timeout_secs),
            refresh_policy: self.refresh_policy,
        }
    }
}

pub fn normalize_server(server: String) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        return server;
    }

    format!("http://{server}")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    let value = non_blank(lookup(key))
        .unwrap_or_else(|| default.to_string())
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == 0 {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}
