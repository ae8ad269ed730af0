use std::time::Duration;

/// Базовый адрес API по умолчанию.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Что делать, когда сервер отвечает 401 на запрос с access token.
pub enum RefreshPolicy {
    /// Один раз обновить токен (single-flight) и повторить исходный запрос.
    #[default]
    RetryOnce,
    /// Вернуть ошибку как есть; вызывающий сам решает про `silent_refresh`.
    Never,
}

impl std::str::FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "retry" | "retry_once" | "retry-once" => Ok(Self::RetryOnce),
            "never" | "off" => Ok(Self::Never),
            other => Err(format!("unknown refresh policy '{other}', expected 'retry' or 'never'")),
        }
    }
}

#[derive(Debug, Clone)]
/// Настройки клиента.
pub struct ClientConfig {
    /// Базовый URL API, например `http://127.0.0.1:8000/api/`.
    pub base_url: String,
    /// Таймаут установки соединения.
    pub connect_timeout: Duration,
    /// Таймаут всего запроса.
    pub request_timeout: Duration,
    /// Политика повтора после 401.
    pub refresh_policy: RefreshPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            refresh_policy: RefreshPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Настройки по умолчанию с другим базовым URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}
