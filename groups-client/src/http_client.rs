use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::HttpError;

#[derive(Debug, Clone)]
/// Запрос к REST API в нормализованном виде.
pub struct ApiRequest {
    /// HTTP-метод.
    pub method: Method,
    /// Путь относительно базового адреса или абсолютная ссылка-курсор.
    pub path: String,
    /// Query-параметры.
    pub query: Vec<(String, String)>,
    /// JSON-тело.
    pub body: Option<Value>,
    /// Access token для заголовка `Authorization: Bearer`.
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// Запрос без тела, query и токена.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    /// Добавляет JSON-тело.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Добавляет query-параметры.
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

#[derive(Debug, Clone)]
/// Ответ сервера: статус и тело, приведённое к JSON.
pub struct ApiResponse {
    /// HTTP-статус.
    pub status: u16,
    /// Тело: JSON или `Null` для пустого и не-JSON ответа.
    pub body: Value,
}

impl ApiResponse {
    /// Ответ с JSON-телом.
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// `true` для статусов 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub(crate) fn into_result(self) -> Result<Value, HttpError> {
        if self.is_success() {
            return Ok(self.body);
        }
        Err(HttpError::from_status(self.status, &self.body))
    }
}

/// Транспорт, через который клиент ходит в REST API.
///
/// Транспорт не ретраит запросы и не трогает сессию: он только отправляет
/// запрос и возвращает статус с телом. Не-2xx ответ не считается ошибкой
/// транспорта.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Отправляет запрос.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError>;
}

#[derive(Debug, Clone)]
/// Транспорт поверх `reqwest`.
pub struct ReqwestTransport {
    base_url: String,
    client: Client,
}

impl ReqwestTransport {
    /// Создаёт транспорт с базовым URL и таймаутами из конфигурации.
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        Url::parse(&config.base_url)
            .map_err(|err| HttpError::InvalidUrl(format!("{}: {err}", config.base_url)))?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| HttpError::Network(err.to_string()))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
        })
    }

    /// Базовый URL API.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let url = resolve_endpoint(&self.base_url, &request.path)?;
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self.client.request(request.method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| HttpError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| HttpError::Network(err.to_string()))?;

        debug!(status, "response received");
        Ok(ApiResponse::json(status, parse_body(&text)))
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|err| {
        debug!(error = %err, len = text.len(), "response body is not JSON");
        Value::Null
    })
}

/// Строит полный URL запроса.
///
/// Относительный путь склеивается с базовым адресом. Абсолютная ссылка
/// (курсор пагинации) принимается только внутри базового адреса, чтобы токен
/// не уходил на чужой хост.
pub(crate) fn resolve_endpoint(base_url: &str, path: &str) -> Result<String, HttpError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        let base = Url::parse(base_url)
            .map_err(|err| HttpError::InvalidUrl(format!("{base_url}: {err}")))?;
        let target =
            Url::parse(path).map_err(|err| HttpError::InvalidUrl(format!("{path}: {err}")))?;

        // Сравнение по сегментам: `/api/` не должен пропускать `/apiary/`.
        let base_path = format!("{}/", base.path().trim_end_matches('/'));
        let same_origin = base.scheme() == target.scheme()
            && base.host_str() == target.host_str()
            && base.port_or_known_default() == target.port_or_known_default();
        let inside_base = target.path() == base_path.trim_end_matches('/')
            || target.path().starts_with(&base_path);
        if !same_origin || !inside_base {
            return Err(HttpError::InvalidUrl(format!(
                "{path} is outside of {base_url}"
            )));
        }
        return Ok(target.to_string());
    }

    Ok(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const BASE: &str = "http://localhost:8000/api/";

    #[test]
    fn endpoint_normalizes_slashes() {
        let full = resolve_endpoint(BASE, "/groups/").expect("path must resolve");
        assert_eq!(full, "http://localhost:8000/api/groups/");
    }

    #[test]
    fn endpoint_accepts_cursor_under_base() {
        let full = resolve_endpoint(BASE, "http://localhost:8000/api/groups/?page=2")
            .expect("cursor must resolve");
        assert_eq!(full, "http://localhost:8000/api/groups/?page=2");
    }

    #[test]
    fn endpoint_rejects_foreign_cursor() {
        let err = resolve_endpoint(BASE, "http://evil.example/api/groups/?page=2")
            .expect_err("foreign host must be rejected");
        assert!(matches!(err, HttpError::InvalidUrl(_)));

        let err = resolve_endpoint(BASE, "http://localhost:8000/admin/?page=2")
            .expect_err("path outside of base must be rejected");
        assert!(matches!(err, HttpError::InvalidUrl(_)));

        let err = resolve_endpoint(BASE, "http://localhost:8000/apiary/steal?page=2")
            .expect_err("sibling path sharing a prefix must be rejected");
        assert!(matches!(err, HttpError::InvalidUrl(_)));
    }

    #[test]
    fn endpoint_joins_relative_cursor_with_query() {
        let full = resolve_endpoint(BASE, "groups/?page=2").expect("cursor must resolve");
        assert_eq!(full, "http://localhost:8000/api/groups/?page=2");

        let full = resolve_endpoint("http://localhost:8000/api", "http://localhost:8000/api/feed/")
            .expect("base without trailing slash must still match");
        assert_eq!(full, "http://localhost:8000/api/feed/");
    }

    #[test]
    fn parse_body_handles_empty_and_plain_text() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body("Bad Gateway"), Value::Null);
        assert_eq!(
            parse_body("<html><body><h1>502 Bad Gateway</h1></body></html>"),
            Value::Null
        );
    }

    #[test]
    fn into_result_maps_non_success_to_status_error() {
        let ok = ApiResponse::json(204, Value::Null).into_result();
        assert!(ok.is_ok());

        let err = ApiResponse::json(400, json!({"detail": "bad"}))
            .into_result()
            .expect_err("400 must be an error");
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.server_message(), Some("bad"));
    }

    #[test]
    fn transport_rejects_invalid_base_url() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            ReqwestTransport::new(&config),
            Err(HttpError::InvalidUrl(_))
        ));
    }
}
