use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RefreshPolicy;
use crate::error::HttpError;
use crate::http_client::{ApiRequest, ApiResponse, HttpTransport};
use crate::session::{AuthState, SessionStore};

pub(crate) const PROFILE_PATH: &str = "profile/";

/// Тонкая обёртка над транспортом: подставляет access token текущей сессии
/// и возвращает нормализованный JSON.
///
/// При [`RefreshPolicy::RetryOnce`] ответ 401 приводит к одному обновлению
/// токена через [`SessionStore`] и одному повтору исходного запроса.
pub struct ResourceClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionStore>,
    policy: RefreshPolicy,
}

impl ResourceClient {
    /// Создаёт клиент поверх транспорта и сессии.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<SessionStore>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            policy,
        }
    }

    /// Сессия, токен которой подставляется в запросы.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// `GET path` с разбором ответа в `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        decode(self.get_value(path).await?)
    }

    /// `GET path?query` с разбором ответа в `T`.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let query = query
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let request = ApiRequest::new(Method::GET, path).with_query(query);
        decode(self.execute(request).await?)
    }

    /// `GET path` без разбора.
    pub async fn get_value(&self, path: &str) -> Result<Value, HttpError> {
        self.execute(ApiRequest::new(Method::GET, path)).await
    }

    /// `POST path` с JSON-телом.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::new(Method::POST, path).with_body(encode(body)?);
        decode(self.execute(request).await?)
    }

    /// `PATCH path` с JSON-телом.
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::new(Method::PATCH, path).with_body(encode(body)?);
        decode(self.execute(request).await?)
    }

    /// Проверяет восстановленную сессию запросом `profile/`.
    ///
    /// Имеет смысл только в [`AuthState::Hydrating`]: 401 приводит к одному
    /// `silent_refresh` (и повтору), при неудаче сессия очищается. Сетевая
    /// ошибка оставляет сессию непроверенной.
    pub async fn validate_session(&self) -> AuthState {
        if self.session.state() != AuthState::Hydrating {
            return self.session.state();
        }

        let request = ApiRequest::new(Method::GET, PROFILE_PATH);
        let result = match self.policy {
            RefreshPolicy::RetryOnce => self.execute(request).await,
            RefreshPolicy::Never => self.execute_with_startup_refresh(request).await,
        };
        if let Err(err) = result {
            warn!(error = %err, "session validation failed");
        }
        self.session.state()
    }

    async fn execute(&self, request: ApiRequest) -> Result<Value, HttpError> {
        let token = self.session.access_token();
        let result = self.send(request.clone(), token.clone()).await;

        match result {
            Err(err) if err.is_unauthorized() && self.policy == RefreshPolicy::RetryOnce => {
                self.refresh_and_retry(request, token, err).await
            }
            other => other,
        }
    }

    /// Проверка при старте при выключенном автоповторе: один refresh и повтор.
    async fn execute_with_startup_refresh(&self, request: ApiRequest) -> Result<Value, HttpError> {
        let token = self.session.access_token();
        match self.send(request.clone(), token.clone()).await {
            Err(err) if err.is_unauthorized() => self.refresh_and_retry(request, token, err).await,
            other => other,
        }
    }

    async fn refresh_and_retry(
        &self,
        request: ApiRequest,
        rejected: Option<String>,
        original: HttpError,
    ) -> Result<Value, HttpError> {
        debug!(path = %request.path, "access token rejected, refreshing");
        if let Err(err) = self.session.refresh_after_rejection(rejected.as_deref()).await {
            warn!(error = %err, path = %request.path, "refresh failed, session cleared");
            return Err(original);
        }

        let token = self.session.access_token();
        self.send(request, token).await
    }

    async fn send(&self, mut request: ApiRequest, token: Option<String>) -> Result<Value, HttpError> {
        request.bearer = token.clone();
        let body = self
            .transport
            .send(request)
            .await
            .and_then(ApiResponse::into_result)?;

        if let Some(token) = token.as_deref() {
            self.session.mark_validated(token);
        }
        Ok(body)
    }
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("session", &self.session)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, HttpError> {
    serde_json::to_value(body).map_err(|err| HttpError::Decode(err.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, HttpError> {
    serde_json::from_value(value).map_err(|err| HttpError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::TOKEN_REFRESH_PATH;
    use crate::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::test_support::Harness;
    use crate::validation::Credentials;

    fn profile_json() -> Value {
        json!({"id": 1, "username": "ferris", "date_joined": "2026-01-01T00:00:00Z"})
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport.respond(Method::GET, "feed/", 200, json!({"results": []}));

        h.resources
            .get_value("feed/")
            .await
            .expect("request must succeed");

        let calls = h.transport.calls();
        assert_eq!(calls[0].bearer.as_deref(), Some("T1"));
        assert_eq!(h.session.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn anonymous_request_has_no_bearer() {
        let h = Harness::new();
        h.transport.respond(Method::GET, "feed/", 200, json!({"results": []}));

        h.resources
            .get_value("feed/")
            .await
            .expect("request must succeed");
        assert!(h.transport.calls()[0].bearer.is_none());
    }

    #[tokio::test]
    async fn login_then_authenticated_call_needs_no_refresh() {
        let h = Harness::new();
        h.transport.respond(
            Method::POST,
            "login/",
            200,
            json!({"access": "T1", "refresh": "R1"}),
        );
        h.transport.respond(Method::GET, PROFILE_PATH, 200, profile_json());

        h.session
            .login(&Credentials {
                username: "a".to_string(),
                password: "b".to_string(),
            })
            .await
            .expect("login must succeed");
        h.resources
            .get_value(PROFILE_PATH)
            .await
            .expect("profile must load");

        assert_eq!(h.transport.count(&Method::POST, TOKEN_REFRESH_PATH), 0);
        assert_eq!(h.transport.calls()[1].bearer.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn retries_once_after_refresh() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport.respond(
            Method::GET,
            PROFILE_PATH,
            401,
            json!({"detail": "Given token not valid for any token type"}),
        );
        h.transport.respond(Method::GET, PROFILE_PATH, 200, profile_json());
        h.transport.respond(
            Method::POST,
            TOKEN_REFRESH_PATH,
            200,
            json!({"access": "T2"}),
        );

        let body = h
            .resources
            .get_value(PROFILE_PATH)
            .await
            .expect("retry must succeed");

        assert_eq!(body["username"], "ferris");
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].bearer.as_deref(), Some("T2"));
        assert_eq!(h.session.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn failed_refresh_clears_session_and_returns_original_error() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport.respond(
            Method::GET,
            PROFILE_PATH,
            401,
            json!({"detail": "Given token not valid for any token type"}),
        );
        h.transport.respond(
            Method::POST,
            TOKEN_REFRESH_PATH,
            401,
            json!({"detail": "Token is blacklisted"}),
        );

        let state = h.resources.validate_session().await;

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(!h.session.is_authenticated());
        assert!(h.stored(ACCESS_TOKEN_KEY).is_none());
        assert!(h.stored(REFRESH_TOKEN_KEY).is_none());
        assert_eq!(h.transport.count(&Method::GET, PROFILE_PATH), 1);
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_clears_session() {
        let h = Harness::hydrated("T1", None);
        h.transport
            .respond(Method::GET, "groups/", 401, json!({"detail": "expired"}));

        let err = h
            .resources
            .get_value("groups/")
            .await
            .expect_err("request must fail");

        assert!(err.is_unauthorized());
        assert_eq!(err.server_message(), Some("expired"));
        assert!(!h.session.is_authenticated());
        assert_eq!(h.transport.count(&Method::POST, TOKEN_REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn never_policy_leaves_refresh_to_caller() {
        let h = Harness::with_policy(RefreshPolicy::Never);
        h.seed("T1", Some("R1"));
        h.transport
            .respond(Method::GET, "groups/", 401, json!({"detail": "expired"}));

        let err = h
            .resources
            .get_value("groups/")
            .await
            .expect_err("request must fail");

        assert!(err.is_unauthorized());
        assert!(h.session.is_authenticated());
        assert_eq!(h.transport.count(&Method::POST, TOKEN_REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn never_policy_still_refreshes_on_startup_validation() {
        let h = Harness::with_policy(RefreshPolicy::Never);
        h.seed("T1", Some("R1"));
        h.transport
            .respond(Method::GET, PROFILE_PATH, 401, json!({"detail": "expired"}));
        h.transport.respond(Method::GET, PROFILE_PATH, 200, profile_json());
        h.transport.respond(
            Method::POST,
            TOKEN_REFRESH_PATH,
            200,
            json!({"access": "T2"}),
        );

        let state = h.resources.validate_session().await;

        assert_eq!(state, AuthState::Authenticated);
        assert_eq!(h.session.access_token().as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn decode_error_is_reported() {
        let h = Harness::new();
        h.transport
            .respond(Method::GET, PROFILE_PATH, 200, json!({"unexpected": true}));

        let err = h
            .resources
            .get::<crate::models::Profile>(PROFILE_PATH)
            .await
            .expect_err("decode must fail");
        assert!(matches!(err, HttpError::Decode(_)));
    }
}
