//! Хранилище сессии: пара токенов, состояние аутентификации, вход/выход и
//! обновление access token.

use std::sync::{Arc, PoisonError, RwLock};

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AuthError, HttpError, StorageError};
use crate::http_client::{ApiRequest, ApiResponse, HttpTransport};
use crate::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TokenStorage};
use crate::validation::{Credentials, Registration};

pub(crate) const LOGIN_PATH: &str = "login/";
pub(crate) const REGISTER_PATH: &str = "register/";
pub(crate) const TOKEN_REFRESH_PATH: &str = "token/refresh/";

const LOGIN_FAILED: &str = "Login failed. Please try again.";
const REGISTER_FAILED: &str = "Registration failed. Please try again.";
const REFRESH_FAILED: &str = "Session expired. Please log in again.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Пара токенов текущей сессии.
pub struct Session {
    /// Короткоживущий токен для запросов к API.
    pub access_token: Option<String>,
    /// Долгоживущий токен для получения нового access token.
    pub refresh_token: Option<String>,
}

impl Session {
    /// Сессия считается аутентифицированной, пока есть access token.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Состояние аутентификации.
pub enum AuthState {
    /// Access token восстановлен из хранилища, сервер его ещё не подтвердил.
    ///
    /// Считается аутентифицированным; проверка происходит на первом
    /// авторизованном запросе.
    Hydrating,
    /// Токен выдан или подтверждён сервером.
    Authenticated,
    /// Токена нет.
    Unauthenticated,
}

#[derive(Debug)]
struct SessionState {
    session: Session,
    auth: AuthState,
}

#[derive(Debug, Deserialize)]
struct TokenPairDto {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponseDto {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Владелец сессии. Единственный компонент, который меняет токены.
///
/// Остальные компоненты получают `Arc<SessionStore>` и читают токен через
/// [`SessionStore::access_token`].
pub struct SessionStore {
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn TokenStorage>,
    state: RwLock<SessionState>,
    refresh_gate: Mutex<()>,
}

impl SessionStore {
    /// Создаёт пустую неаутентифицированную сессию.
    pub fn new(transport: Arc<dyn HttpTransport>, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            transport,
            storage,
            state: RwLock::new(SessionState {
                session: Session::default(),
                auth: AuthState::Unauthenticated,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Восстанавливает токены из долговременного хранилища без обращения к серверу.
    ///
    /// При наличии access token состояние становится [`AuthState::Hydrating`].
    /// Нечитаемое хранилище считается пустым.
    pub fn hydrate(&self) -> AuthState {
        let access = self.load_or_warn(ACCESS_TOKEN_KEY);
        let refresh = self.load_or_warn(REFRESH_TOKEN_KEY);

        let auth = if access.is_some() {
            AuthState::Hydrating
        } else {
            AuthState::Unauthenticated
        };
        self.write(|state| {
            state.session = Session {
                access_token: access,
                refresh_token: refresh,
            };
            state.auth = auth;
        });
        debug!(?auth, "session hydrated");
        auth
    }

    /// Копия текущей пары токенов.
    pub fn snapshot(&self) -> Session {
        self.read(|state| state.session.clone())
    }

    /// Текущее состояние аутентификации.
    pub fn state(&self) -> AuthState {
        self.read(|state| state.auth)
    }

    /// `true`, если есть access token (в том числе ещё не проверенный).
    pub fn is_authenticated(&self) -> bool {
        self.read(|state| state.session.is_authenticated())
    }

    /// Текущий access token.
    pub fn access_token(&self) -> Option<String> {
        self.read(|state| state.session.access_token.clone())
    }

    /// Входит по логину и паролю и сохраняет обе части пары токенов.
    ///
    /// При ошибке возвращает сообщение сервера или общее сообщение, сессия не меняется.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let credentials = credentials.validate()?;
        let request = ApiRequest::new(Method::POST, LOGIN_PATH).with_body(json!({
            "username": &credentials.username,
            "password": &credentials.password,
        }));

        let pair = self
            .transport
            .send(request)
            .await
            .and_then(ApiResponse::into_result)
            .and_then(|body| {
                serde_json::from_value::<TokenPairDto>(body)
                    .map_err(|err| HttpError::Decode(err.to_string()))
            })
            .map_err(|err| {
                warn!(error = %err, "login failed");
                AuthError::Rejected(err.user_message(LOGIN_FAILED))
            })?;

        if let Err(err) = self.persist(&pair.access, Some(&pair.refresh)) {
            self.clear_storage();
            return Err(err.into());
        }

        self.write(|state| {
            state.session = Session {
                access_token: Some(pair.access),
                refresh_token: Some(pair.refresh),
            };
            state.auth = AuthState::Authenticated;
        });
        info!(username = %credentials.username, "logged in");
        Ok(())
    }

    /// Регистрирует пользователя. Сессию не меняет: после регистрации нужен вход.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<serde_json::Value, AuthError> {
        let registration = registration.validate()?;
        let body = serde_json::to_value(&registration)
            .map_err(|err| AuthError::Rejected(err.to_string()))?;
        let request = ApiRequest::new(Method::POST, REGISTER_PATH).with_body(body);

        let payload = self
            .transport
            .send(request)
            .await
            .and_then(ApiResponse::into_result)
            .map_err(|err| {
                warn!(error = %err, "registration failed");
                AuthError::Rejected(err.user_message(REGISTER_FAILED))
            })?;

        info!(username = %registration.username, "registered");
        Ok(payload)
    }

    /// Очищает обе части пары токенов в памяти и в хранилище. Идемпотентен.
    pub fn logout(&self) {
        let was_authenticated = self.write(|state| {
            let was = state.session.is_authenticated();
            state.session = Session::default();
            state.auth = AuthState::Unauthenticated;
            was
        });
        self.clear_storage();
        if was_authenticated {
            info!("logged out");
        }
    }

    /// Обменивает refresh token на новый access token.
    ///
    /// Без refresh token или при любой ошибке обмена сессия завершается.
    pub async fn silent_refresh(&self) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Обновление после 401 на запрос с токеном `rejected`.
    ///
    /// Одновременные вызовы с одним и тем же отклонённым токеном дают один
    /// запрос `token/refresh/`: остальные ждут и переиспользуют его результат.
    pub(crate) async fn refresh_after_rejection(
        &self,
        rejected: Option<&str>,
    ) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;

        let current = self.access_token();
        if current.is_some() && current.as_deref() != rejected {
            debug!("access token already refreshed by a concurrent request");
            return Ok(());
        }
        self.refresh_locked().await
    }

    /// Подтверждает восстановленный токен после успешного авторизованного запроса.
    pub(crate) fn mark_validated(&self, token: &str) {
        self.write(|state| {
            if state.auth == AuthState::Hydrating
                && state.session.access_token.as_deref() == Some(token)
            {
                state.auth = AuthState::Authenticated;
                debug!("hydrated session confirmed by server");
            }
        });
    }

    async fn refresh_locked(&self) -> Result<(), AuthError> {
        let Some(refresh) = self.read(|state| state.session.refresh_token.clone()) else {
            warn!("no refresh token, logging out");
            self.logout();
            return Err(AuthError::NoRefreshToken);
        };

        let request = ApiRequest::new(Method::POST, TOKEN_REFRESH_PATH)
            .with_body(json!({ "refresh": refresh }));
        let result = self
            .transport
            .send(request)
            .await
            .and_then(ApiResponse::into_result)
            .and_then(|body| {
                serde_json::from_value::<RefreshResponseDto>(body)
                    .map_err(|err| HttpError::Decode(err.to_string()))
            });

        let dto = match result {
            Ok(dto) => dto,
            Err(err) => {
                warn!(error = %err, "token refresh failed, logging out");
                self.logout();
                return Err(AuthError::RefreshRejected(err.user_message(REFRESH_FAILED)));
            }
        };

        if let Err(err) = self.persist(&dto.access, dto.refresh.as_deref()) {
            warn!(error = %err, "failed to persist refreshed token");
        }
        self.write(|state| {
            state.session.access_token = Some(dto.access);
            if let Some(rotated) = dto.refresh {
                state.session.refresh_token = Some(rotated);
            }
            state.auth = AuthState::Authenticated;
        });
        info!("access token refreshed");
        Ok(())
    }

    fn persist(&self, access: &str, refresh: Option<&str>) -> Result<(), StorageError> {
        if let Some(refresh) = refresh {
            self.storage.save(REFRESH_TOKEN_KEY, refresh)?;
        }
        self.storage.save(ACCESS_TOKEN_KEY, access)
    }

    fn clear_storage(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(err) = self.storage.remove(key) {
                warn!(key, error = %err, "failed to clear stored token");
            }
        }
    }

    fn load_or_warn(&self, key: &str) -> Option<String> {
        self.storage.load(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "failed to read stored token");
            None
        })
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
