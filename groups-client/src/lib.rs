//! Клиентская библиотека для сервиса групп и постов.
//!
//! Содержит слой сессии и синхронизации ресурсов:
//! - `SessionStore`: access/refresh токены, оптимистичное восстановление
//!   и single-flight обновление;
//! - `ResourceClient`: запросы с bearer-токеном и одним повтором после 401;
//! - `PaginatedList`: постраничные коллекции (лента, группы);
//! - `ActionCoordinator`: вступление, выход, правка и создание с
//!   перечитыванием ресурса после успеха.
//!
//! Точка входа для приложения: [`GroupsClient`].
#![warn(missing_docs)]

mod actions;
mod api;
mod config;
mod error;
mod http_client;
mod models;
mod pagination;
mod resource;
mod session;
mod storage;
#[cfg(test)]
mod test_support;
mod validation;
mod view;

use std::sync::Arc;

pub use actions::{
    Action, ActionCoordinator, ActionKey, ActionOutcome, CONFIRM_LEAVE, CONFIRM_UPDATE,
    Confirmation, GROUP_REFETCH_FAILED, POSTS_REFETCH_FAILED,
};
pub use api::{
    GroupsApi, MEMBERS_LOAD_FAILED, MY_GROUPS_LOAD_FAILED, PROFILE_LOAD_FAILED,
    PROFILE_UPDATE_FAILED,
};
pub use config::{ClientConfig, DEFAULT_API_URL, RefreshPolicy};
pub use error::{
    ActionError, AuthError, GroupsClientError, GroupsClientResult, HttpError, StorageError,
    ValidationError,
};
pub use http_client::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use models::{
    Author, Cursor, Group, GroupHandle, GroupId, GroupRole, GroupSlug, GroupSummary, Member,
    MemberUser, Page, Post, PostGroup, PostId, Profile, UserId,
};
pub use pagination::{FEED_LOAD_FAILED, GROUPS_LOAD_FAILED, ListSnapshot, PaginatedList};
pub use resource::ResourceClient;
pub use session::{AuthState, Session, SessionStore};
pub use storage::{
    ACCESS_TOKEN_KEY, FileTokenStorage, MemoryTokenStorage, REFRESH_TOKEN_KEY, TokenStorage,
};
pub use validation::{
    Credentials, GroupForm, GroupUpdate, NO_MEMBERSHIPS, NOT_A_MEMBER, NewGroup, NewPost,
    NewPostForm, ProfileForm, ProfileUpdate, Registration,
};
pub use view::{LoadOutcome, ResourceSlot, SlotSnapshot, Ticket, ViewScope};

#[derive(Debug, Clone)]
/// Собранный клиент: одна сессия, один клиент ресурсов и API поверх них.
///
/// Сессия восстанавливается из хранилища при создании (без сетевого запроса);
/// проверить её на сервере можно через [`GroupsClient::validate_session`].
pub struct GroupsClient {
    session: Arc<SessionStore>,
    resources: Arc<ResourceClient>,
    api: GroupsApi,
}

impl GroupsClient {
    /// Создаёт клиент с HTTP-транспортом на `reqwest`.
    pub fn new(config: &ClientConfig, storage: Arc<dyn TokenStorage>) -> Result<Self, HttpError> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Ok(Self::with_transport(
            transport,
            storage,
            config.refresh_policy,
        ))
    }

    /// Создаёт клиент поверх произвольного транспорта.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn TokenStorage>,
        policy: RefreshPolicy,
    ) -> Self {
        let session = Arc::new(SessionStore::new(transport.clone(), storage));
        let state = session.hydrate();
        tracing::debug!(?state, "session restored");

        let resources = Arc::new(ResourceClient::new(transport, session.clone(), policy));
        let api = GroupsApi::new(resources.clone());
        Self {
            session,
            resources,
            api,
        }
    }

    /// Хранилище сессии.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Клиент ресурсов.
    pub fn resources(&self) -> &Arc<ResourceClient> {
        &self.resources
    }

    /// Типизированные эндпоинты.
    pub fn api(&self) -> &GroupsApi {
        &self.api
    }

    /// Координатор действий с данным источником подтверждений.
    pub fn actions(&self, confirmation: Arc<dyn Confirmation>) -> ActionCoordinator {
        ActionCoordinator::new(self.resources.clone(), confirmation)
    }

    /// Вход по логину и паролю.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.session.login(credentials).await
    }

    /// Выход; повторный вызов ничего не меняет.
    pub fn logout(&self) {
        self.session.logout();
    }

    /// Проверяет восстановленную сессию на сервере (`profile/`).
    pub async fn validate_session(&self) -> AuthState {
        self.resources.validate_session().await
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::test_support::FakeTransport;

    #[tokio::test]
    async fn client_restores_and_validates_session() {
        let transport = FakeTransport::new();
        let storage = Arc::new(MemoryTokenStorage::new());
        storage
            .save(ACCESS_TOKEN_KEY, "T1")
            .expect("save must succeed");
        transport.respond(
            Method::GET,
            "profile/",
            200,
            json!({"id": 1, "username": "ferris", "date_joined": "2026-01-01T00:00:00Z"}),
        );

        let client = GroupsClient::with_transport(transport.clone(), storage, RefreshPolicy::default());
        assert_eq!(client.session().state(), AuthState::Hydrating);
        assert!(client.session().is_authenticated());

        assert_eq!(client.validate_session().await, AuthState::Authenticated);
        assert_eq!(transport.calls()[0].bearer.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn client_without_tokens_starts_anonymous() {
        let client = GroupsClient::with_transport(
            FakeTransport::new(),
            Arc::new(MemoryTokenStorage::new()),
            RefreshPolicy::default(),
        );
        assert_eq!(client.session().state(), AuthState::Unauthenticated);
        assert_eq!(client.validate_session().await, AuthState::Unauthenticated);
    }
}
