use std::sync::Arc;

use tracing::debug;

use crate::error::HttpError;
use crate::models::{Group, GroupId, GroupSlug, ListOrPage, Member, Post, Profile, UserId};
use crate::pagination::{FEED_LOAD_FAILED, GROUPS_LOAD_FAILED, PaginatedList};
use crate::resource::{PROFILE_PATH, ResourceClient};
use crate::validation::ProfileUpdate;

/// Сообщение, если не удалось загрузить профиль.
pub const PROFILE_LOAD_FAILED: &str = "Failed to load profile. Please try again later.";
/// Сообщение, если не удалось сохранить профиль.
pub const PROFILE_UPDATE_FAILED: &str = "Failed to update profile. Please try again.";
/// Сообщение, если не удалось загрузить участников группы.
pub const MEMBERS_LOAD_FAILED: &str = "Failed to load group members. Please try again.";
/// Сообщение, если не удалось загрузить группы пользователя.
pub const MY_GROUPS_LOAD_FAILED: &str = "Failed to load your groups. Please try again later.";

/// Типизированные эндпоинты чтения поверх [`ResourceClient`].
#[derive(Debug, Clone)]
pub struct GroupsApi {
    resources: Arc<ResourceClient>,
}

impl GroupsApi {
    /// Создаёт API поверх клиента ресурсов.
    pub fn new(resources: Arc<ResourceClient>) -> Self {
        Self { resources }
    }

    /// Профиль текущего пользователя.
    pub async fn profile(&self) -> Result<Profile, HttpError> {
        self.resources.get(PROFILE_PATH).await
    }

    /// Профиль другого пользователя.
    pub async fn user(&self, id: &UserId) -> Result<Profile, HttpError> {
        self.resources.get(&format!("users/{id}/")).await
    }

    /// Сохраняет свой профиль и возвращает то, что записал сервер.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, HttpError> {
        self.resources.patch(PROFILE_PATH, update).await
    }

    /// Группа по идентификатору.
    pub async fn group(&self, id: &GroupId) -> Result<Group, HttpError> {
        self.resources.get(&format!("groups/{id}/")).await
    }

    /// Посты группы в порядке сервера.
    pub async fn group_posts(&self, id: &GroupId) -> Result<Vec<Post>, HttpError> {
        let posts = self
            .resources
            .get::<ListOrPage<Post>>(&format!("groups/{id}/posts/"))
            .await?;
        Ok(posts.into_items())
    }

    /// Участники группы (доступно администратору).
    pub async fn members(&self, slug: &GroupSlug) -> Result<Vec<Member>, HttpError> {
        let members = self
            .resources
            .get::<ListOrPage<Member>>(&format!("groups/{slug}/members/"))
            .await?;
        Ok(members.into_items())
    }

    /// Группы пользователя; сервер отдаёт массив или страницу.
    pub async fn user_groups(&self, user_id: &UserId) -> Result<Vec<Group>, HttpError> {
        let groups = self
            .resources
            .get::<ListOrPage<Group>>(&format!("users/{user_id}/groups/"))
            .await?;
        Ok(groups.into_items())
    }

    /// Группы текущего пользователя: сначала `profile/`, затем его группы.
    pub async fn my_groups(&self) -> Result<Vec<Group>, HttpError> {
        let profile = self.profile().await?;
        let groups = self.user_groups(&profile.id).await?;
        debug!(user = %profile.id, count = groups.len(), "memberships loaded");
        Ok(groups)
    }

    /// Контроллер ленты.
    pub fn feed(&self) -> PaginatedList<Post> {
        PaginatedList::new(self.resources.clone(), "feed/", FEED_LOAD_FAILED)
    }

    /// Контроллер списка групп.
    pub fn groups(&self) -> PaginatedList<Group> {
        PaginatedList::new(self.resources.clone(), "groups/", GROUPS_LOAD_FAILED)
    }
}
