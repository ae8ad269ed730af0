//! Клиентская проверка форм. Формы превращаются в типы запросов только через
//! `validate`, поэтому непроверенные данные не доходят до сети.

use serde::Serialize;
use validator::ValidateEmail;

use crate::error::ValidationError;
use crate::models::{Group, GroupId, Profile};

/// Нет ни одной группы, в которой можно создать пост.
pub const NO_MEMBERSHIPS: &str = "You aren't a member of any groups yet. You need to join a group before you can create a post.";
/// Выбранная группа не из числа групп пользователя.
pub const NOT_A_MEMBER: &str = "You can only create posts in groups you are a member of.";

#[derive(Debug, Clone, Serialize)]
/// Логин и пароль для входа.
pub struct Credentials {
    /// Логин.
    pub username: String,
    /// Пароль.
    pub password: String,
}

impl Credentials {
    /// Проверяет, что оба поля заполнены; логин обрезается по краям.
    pub fn validate(&self) -> Result<Self, ValidationError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ValidationError::new("username", "Username is required"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::new("password", "Password is required"));
        }
        Ok(Self {
            username: username.to_string(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
/// Данные регистрации.
pub struct Registration {
    /// Логин.
    pub username: String,
    /// Email.
    pub email: String,
    /// Пароль.
    pub password: String,
    /// Имя.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Фамилия.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl Registration {
    /// Нормализует логин и email, проверяет формат email.
    pub fn validate(&self) -> Result<Self, ValidationError> {
        let username = self.username.trim();
        if username.chars().count() < 3 || username.chars().count() > 64 {
            return Err(ValidationError::new("username", "Username must be 3..64 chars"));
        }
        let email = self.email.trim().to_lowercase();
        if !email.validate_email() {
            return Err(ValidationError::new("email", "Enter a valid email address"));
        }
        if self.password.is_empty() {
            return Err(ValidationError::new("password", "Password is required"));
        }

        Ok(Self {
            username: username.to_string(),
            email,
            password: self.password.clone(),
            first_name: non_blank(self.first_name.as_deref()),
            last_name: non_blank(self.last_name.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Default)]
/// Форма создания поста.
pub struct NewPostForm {
    /// Заголовок.
    pub title: String,
    /// Текст.
    pub content: String,
    /// Выбранная группа.
    pub group: Option<GroupId>,
}

impl NewPostForm {
    /// Сбрасывает предвыбранную группу, если пользователь в ней не состоит.
    ///
    /// Возвращает сообщение для показа, если выбор был сброшен.
    pub fn reconcile_group(&mut self, memberships: &[Group]) -> Option<ValidationError> {
        let selected = self.group.as_ref()?;
        if memberships.iter().any(|group| &group.id == selected) {
            return None;
        }
        self.group = None;
        Some(ValidationError::new("group", NOT_A_MEMBER))
    }

    /// Проверяет форму против групп, в которых состоит пользователь.
    pub fn validate(self, memberships: &[Group]) -> Result<NewPost, ValidationError> {
        if memberships.is_empty() {
            return Err(ValidationError::new("group", NO_MEMBERSHIPS));
        }

        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::new("title", "Title is required"));
        }
        let content = self.content.trim();
        if content.is_empty() {
            return Err(ValidationError::new("content", "Content is required"));
        }

        let Some(group) = self.group else {
            return Err(ValidationError::new("group", "Select a group"));
        };
        if !memberships.iter().any(|membership| membership.id == group) {
            return Err(ValidationError::new("group", NOT_A_MEMBER));
        }

        Ok(NewPost {
            title: title.to_string(),
            content: content.to_string(),
            group,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Проверенный запрос на создание поста.
pub struct NewPost {
    title: String,
    content: String,
    group: GroupId,
}

impl NewPost {
    /// Заголовок.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Текст.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Группа, в которой создаётся пост.
    pub fn group(&self) -> &GroupId {
        &self.group
    }
}

#[derive(Debug, Clone, Default)]
/// Форма создания или редактирования группы.
pub struct GroupForm {
    /// Название.
    pub name: String,
    /// Описание.
    pub description: String,
    /// Публичная ли группа.
    pub is_public: bool,
}

impl GroupForm {
    /// Заполняет форму текущими значениями группы.
    pub fn from_group(group: &Group) -> Self {
        Self {
            name: group.name.clone(),
            description: group.description.clone(),
            is_public: group.is_public,
        }
    }

    /// Проверяет форму для `PATCH groups/{slug}/`.
    pub fn into_update(self) -> Result<GroupUpdate, ValidationError> {
        let (name, description) = self.checked_fields()?;
        Ok(GroupUpdate {
            name,
            description,
            is_public: self.is_public,
        })
    }

    /// Проверяет форму для `POST groups/`.
    pub fn into_new_group(self) -> Result<NewGroup, ValidationError> {
        let (name, description) = self.checked_fields()?;
        Ok(NewGroup {
            name,
            description,
            is_public: self.is_public,
        })
    }

    fn checked_fields(&self) -> Result<(String, String), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "Group name is required"));
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(ValidationError::new("description", "Description is required"));
        }
        Ok((name.to_string(), description.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Проверенные изменения группы.
pub struct GroupUpdate {
    name: String,
    description: String,
    is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Проверенный запрос на создание группы.
pub struct NewGroup {
    name: String,
    description: String,
    is_public: bool,
}

impl NewGroup {
    /// Название новой группы.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default)]
/// Форма редактирования своего профиля.
pub struct ProfileForm {
    /// Логин.
    pub username: String,
    /// Имя.
    pub first_name: String,
    /// Фамилия.
    pub last_name: String,
    /// О себе.
    pub bio: String,
}

impl ProfileForm {
    /// Заполняет форму текущими значениями профиля.
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            username: profile.username.clone(),
            first_name: profile.first_name.clone().unwrap_or_default(),
            last_name: profile.last_name.clone().unwrap_or_default(),
            bio: profile.bio.clone().unwrap_or_default(),
        }
    }

    /// Логин обязателен; остальные поля уходят как есть (пустая строка очищает поле).
    pub fn validate(self) -> Result<ProfileUpdate, ValidationError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ValidationError::new("username", "Username is required"));
        }
        Ok(ProfileUpdate {
            username: username.to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            bio: self.bio,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Проверенные изменения профиля для `PATCH profile/`.
pub struct ProfileUpdate {
    username: String,
    first_name: String,
    last_name: String,
    bio: String,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
