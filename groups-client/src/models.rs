use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Идентификатор на проводе бывает и числом, и строкой (UUID).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "RawId", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Создаёт идентификатор из строки.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Строковое представление для подстановки в путь.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(value: RawId) -> Self {
                Self(value.into())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Идентификатор группы. Используется в эндпоинтах чтения (`groups/{id}/`).
    GroupId
);
string_id!(
    /// Идентификатор пользователя.
    UserId
);
string_id!(
    /// Идентификатор поста.
    PostId
);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Slug группы. Используется в изменяющих эндпоинтах (`groups/{slug}/join/`).
///
/// Не взаимозаменяем с [`GroupId`]: получить пару можно только из загруженной
/// группы через [`Group::handle`].
pub struct GroupSlug(String);

impl GroupSlug {
    /// Создаёт slug из строки.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Строковое представление для подстановки в путь.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Роль текущего пользователя в группе.
pub enum GroupRole {
    /// Администратор: может редактировать группу и смотреть участников.
    Admin,
    /// Обычный участник.
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Группа в том виде, в котором её видит текущий пользователь.
pub struct Group {
    /// Идентификатор для чтения.
    pub id: GroupId,
    /// Slug для изменяющих запросов.
    pub slug: GroupSlug,
    /// Название.
    pub name: String,
    /// Описание.
    #[serde(default)]
    pub description: String,
    /// Публичная ли группа.
    #[serde(default = "default_true")]
    pub is_public: bool,
    /// URL обложки.
    #[serde(default)]
    pub cover_image: Option<String>,
    /// Состоит ли текущий пользователь в группе.
    #[serde(default)]
    pub is_member: bool,
    /// Роль текущего пользователя (если он участник).
    #[serde(default)]
    pub user_role: Option<GroupRole>,
    /// Количество участников.
    #[serde(default)]
    pub members_count: u64,
    /// Количество постов.
    #[serde(default)]
    pub posts_count: u64,
}

impl Group {
    /// Пара ключей группы для действий: slug для изменения, id для перечитывания.
    pub fn handle(&self) -> GroupHandle {
        GroupHandle {
            id: self.id.clone(),
            slug: self.slug.clone(),
        }
    }

    /// `true`, если текущий пользователь администратор группы.
    pub fn is_admin(&self) -> bool {
        self.user_role == Some(GroupRole::Admin)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Ключи уже загруженной группы: единственная точка перехода между id и slug.
pub struct GroupHandle {
    /// Ключ чтения.
    pub id: GroupId,
    /// Ключ изменения.
    pub slug: GroupSlug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Автор поста.
pub struct Author {
    /// Идентификатор пользователя.
    pub id: UserId,
    /// Логин.
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Краткие данные группы, к которой относится пост.
pub struct GroupSummary {
    /// Идентификатор группы.
    pub id: GroupId,
    /// Название группы.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// Ссылка поста на группу: сервер отдаёт то объект, то голый id.
pub enum PostGroup {
    /// Полный объект группы.
    Summary(GroupSummary),
    /// Только идентификатор.
    Id(GroupId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Пост.
pub struct Post {
    /// Идентификатор поста.
    pub id: PostId,
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    #[serde(default)]
    pub content: String,
    /// Автор; `None` для анонимного поста.
    #[serde(default)]
    pub author: Option<Author>,
    /// Группа поста в одном из двух форматов.
    #[serde(default)]
    pub group: Option<PostGroup>,
    /// Название группы, если сервер прислал его отдельно.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Дата создания.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Приводит ссылку на группу к полному виду.
    ///
    /// Для голого id имя берётся из `group_name`, затем из `known`, если id совпадает,
    /// иначе подставляется сам id.
    pub fn group_summary(&self, known: Option<&Group>) -> Option<GroupSummary> {
        match self.group.as_ref()? {
            PostGroup::Summary(summary) => Some(summary.clone()),
            PostGroup::Id(id) => {
                let name = self
                    .group_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .or_else(|| {
                        known
                            .filter(|group| &group.id == id)
                            .map(|group| group.name.clone())
                    })
                    .unwrap_or_else(|| id.to_string());
                Some(GroupSummary {
                    id: id.clone(),
                    name,
                })
            }
        }
    }

    /// Имя автора для отображения.
    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .map(|author| author.username.as_str())
            .unwrap_or("Anonymous")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Профиль пользователя.
pub struct Profile {
    /// Идентификатор пользователя.
    pub id: UserId,
    /// Уникальный логин.
    pub username: String,
    /// Имя.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Фамилия.
    #[serde(default)]
    pub last_name: Option<String>,
    /// О себе.
    #[serde(default)]
    pub bio: Option<String>,
    /// URL аватара.
    #[serde(default)]
    pub profile_picture: Option<String>,
    /// Дата регистрации (UTC).
    pub date_joined: DateTime<Utc>,
}

impl Profile {
    /// Инициалы для заглушки аватара: имя+фамилия, иначе первая буква логина.
    pub fn initials(&self) -> String {
        let first = non_blank_initial(self.first_name.as_deref());
        let last = non_blank_initial(self.last_name.as_deref());
        match (first, last) {
            (Some(first), Some(last)) => format!("{first}{last}").to_uppercase(),
            _ => self
                .username
                .chars()
                .next()
                .map(|c| c.to_uppercase().to_string())
                .unwrap_or_default(),
        }
    }
}

fn non_blank_initial(value: Option<&str>) -> Option<char> {
    value.and_then(|value| value.trim().chars().next())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Пользователь в списке участников группы.
pub struct MemberUser {
    /// Идентификатор пользователя.
    pub id: UserId,
    /// Логин.
    pub username: String,
    /// URL аватара.
    #[serde(default)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Запись списка участников группы.
pub struct Member {
    /// Пользователь.
    pub user: MemberUser,
    /// Роль в группе, если сервер её указал.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Непрозрачная ссылка на соседнюю страницу коллекции.
pub struct Cursor(String);

impl Cursor {
    /// Создаёт курсор из ссылки, выданной сервером.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Ссылка как есть.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Одна страница коллекции. Заменяется целиком при каждой навигации.
pub struct Page<T> {
    /// Элементы в порядке сервера.
    pub items: Vec<T>,
    /// Общее количество элементов по данным сервера.
    pub total_count: u64,
    /// Ссылка на следующую страницу.
    pub next_cursor: Option<Cursor>,
    /// Ссылка на предыдущую страницу.
    pub previous_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// `true`, если на странице нет элементов.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageDto<T> {
    results: Option<Vec<T>>,
    count: Option<i64>,
    next: Option<String>,
    previous: Option<String>,
}

impl<T> From<PageDto<T>> for Page<T> {
    fn from(value: PageDto<T>) -> Self {
        Self {
            items: value.results.unwrap_or_default(),
            total_count: value.count.unwrap_or(0).max(0) as u64,
            next_cursor: value.next.filter(|s| !s.is_empty()).map(Cursor),
            previous_cursor: value.previous.filter(|s| !s.is_empty()).map(Cursor),
        }
    }
}

/// Коллекция, которую сервер отдаёт то массивом, то страницей.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ListOrPage<T> {
    List(Vec<T>),
    Page(PageDto<T>),
}

impl<T> ListOrPage<T> {
    pub(crate) fn into_items(self) -> Vec<T> {
        match self {
            Self::List(items) => items,
            Self::Page(page) => page.results.unwrap_or_default(),
        }
    }
}
