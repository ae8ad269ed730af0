//! Изменяющие действия над группами и постами.
//!
//! Локальное состояние не меняется оптимистично: после успешного изменения
//! координатор перечитывает затронутый ресурс и отдаёт его как новое состояние
//! экрана. Пока действие по ключу выполняется, повторное действие по тому же
//! ключу отклоняется.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{ActionError, HttpError};
use crate::models::{Group, GroupHandle, GroupId, ListOrPage, Post};
use crate::resource::{ResourceClient, decode};
use crate::validation::{GroupUpdate, NewGroup, NewPost};

/// Вопрос перед выходом из группы.
pub const CONFIRM_LEAVE: &str = "Are you sure you want to leave this group?";
/// Вопрос перед сохранением изменений группы.
pub const CONFIRM_UPDATE: &str = "Are you sure you want to update this group?";

const JOIN_FAILED: &str = "Failed to join group. Please try again.";
const LEAVE_FAILED: &str = "Failed to leave group. Please try again.";
const UPDATE_FAILED: &str = "Failed to update group. Please try again.";
const CREATE_POST_FAILED: &str = "Failed to create post. Please try again.";
const CREATE_GROUP_FAILED: &str = "Failed to create group. Please try again.";
/// Сообщение, если изменение прошло, а перечитать группу не удалось.
pub const GROUP_REFETCH_FAILED: &str = "Failed to load group details. Please try again later.";
/// Сообщение, если пост создан, а перечитать посты группы не удалось.
pub const POSTS_REFETCH_FAILED: &str = "Failed to load posts. Please try again later.";

#[derive(Debug, Clone, PartialEq)]
/// Намерение пользователя.
pub enum Action {
    /// Вступить в группу.
    Join(GroupHandle),
    /// Выйти из группы (требует подтверждения).
    Leave(GroupHandle),
    /// Изменить группу (требует подтверждения).
    EditGroup(GroupHandle, GroupUpdate),
    /// Создать пост в группе, в которой состоит пользователь.
    CreatePost(NewPost),
    /// Создать группу.
    CreateGroup(NewGroup),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Ключ ресурса, по которому действия не должны пересекаться.
pub struct ActionKey(String);

impl ActionKey {
    /// Ключ действий над группой.
    pub fn group(handle: &GroupHandle) -> Self {
        Self(format!("group:{}", handle.slug))
    }

    /// Ключ формы создания поста.
    pub fn new_post() -> Self {
        Self("posts:new".to_string())
    }

    /// Ключ формы создания группы.
    pub fn new_group() -> Self {
        Self("groups:new".to_string())
    }

    /// Ключ как строка.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Action {
    /// Ключ, под которым действие считается выполняющимся.
    pub fn key(&self) -> ActionKey {
        match self {
            Self::Join(handle) | Self::Leave(handle) | Self::EditGroup(handle, _) => {
                ActionKey::group(handle)
            }
            Self::CreatePost(_) => ActionKey::new_post(),
            Self::CreateGroup(_) => ActionKey::new_group(),
        }
    }

    /// Вопрос, который нужно задать пользователю перед действием.
    pub fn confirmation_prompt(&self) -> Option<&'static str> {
        match self {
            Self::Leave(_) => Some(CONFIRM_LEAVE),
            Self::EditGroup(..) => Some(CONFIRM_UPDATE),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::EditGroup(..) => "edit_group",
            Self::CreatePost(_) => "create_post",
            Self::CreateGroup(_) => "create_group",
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            Self::Join(_) => JOIN_FAILED,
            Self::Leave(_) => LEAVE_FAILED,
            Self::EditGroup(..) => UPDATE_FAILED,
            Self::CreatePost(_) => CREATE_POST_FAILED,
            Self::CreateGroup(_) => CREATE_GROUP_FAILED,
        }
    }
}

/// Источник подтверждений (диалог, флаг `--yes`, вопрос в терминале).
pub trait Confirmation: Send + Sync {
    /// `true`, если пользователь согласился.
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirmation for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Подтверждённое сервером состояние после действия.
pub enum ActionOutcome {
    /// Группа, перечитанная после вступления, выхода, изменения или создания.
    Group(Group),
    /// Посты группы, в которой только что создан пост.
    GroupPosts {
        /// Группа, посты которой перечитаны.
        group: GroupId,
        /// Посты в порядке сервера.
        posts: Vec<Post>,
    },
}

#[derive(Deserialize)]
struct Created {
    id: GroupId,
}

/// Выполняет действия: ключ → подтверждение → изменение → перечитывание.
pub struct ActionCoordinator {
    resources: Arc<ResourceClient>,
    confirmation: Arc<dyn Confirmation>,
    in_flight: Arc<Mutex<HashSet<ActionKey>>>,
}

impl ActionCoordinator {
    /// Координатор поверх клиента ресурсов с данным источником подтверждений.
    pub fn new(resources: Arc<ResourceClient>, confirmation: Arc<dyn Confirmation>) -> Self {
        Self {
            resources,
            confirmation,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// `true`, пока по ключу выполняется действие (кнопку стоит отключить).
    pub fn is_busy(&self, key: &ActionKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Выполняет действие и возвращает перечитанное состояние.
    pub async fn perform(&self, action: Action) -> Result<ActionOutcome, ActionError> {
        let key = action.key();
        let _guard = InFlight::claim(&self.in_flight, key.clone())
            .ok_or_else(|| ActionError::Busy(key.to_string()))?;

        let declined = action
            .confirmation_prompt()
            .is_some_and(|prompt| !self.confirmation.confirm(prompt));
        if declined {
            debug!(key = %key, "action declined");
            return Err(ActionError::Declined);
        }

        let name = action.name();
        let fallback = action.failure_message();
        let refetch = self
            .mutate(action)
            .await
            .map_err(|source| {
                warn!(action = name, key = %key, error = %source, "mutation failed");
                ActionError::Mutation {
                    message: source.user_message(fallback),
                    source,
                }
            })?;
        info!(action = name, key = %key, "mutation accepted");

        self.refetch(refetch).await
    }

    async fn mutate(&self, action: Action) -> Result<Refetch, HttpError> {
        match action {
            Action::Join(handle) => {
                self.post(&format!("groups/{}/join/", handle.slug), &json!({}))
                    .await?;
                Ok(Refetch::Group(handle.id))
            }
            Action::Leave(handle) => {
                self.post(&format!("groups/{}/leave/", handle.slug), &json!({}))
                    .await?;
                Ok(Refetch::Group(handle.id))
            }
            Action::EditGroup(handle, update) => {
                self.resources
                    .patch::<_, Value>(&format!("groups/{}/", handle.slug), &update)
                    .await?;
                Ok(Refetch::Group(handle.id))
            }
            Action::CreatePost(post) => {
                self.post("posts/", &post).await?;
                Ok(Refetch::GroupPosts(post.group().clone()))
            }
            Action::CreateGroup(group) => {
                let created = self.post("groups/", &group).await?;
                Ok(Refetch::CreatedGroup(created))
            }
        }
    }

    async fn refetch(&self, refetch: Refetch) -> Result<ActionOutcome, ActionError> {
        let group_error = |source: HttpError| {
            warn!(error = %source, "refetch after mutation failed");
            ActionError::Refetch {
                message: source.user_message(GROUP_REFETCH_FAILED),
                source,
            }
        };

        match refetch {
            Refetch::Group(id) => self.load_group(&id).await.map_err(group_error),
            Refetch::CreatedGroup(body) => {
                let id = decode::<Created>(body).map_err(group_error)?.id;
                self.load_group(&id).await.map_err(group_error)
            }
            Refetch::GroupPosts(group) => {
                let posts = self
                    .resources
                    .get::<ListOrPage<Post>>(&format!("groups/{group}/posts/"))
                    .await
                    .map_err(|source| {
                        warn!(error = %source, "refetch after mutation failed");
                        ActionError::Refetch {
                            message: source.user_message(POSTS_REFETCH_FAILED),
                            source,
                        }
                    })?
                    .into_items();
                Ok(ActionOutcome::GroupPosts { group, posts })
            }
        }
    }

    async fn load_group(&self, id: &GroupId) -> Result<ActionOutcome, HttpError> {
        let group = self.resources.get::<Group>(&format!("groups/{id}/")).await?;
        Ok(ActionOutcome::Group(group))
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, HttpError> {
        self.resources.post::<_, Value>(path, body).await
    }
}

impl std::fmt::Debug for ActionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCoordinator").finish_non_exhaustive()
    }
}

enum Refetch {
    Group(GroupId),
    CreatedGroup(Value),
    GroupPosts(GroupId),
}

/// Отметка «действие выполняется»; снимается при drop, в том числе при ошибке
/// и отмене future.
struct InFlight {
    keys: Arc<Mutex<HashSet<ActionKey>>>,
    key: ActionKey,
}

impl InFlight {
    fn claim(keys: &Arc<Mutex<HashSet<ActionKey>>>, key: ActionKey) -> Option<Self> {
        let inserted = keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| Self {
            keys: keys.clone(),
            key,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::*;
    use crate::models::GroupSlug;
    use crate::test_support::{Harness, group_json, post_json};
    use crate::validation::{GroupForm, NewPostForm};

    fn handle() -> GroupHandle {
        GroupHandle {
            id: GroupId::new("42"),
            slug: GroupSlug::new("rustaceans"),
        }
    }

    fn coordinator(h: &Harness, answer: bool) -> ActionCoordinator {
        ActionCoordinator::new(h.resources.clone(), Arc::new(move |_: &str| answer))
    }

    #[tokio::test]
    async fn join_refetches_group_by_id() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport
            .respond(Method::POST, "groups/rustaceans/join/", 200, json!({}));
        h.transport.respond(
            Method::GET,
            "groups/42/",
            200,
            group_json("42", "rustaceans", true),
        );
        let actions = coordinator(&h, true);

        let outcome = actions
            .perform(Action::Join(handle()))
            .await
            .expect("join must succeed");

        let ActionOutcome::Group(group) = outcome else {
            panic!("expected group outcome");
        };
        assert!(group.is_member);
        let calls = h.transport.calls();
        assert_eq!(calls[0].body, Some(json!({})));
        assert_eq!(calls[0].bearer.as_deref(), Some("T1"));
        assert!(!actions.is_busy(&ActionKey::group(&handle())));
    }

    #[tokio::test]
    async fn concurrent_leave_sends_one_mutation() {
        let h = Harness::hydrated("T1", Some("R1"));
        let gate = h.transport.hold(Method::POST, "groups/rustaceans/leave/");
        h.transport
            .respond(Method::POST, "groups/rustaceans/leave/", 200, json!({}));
        h.transport.respond(
            Method::GET,
            "groups/42/",
            200,
            group_json("42", "rustaceans", false),
        );
        let actions = coordinator(&h, true);

        let (first, second, ()) = tokio::join!(
            actions.perform(Action::Leave(handle())),
            async {
                tokio::task::yield_now().await;
                actions.perform(Action::Leave(handle())).await
            },
            async {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert!(actions.is_busy(&ActionKey::group(&handle())));
                gate.notify_one();
            }
        );

        let ActionOutcome::Group(group) = first.expect("first leave must succeed") else {
            panic!("expected group outcome");
        };
        assert!(!group.is_member);
        assert!(matches!(second, Err(ActionError::Busy(key)) if key == "group:rustaceans"));
        assert_eq!(h.transport.count(&Method::POST, "groups/rustaceans/leave/"), 1);
        assert_eq!(h.transport.count(&Method::GET, "groups/42/"), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_sends_nothing() {
        let h = Harness::hydrated("T1", Some("R1"));
        let asked = Arc::new(Mutex::new(Vec::new()));
        let recorder = asked.clone();
        let actions = ActionCoordinator::new(
            h.resources.clone(),
            Arc::new(move |prompt: &str| {
                recorder
                    .lock()
                    .expect("prompts mutex poisoned")
                    .push(prompt.to_string());
                false
            }),
        );

        let err = actions
            .perform(Action::Leave(handle()))
            .await
            .expect_err("leave must be declined");

        assert!(matches!(err, ActionError::Declined));
        assert!(h.transport.calls().is_empty());
        assert_eq!(*asked.lock().expect("prompts mutex poisoned"), [CONFIRM_LEAVE]);
        assert!(!actions.is_busy(&ActionKey::group(&handle())));
    }

    #[tokio::test]
    async fn mutation_failure_skips_refetch() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport
            .respond(Method::POST, "groups/rustaceans/leave/", 500, json!({}));
        let actions = coordinator(&h, true);

        let err = actions
            .perform(Action::Leave(handle()))
            .await
            .expect_err("leave must fail");

        match err {
            ActionError::Mutation { message, source } => {
                assert_eq!(message, "Failed to leave group. Please try again.");
                assert_eq!(source.status(), Some(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.transport.count(&Method::GET, "groups/42/"), 0);
        assert!(!actions.is_busy(&ActionKey::group(&handle())));
    }

    #[tokio::test]
    async fn mutation_failure_uses_server_message() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport.respond(
            Method::POST,
            "groups/rustaceans/join/",
            400,
            json!({"detail": "You are already a member of this group."}),
        );
        let actions = coordinator(&h, true);

        let err = actions
            .perform(Action::Join(handle()))
            .await
            .expect_err("join must fail");

        assert!(matches!(
            err,
            ActionError::Mutation { ref message, .. }
                if message == "You are already a member of this group."
        ));
    }

    #[tokio::test]
    async fn refetch_failure_is_reported_separately() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport
            .respond(Method::POST, "groups/rustaceans/join/", 200, json!({}));
        h.transport.fail(
            Method::GET,
            "groups/42/",
            HttpError::Network("connection reset".to_string()),
        );
        let actions = coordinator(&h, true);

        let err = actions
            .perform(Action::Join(handle()))
            .await
            .expect_err("refetch must fail");

        assert!(matches!(
            err,
            ActionError::Refetch { ref message, .. } if message == GROUP_REFETCH_FAILED
        ));
        assert_eq!(h.transport.count(&Method::POST, "groups/rustaceans/join/"), 1);
    }

    #[tokio::test]
    async fn edit_group_patches_by_slug_and_reads_by_id() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport
            .respond(Method::PATCH, "groups/rustaceans/", 200, json!({}));
        h.transport.respond(
            Method::GET,
            "groups/42/",
            200,
            group_json("42", "rustaceans", true),
        );
        let actions = coordinator(&h, true);
        let update = GroupForm {
            name: "Rustaceans".to_string(),
            description: "crabs".to_string(),
            is_public: false,
        }
        .into_update()
        .expect("form must be valid");

        actions
            .perform(Action::EditGroup(handle(), update))
            .await
            .expect("edit must succeed");

        let calls = h.transport.calls();
        assert_eq!(calls[0].method, Method::PATCH);
        assert_eq!(
            calls[0].body,
            Some(json!({"name": "Rustaceans", "description": "crabs", "is_public": false}))
        );
        assert_eq!(calls[1].path, "groups/42/");
    }

    #[tokio::test]
    async fn create_post_refetches_group_posts() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport
            .respond(Method::POST, "posts/", 201, post_json(9, "42"));
        h.transport.respond(
            Method::GET,
            "groups/42/posts/",
            200,
            json!([post_json(9, "42"), post_json(3, "42")]),
        );
        let actions = coordinator(&h, true);
        let memberships: Vec<Group> = vec![
            serde_json::from_value(group_json("42", "rustaceans", true)).expect("group must parse"),
        ];
        let post = NewPostForm {
            title: "Hello".to_string(),
            content: "World".to_string(),
            group: Some(GroupId::new("42")),
        }
        .validate(&memberships)
        .expect("form must be valid");

        let outcome = actions
            .perform(Action::CreatePost(post))
            .await
            .expect("create must succeed");

        let ActionOutcome::GroupPosts { group, posts } = outcome else {
            panic!("expected posts outcome");
        };
        assert_eq!(group.as_str(), "42");
        let ids: Vec<String> = posts.iter().map(|post| post.id.to_string()).collect();
        assert_eq!(ids, ["9", "3"]);
    }

    #[tokio::test]
    async fn create_group_reads_back_created_group() {
        let h = Harness::hydrated("T1", Some("R1"));
        h.transport.respond(
            Method::POST,
            "groups/",
            201,
            json!({"id": 77, "slug": "crabs", "name": "Crabs"}),
        );
        h.transport
            .respond(Method::GET, "groups/77/", 200, group_json("77", "crabs", true));
        let actions = coordinator(&h, true);
        let group = GroupForm {
            name: "Crabs".to_string(),
            description: "all about crabs".to_string(),
            is_public: true,
        }
        .into_new_group()
        .expect("form must be valid");

        let outcome = actions
            .perform(Action::CreateGroup(group))
            .await
            .expect("create must succeed");

        assert!(matches!(outcome, ActionOutcome::Group(group) if group.slug.as_str() == "crabs"));
    }

    #[test]
    fn keys_follow_resource() {
        assert_eq!(Action::Join(handle()).key().as_str(), "group:rustaceans");
        assert_eq!(Action::Join(handle()).confirmation_prompt(), None);
        assert_eq!(
            Action::Leave(handle()).confirmation_prompt(),
            Some(CONFIRM_LEAVE)
        );
        assert_eq!(ActionKey::new_post().as_str(), "posts:new");
        assert_eq!(ActionKey::new_group().as_str(), "groups:new");
    }
}
