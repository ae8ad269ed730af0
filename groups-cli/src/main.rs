use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groups_client::{
    Action, ActionCoordinator, ActionError, ActionOutcome, AuthError, AuthState, Confirmation,
    Credentials, Cursor, FileTokenStorage, GROUP_REFETCH_FAILED, Group, GroupForm, GroupId,
    GroupsClient, GroupsClientError, HttpError, LoadOutcome, NewPostForm, PROFILE_LOAD_FAILED,
    PaginatedList, ProfileForm, Registration, ResourceSlot, UserId,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

mod logging;
mod render;
mod settings;

use logging::init_logging;
use settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "groups-cli", version, about = "CLI клиент для сервиса групп и постов")]
struct Cli {
    /// Адрес API, например `http://127.0.0.1:8000/api/` (перекрывает GROUPS_API_URL).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Не спрашивать подтверждение перед выходом из группы и правкой.
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация пользователя (без входа).
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Вход пользователя.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Выход: удаляет оба токена.
    Logout,
    /// Проверка сохранённой сессии.
    Status,
    /// Лента постов.
    Feed {
        /// Ссылка на страницу из вывода предыдущей команды.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Список групп.
    Groups {
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Группа и её посты.
    Group {
        #[arg(long)]
        id: String,
    },
    /// Участники группы.
    Members {
        #[arg(long)]
        id: String,
    },
    /// Вступить в группу.
    Join {
        #[arg(long)]
        id: String,
    },
    /// Выйти из группы (требует подтверждения).
    Leave {
        #[arg(long)]
        id: String,
    },
    /// Изменить группу (требует подтверждения).
    ///
    /// Не указанные поля берутся из текущего состояния группы.
    EditGroup {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },
    /// Создать группу.
    CreateGroup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        private: bool,
    },
    /// Создать пост в своей группе.
    CreatePost {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Профиль: свой или другого пользователя.
    Profile {
        #[arg(long)]
        user: Option<String>,
    },
    /// Изменить свой профиль.
    ///
    /// Не указанные поля остаются прежними.
    UpdateProfile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_logging(&settings.log_level)?;

    let cli = Cli::parse();
    let config = settings.client_config(cli.server);
    debug!(base_url = %config.base_url, "starting");

    let storage = Arc::new(FileTokenStorage::new(&settings.session_file));
    let client = GroupsClient::new(&config, storage).map_err(map_client_error)?;
    let confirmation: Arc<dyn Confirmation> = if cli.yes {
        Arc::new(|_: &str| true)
    } else {
        Arc::new(StdinConfirmation)
    };
    let actions = client.actions(confirmation);

    match cli.command {
        Command::Register {
            username,
            email,
            password,
            first_name,
            last_name,
        } => {
            let created: serde_json::Value = client
                .session()
                .register(&Registration {
                    username,
                    email,
                    password,
                    first_name,
                    last_name,
                })
                .await
                .map_err(map_client_error)?;
            println!("Регистрация успешна");
            if let Some(username) = created.get("username").and_then(|v| v.as_str()) {
                println!("username: {username}");
            }
            println!("Теперь выполните `groups-cli login ...`");
        }
        Command::Login { username, password } => {
            client
                .login(&Credentials { username, password })
                .await
                .map_err(map_client_error)?;
            println!("Вход выполнен");
        }
        Command::Logout => {
            client.logout();
            println!("Выход выполнен");
        }
        Command::Status => {
            let state = client.validate_session().await;
            match state {
                AuthState::Unauthenticated => println!("Не авторизован"),
                AuthState::Hydrating => {
                    println!("Сессия восстановлена, но не подтверждена сервером")
                }
                AuthState::Authenticated => {
                    let profile = client.api().profile().await.map_err(map_client_error)?;
                    println!("Авторизован как {}", profile.username);
                }
            }
        }
        Command::Feed { cursor } => {
            let feed = client.api().feed();
            show_page(&feed, cursor, &[]).await?;
            render::print_snapshot(&feed.snapshot(), "posts", |post| {
                render::print_post(post, None)
            });
        }
        Command::Groups { cursor, search } => {
            let groups = client.api().groups();
            let params: Vec<(&str, &str)> = search
                .as_deref()
                .map(|search| vec![("search", search)])
                .unwrap_or_default();
            show_page(&groups, cursor, &params).await?;
            render::print_snapshot(&groups.snapshot(), "groups", render::print_group_line);
        }
        Command::Group { id } => {
            let id = GroupId::new(id);
            let slot = ResourceSlot::new(GROUP_REFETCH_FAILED);
            slot.load(client.api().group(&id))
                .await
                .map_err(map_client_error)?;
            let group = slot.value().context("группа не загружена")?;
            render::print_group(&group);

            let posts = client
                .api()
                .group_posts(&id)
                .await
                .map_err(map_client_error)?;
            println!();
            render::print_posts(&posts, Some(&group));
        }
        Command::Members { id } => {
            let group = load_group(&client, id).await?;
            let members = client
                .api()
                .members(&group.slug)
                .await
                .map_err(map_client_error)?;
            render::print_members(&members);
        }
        Command::Join { id } => {
            let group = load_group(&client, id).await?;
            perform(&actions, Action::Join(group.handle())).await?;
        }
        Command::Leave { id } => {
            let group = load_group(&client, id).await?;
            perform(&actions, Action::Leave(group.handle())).await?;
        }
        Command::EditGroup {
            id,
            name,
            description,
            public,
        } => {
            let group = load_group(&client, id).await?;
            let mut form = GroupForm::from_group(&group);
            if let Some(name) = name {
                form.name = name;
            }
            if let Some(description) = description {
                form.description = description;
            }
            if let Some(public) = public {
                form.is_public = public;
            }
            let update = form.into_update().map_err(map_client_error)?;
            perform(&actions, Action::EditGroup(group.handle(), update)).await?;
        }
        Command::CreateGroup {
            name,
            description,
            private,
        } => {
            let group = GroupForm {
                name,
                description,
                is_public: !private,
            }
            .into_new_group()
            .map_err(map_client_error)?;
            perform(&actions, Action::CreateGroup(group)).await?;
        }
        Command::CreatePost {
            title,
            content,
            group,
        } => {
            let memberships = client.api().my_groups().await.map_err(map_client_error)?;
            let mut form = NewPostForm {
                title,
                content,
                group: group.map(GroupId::new),
            };
            if let Some(warning) = form.reconcile_group(&memberships) {
                eprintln!("{warning}");
            }
            if form.group.is_none() && memberships.len() == 1 {
                form.group = memberships.first().map(|group| group.id.clone());
            }
            let post = form.validate(&memberships).map_err(map_client_error)?;
            perform(&actions, Action::CreatePost(post)).await?;
        }
        Command::Profile { user } => {
            let slot = ResourceSlot::new(PROFILE_LOAD_FAILED);
            let result = match user {
                Some(user) => slot.load(client.api().user(&UserId::new(user))).await,
                None => slot.load(client.api().profile()).await,
            };
            result.map_err(map_client_error)?;
            let profile = slot.value().context("профиль не загружен")?;
            render::print_profile(&profile);
        }
        Command::UpdateProfile {
            username,
            first_name,
            last_name,
            bio,
        } => {
            let current = client.api().profile().await.map_err(map_client_error)?;
            let mut form = ProfileForm::from_profile(&current);
            if let Some(username) = username {
                form.username = username;
            }
            if let Some(first_name) = first_name {
                form.first_name = first_name;
            }
            if let Some(last_name) = last_name {
                form.last_name = last_name;
            }
            if let Some(bio) = bio {
                form.bio = bio;
            }
            let update = form.validate().map_err(map_client_error)?;
            let profile = client
                .api()
                .update_profile(&update)
                .await
                .map_err(map_client_error)?;
            println!("Профиль обновлён");
            render::print_profile(&profile);
        }
    }

    Ok(())
}

/// Подтверждение вопросом в терминале; ответ по умолчанию «нет».
struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        if io::stderr().flush().is_err() {
            return false;
        }
        match blocking(read_answer) {
            Ok(answer) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn read_answer() -> io::Result<String> {
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer)
}

/// Выполняет блокирующий ввод, не занимая воркер многопоточного рантайма.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn show_page<T>(
    list: &PaginatedList<T>,
    cursor: Option<String>,
    params: &[(&str, &str)],
) -> Result<()>
where
    T: serde::de::DeserializeOwned + Clone,
{
    let outcome = match cursor {
        Some(cursor) => list.load_cursor(Some(&Cursor::new(cursor))).await,
        None => list.load_first_page(params).await,
    };
    match outcome {
        Ok(LoadOutcome::Applied) => Ok(()),
        Ok(other) => {
            debug!(?other, collection = list.collection(), "page not applied");
            Ok(())
        }
        Err(err) => Err(page_error(err, list.snapshot().error)),
    }
}

/// Ошибка загрузки страницы: сообщение списка, для 401 подсказка про вход.
fn page_error(err: HttpError, list_error: Option<String>) -> anyhow::Error {
    if err.is_unauthorized() {
        return map_client_error(err);
    }
    match list_error {
        Some(message) => anyhow::anyhow!(message),
        None => map_client_error(err),
    }
}

async fn load_group(client: &GroupsClient, id: String) -> Result<Group> {
    client
        .api()
        .group(&GroupId::new(id))
        .await
        .map_err(map_client_error)
}

async fn perform(actions: &ActionCoordinator, action: Action) -> Result<()> {
    match actions.perform(action).await {
        Ok(ActionOutcome::Group(group)) => {
            println!("Готово");
            render::print_group(&group);
            Ok(())
        }
        Ok(ActionOutcome::GroupPosts { group, posts }) => {
            println!("Пост создан в группе {group}");
            render::print_posts(&posts, None);
            Ok(())
        }
        Err(ActionError::Declined) => {
            println!("Отменено");
            Ok(())
        }
        Err(err) => Err(map_client_error(err)),
    }
}

fn map_client_error(err: impl Into<GroupsClientError>) -> anyhow::Error {
    let message = match err.into() {
        GroupsClientError::Http(err) => http_message(&err),
        GroupsClientError::Auth(AuthError::NoRefreshToken | AuthError::RefreshRejected(_)) => {
            "сессия истекла: выполните `groups-cli login ...`".to_string()
        }
        GroupsClientError::Auth(AuthError::Rejected(message)) => message,
        GroupsClientError::Auth(AuthError::Validation(err))
        | GroupsClientError::Validation(err) => format!("некорректные данные: {err}"),
        GroupsClientError::Auth(AuthError::Storage(err)) | GroupsClientError::Storage(err) => {
            format!("ошибка хранилища сессии: {err}")
        }
        GroupsClientError::Action(ActionError::Busy(key)) => {
            format!("действие уже выполняется: {key}")
        }
        GroupsClientError::Action(ActionError::Declined) => "действие отменено".to_string(),
        GroupsClientError::Action(ActionError::Mutation { message, .. }) => message,
        GroupsClientError::Action(ActionError::Refetch { message, .. }) => {
            format!("изменение сохранено, но обновить данные не удалось: {message}")
        }
    };
    anyhow::anyhow!(message)
}

fn http_message(err: &HttpError) -> String {
    if err.is_unauthorized() {
        return "требуется авторизация: выполните `groups-cli login ...`".to_string();
    }
    match err {
        HttpError::Status {
            status: 404,
            server_message: None,
        } => "ресурс не найден".to_string(),
        HttpError::Status {
            server_message: Some(message),
            ..
        } => message.clone(),
        other => format!("ошибка HTTP: {other}"),
    }
}
