use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
/// Ошибка обращения к REST API: транспорт, не-2xx ответ или разбор ответа.
pub enum HttpError {
    /// Сетевая/транспортная ошибка (`reqwest`), ответ не получен.
    #[error("network error: {0}")]
    Network(String),

    /// Сервер ответил статусом вне диапазона 2xx.
    #[error("http status {status}: {}", .server_message.as_deref().unwrap_or("no message"))]
    Status {
        /// HTTP-статус ответа.
        status: u16,
        /// Сообщение сервера, если его удалось извлечь из тела.
        server_message: Option<String>,
    },

    /// Тело ответа не соответствует ожидаемой модели.
    #[error("decode error: {0}")]
    Decode(String),

    /// Путь или курсор нельзя отправить на базовый адрес API.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl HttpError {
    /// HTTP-статус, если ответ был получен.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true`, если сервер отклонил запрос из-за авторизации (401).
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Сообщение сервера, если оно было в теле ответа.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { server_message, .. } => server_message.as_deref(),
            _ => None,
        }
    }

    /// Текст для показа пользователю: сообщение сервера или `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        self.server_message()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }

    pub(crate) fn from_status(status: u16, body: &Value) -> Self {
        Self::Status {
            status,
            server_message: extract_server_message(body),
        }
    }
}

#[derive(Debug, Clone, Error)]
/// Ошибка клиентской валидации формы: сетевой запрос не отправляется.
#[error("{message}")]
pub struct ValidationError {
    /// Поле формы, не прошедшее проверку.
    pub field: &'static str,
    /// Сообщение для пользователя.
    pub message: &'static str,
}

impl ValidationError {
    pub(crate) fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

#[derive(Debug, Error)]
/// Ошибки долговременного хранилища токенов.
pub enum StorageError {
    /// Ошибка чтения/записи файла.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Содержимое хранилища не удалось (де)сериализовать.
    #[error("storage format error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
/// Ошибки аутентификации. Отказ в обновлении токена завершает сессию.
pub enum AuthError {
    /// Сервер отклонил учётные данные или регистрацию.
    #[error("{0}")]
    Rejected(String),

    /// Refresh token отсутствует, обновить сессию нельзя.
    #[error("no refresh token, session cleared")]
    NoRefreshToken,

    /// Сервер или транспорт не дали обновить access token.
    #[error("token refresh failed: {0}")]
    RefreshRejected(String),

    /// Форма не прошла клиентскую проверку.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Токены не удалось сохранить.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
/// Ошибки изменяющих действий (join/leave/edit/create).
pub enum ActionError {
    /// Действие для этого ключа уже выполняется.
    #[error("action already in progress for {0}")]
    Busy(String),

    /// Пользователь не подтвердил действие.
    #[error("action cancelled")]
    Declined,

    /// Сервер отклонил изменение, локальное состояние не менялось.
    #[error("{message}")]
    Mutation {
        /// Сообщение для пользователя.
        message: String,
        /// Исходная ошибка запроса.
        source: HttpError,
    },

    /// Изменение применено, но повторное чтение ресурса не удалось.
    #[error("{message}")]
    Refetch {
        /// Сообщение для пользователя.
        message: String,
        /// Исходная ошибка запроса.
        source: HttpError,
    },
}

#[derive(Debug, Error)]
/// Общая ошибка клиентской библиотеки `groups-client`.
pub enum GroupsClientError {
    /// Ошибка HTTP-запроса.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Ошибка аутентификации.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Ошибка изменяющего действия.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Ошибка клиентской валидации.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Ошибка хранилища токенов.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Результат операций `groups-client`.
pub type GroupsClientResult<T> = Result<T, GroupsClientError>;

/// Достаёт человекочитаемое сообщение из тела ошибки.
///
/// Порядок: `detail`, `error`, `message`, `non_field_errors`, затем ошибки полей
/// в виде `field: message`. Тело без структуры (HTML страница прокси, голый
/// текст) сообщения не содержит.
pub(crate) fn extract_server_message(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => {
            for key in ["detail", "error", "message", "non_field_errors"] {
                if let Some(message) = map.get(key).and_then(first_text) {
                    return Some(message);
                }
            }

            let fields: Vec<String> = map
                .iter()
                .filter_map(|(field, value)| first_text(value).map(|msg| format!("{field}: {msg}")))
                .collect();
            (!fields.is_empty()).then(|| fields.join("; "))
        }
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}
