//! Состояние экранов: защита от устаревших ответов и держатель одиночного ресурса.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Чем закончилась загрузка.
pub enum LoadOutcome {
    /// Ответ применён к состоянию экрана.
    Applied,
    /// Пока шёл запрос, экран начал новую загрузку или был закрыт: ответ отброшен.
    Discarded,
    /// Курсора нет, запрос не отправлялся.
    NoCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Номер загрузки, выданный [`ViewScope`].
pub struct Ticket(u64);

#[derive(Debug, Clone, Default)]
/// Счётчик поколений экрана.
///
/// Каждая загрузка берёт билет; ответ применяется, только если билет всё ещё
/// последний. Новый билет и [`ViewScope::unmount`] делают старые билеты
/// недействительными.
pub struct ViewScope {
    generation: Arc<AtomicU64>,
}

impl ViewScope {
    /// Новый счётчик.
    pub fn new() -> Self {
        Self::default()
    }

    /// Выдаёт билет для новой загрузки.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// `true`, если после `ticket` не было новых загрузок и закрытия.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Экран закрыт: все запросы в полёте будут отброшены.
    pub fn unmount(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
/// Состояние одиночного ресурса для отрисовки.
pub struct SlotSnapshot<T> {
    /// Последнее применённое значение.
    pub value: Option<T>,
    /// Ошибка последней загрузки.
    pub error: Option<String>,
    /// Идёт загрузка.
    pub loading: bool,
}

impl<T> Default for SlotSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
            loading: false,
        }
    }
}

/// Держатель одиночного ресурса экрана (группа, профиль).
///
/// Успешный ответ заменяет значение целиком; ошибка оставляет прежнее значение
/// и выставляет сообщение.
pub struct ResourceSlot<T> {
    scope: ViewScope,
    state: Mutex<SlotSnapshot<T>>,
    error_message: &'static str,
}

impl<T: Clone> ResourceSlot<T> {
    /// Пустой слот; `error_message` показывается, если сервер не прислал своё.
    pub fn new(error_message: &'static str) -> Self {
        Self {
            scope: ViewScope::new(),
            state: Mutex::new(SlotSnapshot::default()),
            error_message,
        }
    }

    /// Выполняет загрузку и применяет результат, если он не устарел.
    pub async fn load<F>(&self, fetch: F) -> Result<LoadOutcome, HttpError>
    where
        F: Future<Output = Result<T, HttpError>>,
    {
        let ticket = self.scope.ticket();
        self.update(|state| state.loading = true);

        let result = fetch.await;
        if !self.scope.is_current(ticket) {
            debug!("discarding stale resource response");
            return Ok(LoadOutcome::Discarded);
        }

        match result {
            Ok(value) => {
                self.update(|state| {
                    state.value = Some(value);
                    state.error = None;
                    state.loading = false;
                });
                Ok(LoadOutcome::Applied)
            }
            Err(err) => {
                warn!(error = %err, "resource load failed");
                let message = err.user_message(self.error_message);
                self.update(|state| {
                    state.error = Some(message);
                    state.loading = false;
                });
                Err(err)
            }
        }
    }

    /// Подставляет значение, полученное повторным чтением после действия.
    pub fn replace(&self, value: T) {
        self.update(|state| {
            state.value = Some(value);
            state.error = None;
        });
    }

    /// Показывает ошибку, не трогая значение.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|state| state.error = Some(message));
    }

    /// Снимок для отрисовки.
    pub fn snapshot(&self) -> SlotSnapshot<T> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Текущее значение.
    pub fn value(&self) -> Option<T> {
        self.snapshot().value
    }

    /// Экран закрыт: ответы запросов в полёте будут отброшены.
    pub fn unmount(&self) {
        self.scope.unmount();
    }

    fn update(&self, f: impl FnOnce(&mut SlotSnapshot<T>)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}
