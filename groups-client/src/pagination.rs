use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::HttpError;
use crate::models::{Cursor, Page, PageDto};
use crate::resource::ResourceClient;
use crate::view::{LoadOutcome, ViewScope};

/// Сообщение по умолчанию для ленты.
pub const FEED_LOAD_FAILED: &str = "Failed to load posts. Please try again later.";
/// Сообщение по умолчанию для списка групп.
pub const GROUPS_LOAD_FAILED: &str = "Failed to load groups. Please try again later.";

#[derive(Debug, Clone)]
/// Что сейчас показывать на экране списка.
///
/// `page = Some(пусто), error = None` означает «загружено, элементов нет»;
/// `error = Some(..)` означает неудачную загрузку (прежняя страница остаётся).
pub struct ListSnapshot<T> {
    /// Последняя применённая страница.
    pub page: Option<Page<T>>,
    /// Ошибка последней загрузки.
    pub error: Option<String>,
    /// Идёт загрузка.
    pub loading: bool,
}

impl<T> Default for ListSnapshot<T> {
    fn default() -> Self {
        Self {
            page: None,
            error: None,
            loading: false,
        }
    }
}

/// Контроллер постраничного списка для одной коллекции (`feed/`, `groups/`).
///
/// Каждая успешная загрузка заменяет страницу целиком. Ответ, начатый раньше
/// последней загрузки, отбрасывается.
pub struct PaginatedList<T> {
    resources: Arc<ResourceClient>,
    collection: String,
    error_message: &'static str,
    scope: ViewScope,
    state: Mutex<ListSnapshot<T>>,
}

impl<T> PaginatedList<T>
where
    T: DeserializeOwned + Clone,
{
    /// Контроллер для `collection`; `error_message` показывается, если сервер
    /// не прислал своё сообщение.
    pub fn new(
        resources: Arc<ResourceClient>,
        collection: impl Into<String>,
        error_message: &'static str,
    ) -> Self {
        Self {
            resources,
            collection: collection.into(),
            error_message,
            scope: ViewScope::new(),
            state: Mutex::new(ListSnapshot::default()),
        }
    }

    /// Путь коллекции.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Загружает первую страницу коллекции.
    pub async fn load_first_page(
        &self,
        params: &[(&str, &str)],
    ) -> Result<LoadOutcome, HttpError> {
        let fetch = self
            .resources
            .get_with_query::<PageDto<T>>(&self.collection, params);
        self.fetch(fetch).await
    }

    /// Переходит по курсору. Без курсора ничего не делает.
    pub async fn load_cursor(&self, cursor: Option<&Cursor>) -> Result<LoadOutcome, HttpError> {
        let Some(cursor) = cursor else {
            return Ok(LoadOutcome::NoCursor);
        };
        let fetch = self.resources.get::<PageDto<T>>(cursor.as_str());
        self.fetch(fetch).await
    }

    /// Следующая страница относительно текущей.
    pub async fn next(&self) -> Result<LoadOutcome, HttpError> {
        let cursor = self.current_cursor(|page| page.next_cursor.clone());
        self.load_cursor(cursor.as_ref()).await
    }

    /// Предыдущая страница относительно текущей.
    pub async fn previous(&self) -> Result<LoadOutcome, HttpError> {
        let cursor = self.current_cursor(|page| page.previous_cursor.clone());
        self.load_cursor(cursor.as_ref()).await
    }

    /// Снимок состояния для отрисовки.
    pub fn snapshot(&self) -> ListSnapshot<T> {
        self.lock().clone()
    }

    /// Текущая страница.
    pub fn page(&self) -> Option<Page<T>> {
        self.lock().page.clone()
    }

    /// Экран закрыт: ответы запросов в полёте будут отброшены.
    pub fn unmount(&self) {
        self.scope.unmount();
    }

    async fn fetch<F>(&self, fetch: F) -> Result<LoadOutcome, HttpError>
    where
        F: Future<Output = Result<PageDto<T>, HttpError>>,
    {
        let ticket = self.scope.ticket();
        self.lock().loading = true;

        let result = fetch.await;
        if !self.scope.is_current(ticket) {
            debug!(collection = %self.collection, "discarding stale page response");
            return Ok(LoadOutcome::Discarded);
        }

        let mut state = self.lock();
        state.loading = false;
        match result {
            Ok(dto) => {
                let page = Page::from(dto);
                debug!(
                    collection = %self.collection,
                    items = page.items.len(),
                    total = page.total_count,
                    "page loaded"
                );
                state.page = Some(page);
                state.error = None;
                Ok(LoadOutcome::Applied)
            }
            Err(err) => {
                warn!(collection = %self.collection, error = %err, "page load failed");
                state.error = Some(err.user_message(self.error_message));
                Err(err)
            }
        }
    }

    fn current_cursor(&self, pick: impl FnOnce(&Page<T>) -> Option<Cursor>) -> Option<Cursor> {
        self.lock().page.as_ref().and_then(pick)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListSnapshot<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for PaginatedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedList")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
