use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::config::RefreshPolicy;
use crate::error::HttpError;
use crate::http_client::{ApiRequest, ApiResponse, HttpTransport};
use crate::resource::ResourceClient;
use crate::session::SessionStore;
use crate::storage::{ACCESS_TOKEN_KEY, MemoryTokenStorage, REFRESH_TOKEN_KEY, TokenStorage};

type RouteKey = (Method, String);

/// Транспорт с заранее записанными ответами по `(method, path)`.
///
/// Незаписанный маршрут отвечает 404. Все запросы сохраняются до выдачи ответа.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<RouteKey, VecDeque<Result<ApiResponse, HttpError>>>>,
    calls: Mutex<Vec<ApiRequest>>,
    gates: Mutex<HashMap<RouteKey, Arc<Notify>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Ok(ApiResponse::json(status, body)));
    }

    pub(crate) fn fail(&self, method: Method, path: &str, err: HttpError) {
        self.push(method, path, Err(err));
    }

    /// Ответы на маршрут будут ждать `notify_one` на возвращённом `Notify`.
    pub(crate) fn hold(&self, method: Method, path: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .expect("gates mutex poisoned")
            .insert((method, path.to_string()), gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(crate) fn count(&self, method: &Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| &call.method == method && call.path == path)
            .count()
    }

    fn push(&self, method: Method, path: &str, response: Result<ApiResponse, HttpError>) {
        self.routes
            .lock()
            .expect("routes mutex poisoned")
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let key = (request.method.clone(), request.path.clone());
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(request);

        let gate = self
            .gates
            .lock()
            .expect("gates mutex poisoned")
            .get(&key)
            .cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.routes
            .lock()
            .expect("routes mutex poisoned")
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(ApiResponse::json(404, json!({"detail": "Not found."}))))
    }
}

pub(crate) struct Harness {
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) storage: Arc<MemoryTokenStorage>,
    pub(crate) session: Arc<SessionStore>,
    pub(crate) resources: Arc<ResourceClient>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_policy(RefreshPolicy::RetryOnce)
    }

    pub(crate) fn with_policy(policy: RefreshPolicy) -> Self {
        let transport = FakeTransport::new();
        let storage = Arc::new(MemoryTokenStorage::new());
        let session = Arc::new(SessionStore::new(transport.clone(), storage.clone()));
        let resources = Arc::new(ResourceClient::new(
            transport.clone(),
            session.clone(),
            policy,
        ));
        Self {
            transport,
            storage,
            session,
            resources,
        }
    }

    /// Кладёт токены в хранилище и восстанавливает из него сессию.
    pub(crate) fn hydrated(access: &str, refresh: Option<&str>) -> Self {
        let harness = Self::new();
        harness.seed(access, refresh);
        harness
    }

    pub(crate) fn seed(&self, access: &str, refresh: Option<&str>) {
        self.storage
            .save(ACCESS_TOKEN_KEY, access)
            .expect("save must succeed");
        if let Some(refresh) = refresh {
            self.storage
                .save(REFRESH_TOKEN_KEY, refresh)
                .expect("save must succeed");
        }
        self.session.hydrate();
    }

    pub(crate) fn stored(&self, key: &str) -> Option<String> {
        self.storage.load(key).expect("load must succeed")
    }
}

pub(crate) fn group_json(id: &str, slug: &str, is_member: bool) -> Value {
    json!({
        "id": id,
        "slug": slug,
        "name": format!("Group {slug}"),
        "description": "test group",
        "is_public": true,
        "is_member": is_member,
        "user_role": if is_member { json!("member") } else { Value::Null },
        "members_count": 1,
        "posts_count": 0
    })
}

pub(crate) fn post_json(id: i64, group: &str) -> Value {
    json!({
        "id": id,
        "title": format!("post {id}"),
        "content": "content",
        "author": {"id": 1, "username": "ferris"},
        "group": group
    })
}
