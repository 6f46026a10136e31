//! In-memory fake of the hosted backend, just enough wire surface to
//! exercise the client end-to-end: auth endpoints, table CRUD, and the
//! per-table NDJSON change feeds.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Form, Json, Router};
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use tasklane::app::App;
use tasklane::config::Config;
use tasklane::models::{
    ChangeEvent, EventType, List, ListPatch, NewList, NewTask, Profile, ProfilePatch, Session,
    Task, TaskPatch, User,
};

pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "hunter2";

// ── Backend state ─────────────────────────────────────────────────────

struct Account {
    user: User,
    password: String,
}

struct BackendState {
    users: Mutex<Vec<Account>>,
    profiles: Mutex<Vec<Profile>>,
    lists: Mutex<Vec<List>>,
    tasks: Mutex<Vec<Task>>,
    /// access token → user id
    sessions: Mutex<HashMap<String, Uuid>>,
    /// refresh token → user id
    refresh_tokens: Mutex<HashMap<String, Uuid>>,
    lists_feed: broadcast::Sender<ChangeEvent<List>>,
    tasks_feed: broadcast::Sender<ChangeEvent<Task>>,
    list_patch_calls: AtomicUsize,
    fail_next_list_patch: Mutex<Option<Uuid>>,
    /// Milliseconds to stall the next GET /api/lists response, applied
    /// after the state snapshot is taken (for last-write-wins race tests).
    delay_next_get_lists: Mutex<Option<u64>>,
}

impl BackendState {
    fn new() -> Self {
        let (lists_feed, _) = broadcast::channel(64);
        let (tasks_feed, _) = broadcast::channel(64);
        Self {
            users: Mutex::new(Vec::new()),
            profiles: Mutex::new(Vec::new()),
            lists: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            refresh_tokens: Mutex::new(HashMap::new()),
            lists_feed,
            tasks_feed,
            list_patch_calls: AtomicUsize::new(0),
            fail_next_list_patch: Mutex::new(None),
            delay_next_get_lists: Mutex::new(None),
        }
    }

    fn issue_session(&self, user: User) -> Session {
        let access_token = format!("acc-{}", Uuid::new_v4());
        let refresh_token = format!("ref-{}", Uuid::new_v4());
        self.sessions
            .lock()
            .unwrap()
            .insert(access_token.clone(), user.id);
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh_token.clone(), user.id);
        Session {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::hours(1),
            user,
        }
    }

    fn user_by_id(&self, id: Uuid) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.user.id == id)
            .map(|a| a.user.clone())
    }

    fn task_count(&self, list_id: Uuid) -> i64 {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.list_id == list_id)
            .count() as i64
    }
}

type Shared = Arc<BackendState>;
type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn authed_user(state: &BackendState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Not signed in"))?;
    let user_id = state
        .sessions
        .lock()
        .unwrap()
        .get(token)
        .copied()
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;
    state
        .user_by_id(user_id)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Unknown user"))
}

// ── Auth endpoints ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SignupRequest {
    email: String,
    password: String,
    full_name: Option<String>,
}

async fn signup(
    State(state): State<Shared>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<User>, ApiError> {
    let mut users = state.users.lock().unwrap();
    if users.iter().any(|a| a.user.email == req.email) {
        return Err(api_error(StatusCode::CONFLICT, "Email already registered"));
    }
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: req.email.clone(),
        full_name: req.full_name.clone(),
        created_at: now,
        last_sign_in_at: None,
    };
    users.push(Account {
        user: user.clone(),
        password: req.password,
    });
    state.profiles.lock().unwrap().push(Profile {
        id: user.id,
        email: req.email,
        full_name: req.full_name,
        avatar_url: None,
        created_at: now,
        updated_at: now,
    });
    Ok(Json(user))
}

#[derive(Deserialize)]
struct TokenRequest {
    grant_type: String,
    email: Option<String>,
    password: Option<String>,
    refresh_token: Option<String>,
}

async fn token(
    State(state): State<Shared>,
    Form(req): Form<TokenRequest>,
) -> Result<Json<Session>, ApiError> {
    match req.grant_type.as_str() {
        "password" => {
            let (email, password) = match (req.email, req.password) {
                (Some(e), Some(p)) => (e, p),
                _ => return Err(api_error(StatusCode::BAD_REQUEST, "Missing credentials")),
            };
            let user = {
                let users = state.users.lock().unwrap();
                users
                    .iter()
                    .find(|a| a.user.email == email && a.password == password)
                    .map(|a| a.user.clone())
            };
            let mut user = user.ok_or_else(|| {
                api_error(StatusCode::UNAUTHORIZED, "Invalid login credentials")
            })?;
            user.last_sign_in_at = Some(Utc::now());
            Ok(Json(state.issue_session(user)))
        }
        "refresh_token" => {
            let token = req
                .refresh_token
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing refresh token"))?;
            let user_id = state
                .refresh_tokens
                .lock()
                .unwrap()
                .remove(&token)
                .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;
            let user = state
                .user_by_id(user_id)
                .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Unknown user"))?;
            Ok(Json(state.issue_session(user)))
        }
        other => Err(api_error(
            StatusCode::BAD_REQUEST,
            &format!("Unsupported grant type: {}", other),
        )),
    }
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.sessions.lock().unwrap().remove(token);
    }
    StatusCode::NO_CONTENT
}

async fn current_user(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    authed_user(&state, &headers).map(Json)
}

async fn recover() -> Json<serde_json::Value> {
    Json(json!({}))
}

// ── List endpoints ────────────────────────────────────────────────────

async fn get_lists(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> Result<Json<Vec<List>>, ApiError> {
    authed_user(&state, &headers)?;
    let mut rows: Vec<List> = state.lists.lock().unwrap().clone();
    rows.sort_by_key(|l| l.position);
    for row in &mut rows {
        row.task_count = state.task_count(row.id);
    }
    // Snapshot first, then stall: a delayed response carries stale data.
    let delay = state.delay_next_get_lists.lock().unwrap().take();
    if let Some(ms) = delay {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
    Ok(Json(rows))
}

async fn create_list(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(new): Json<NewList>,
) -> Result<(StatusCode, Json<List>), ApiError> {
    let user = authed_user(&state, &headers)?;
    let now = Utc::now();
    let list = List {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: new.name,
        description: new.description,
        color: new.color.unwrap_or_else(|| "#3B82F6".to_string()),
        position: new.position,
        task_count: 0,
        created_at: now,
        updated_at: now,
    };
    state.lists.lock().unwrap().push(list.clone());
    let _ = state.lists_feed.send(ChangeEvent {
        event_type: EventType::Insert,
        new: Some(list.clone()),
        old: None,
    });
    Ok((StatusCode::CREATED, Json(list)))
}

async fn update_list(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<ListPatch>,
) -> Result<Json<List>, ApiError> {
    authed_user(&state, &headers)?;
    state.list_patch_calls.fetch_add(1, Ordering::SeqCst);
    if state.fail_next_list_patch.lock().unwrap().take_if(|f| *f == id).is_some() {
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Simulated backend failure"));
    }

    let mut lists = state.lists.lock().unwrap();
    let Some(row) = lists.iter_mut().find(|l| l.id == id) else {
        return Err(api_error(StatusCode::NOT_FOUND, "List not found"));
    };
    let old = row.clone();
    if let Some(name) = patch.name {
        row.name = name;
    }
    if let Some(description) = patch.description {
        row.description = Some(description);
    }
    if let Some(color) = patch.color {
        row.color = color;
    }
    if let Some(position) = patch.position {
        row.position = position;
    }
    row.updated_at = Utc::now();
    let updated = row.clone();
    drop(lists);

    let _ = state.lists_feed.send(ChangeEvent {
        event_type: EventType::Update,
        new: Some(updated.clone()),
        old: Some(old),
    });
    Ok(Json(updated))
}

async fn delete_list(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authed_user(&state, &headers)?;
    let removed = {
        let mut lists = state.lists.lock().unwrap();
        let removed = lists.iter().find(|l| l.id == id).cloned();
        lists.retain(|l| l.id != id);
        removed
    };
    if let Some(row) = removed {
        // Referential integrity: the list's tasks go with it.
        state.tasks.lock().unwrap().retain(|t| t.list_id != id);
        let _ = state.lists_feed.send(ChangeEvent {
            event_type: EventType::Delete,
            new: None,
            old: Some(row),
        });
    }
    // Deleting an id the backend no longer has is still a success.
    Ok(StatusCode::NO_CONTENT)
}

// ── Task endpoints ────────────────────────────────────────────────────

async fn get_tasks(
    State(state): State<Shared>,
    Path(list_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    authed_user(&state, &headers)?;
    let mut rows: Vec<Task> = state
        .tasks
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.list_id == list_id)
        .cloned()
        .collect();
    rows.sort_by(|a, b| (a.position, a.created_at).cmp(&(b.position, b.created_at)));
    Ok(Json(rows))
}

async fn create_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(new): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    authed_user(&state, &headers)?;
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        list_id: new.list_id,
        title: new.title,
        description: new.description,
        completed: false,
        priority: new.priority.unwrap_or_default(),
        position: new.position,
        created_at: now,
        updated_at: now,
    };
    state.tasks.lock().unwrap().push(task.clone());
    let _ = state.tasks_feed.send(ChangeEvent {
        event_type: EventType::Insert,
        new: Some(task.clone()),
        old: None,
    });
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    authed_user(&state, &headers)?;
    let mut tasks = state.tasks.lock().unwrap();
    let Some(row) = tasks.iter_mut().find(|t| t.id == id) else {
        return Err(api_error(StatusCode::NOT_FOUND, "Task not found"));
    };
    let old = row.clone();
    if let Some(title) = patch.title {
        row.title = title;
    }
    if let Some(description) = patch.description {
        row.description = Some(description);
    }
    if let Some(completed) = patch.completed {
        row.completed = completed;
    }
    if let Some(priority) = patch.priority {
        row.priority = priority;
    }
    if let Some(position) = patch.position {
        row.position = position;
    }
    row.updated_at = Utc::now();
    let updated = row.clone();
    drop(tasks);

    let _ = state.tasks_feed.send(ChangeEvent {
        event_type: EventType::Update,
        new: Some(updated.clone()),
        old: Some(old),
    });
    Ok(Json(updated))
}

async fn delete_task(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authed_user(&state, &headers)?;
    let removed = {
        let mut tasks = state.tasks.lock().unwrap();
        let removed = tasks.iter().find(|t| t.id == id).cloned();
        tasks.retain(|t| t.id != id);
        removed
    };
    if let Some(row) = removed {
        let _ = state.tasks_feed.send(ChangeEvent {
            event_type: EventType::Delete,
            new: None,
            old: Some(row),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search_tasks(
    State(state): State<Shared>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    authed_user(&state, &headers)?;
    let needle = query.q.to_lowercase();
    let mut rows: Vec<Task> = state
        .tasks
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.title.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(rows))
}

// ── Profile endpoints ─────────────────────────────────────────────────

async fn get_profile(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Profile>, ApiError> {
    authed_user(&state, &headers)?;
    state
        .profiles
        .lock()
        .unwrap()
        .iter()
        .find(|p| p.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Profile not found"))
}

async fn update_profile(
    State(state): State<Shared>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, ApiError> {
    authed_user(&state, &headers)?;
    let mut profiles = state.profiles.lock().unwrap();
    let Some(row) = profiles.iter_mut().find(|p| p.id == id) else {
        return Err(api_error(StatusCode::NOT_FOUND, "Profile not found"));
    };
    if let Some(full_name) = patch.full_name {
        row.full_name = Some(full_name);
    }
    if let Some(avatar_url) = patch.avatar_url {
        row.avatar_url = Some(avatar_url);
    }
    row.updated_at = Utc::now();
    Ok(Json(row.clone()))
}

// ── Change feeds ──────────────────────────────────────────────────────

fn ndjson_stream<T>(rx: broadcast::Receiver<ChangeEvent<T>>) -> Body
where
    T: Clone + serde::Serialize + Send + 'static,
{
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let mut line = serde_json::to_string(&event).expect("event serializes");
                line.push('\n');
                Some(Ok::<_, std::convert::Infallible>(line))
            }
            // A lagged receiver just misses events, like a slow realtime client.
            Err(_) => None,
        }
    });
    Body::from_stream(stream)
}

async fn feed_lists(State(state): State<Shared>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        ndjson_stream(state.lists_feed.subscribe()),
    )
}

#[derive(Deserialize)]
struct TaskFeedQuery {
    list_id: Option<Uuid>,
}

async fn feed_tasks(
    State(state): State<Shared>,
    Query(query): Query<TaskFeedQuery>,
) -> impl IntoResponse {
    let filter = query.list_id;
    let stream = BroadcastStream::new(state.tasks_feed.subscribe()).filter_map(move |result| {
        let filter = filter;
        async move {
            match result {
                Ok(event) => {
                    let row_list = event
                        .new
                        .as_ref()
                        .or(event.old.as_ref())
                        .map(|t| t.list_id);
                    if filter.is_some() && row_list != filter {
                        return None;
                    }
                    let mut line = serde_json::to_string(&event).expect("event serializes");
                    line.push('\n');
                    Some(Ok::<_, std::convert::Infallible>(line))
                }
                Err(_) => None,
            }
        }
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
}

// ── Router & harness ──────────────────────────────────────────────────

fn router(state: Shared) -> Router {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/token", post(token))
        .route("/auth/logout", post(logout))
        .route("/auth/user", get(current_user))
        .route("/auth/recover", post(recover))
        .route("/api/lists", get(get_lists).post(create_list))
        .route("/api/lists/{id}", patch(update_list).delete(delete_list))
        .route("/api/lists/{id}/tasks", get(get_tasks))
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/search", get(search_tasks))
        .route("/api/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/api/profiles/{id}", get(get_profile).patch(update_profile))
        .route("/api/feed/lists", get(feed_lists))
        .route("/api/feed/tasks", get(feed_tasks))
        .with_state(state)
}

pub struct TestBackend {
    pub base_url: String,
    state: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl TestBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(BackendState::new());
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test backend serve");
        });
        Self {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }

    /// Register the default test account and return its user.
    pub fn seed_user(&self) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: EMAIL.to_string(),
            full_name: Some("Test User".to_string()),
            created_at: now,
            last_sign_in_at: None,
        };
        self.state.users.lock().unwrap().push(Account {
            user: user.clone(),
            password: PASSWORD.to_string(),
        });
        self.state.profiles.lock().unwrap().push(Profile {
            id: user.id,
            email: EMAIL.to_string(),
            full_name: Some("Test User".to_string()),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        });
        user
    }

    /// Insert a list row behind the client's back (no feed event), as if it
    /// had existed all along.
    pub fn insert_list_row(&self, user_id: Uuid, name: &str, position: i32) -> List {
        let now = Utc::now();
        let list = List {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            description: None,
            color: "#3B82F6".to_string(),
            position,
            task_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.lists.lock().unwrap().push(list.clone());
        list
    }

    pub fn insert_task_row(&self, list_id: Uuid, title: &str, position: i32) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            list_id,
            title: title.to_string(),
            description: None,
            completed: false,
            priority: Default::default(),
            position,
            created_at: now,
            updated_at: now,
        };
        self.state.tasks.lock().unwrap().push(task.clone());
        task
    }

    pub fn remove_profile(&self, id: Uuid) {
        self.state.profiles.lock().unwrap().retain(|p| p.id != id);
    }

    /// Current list rows, ascending by position.
    pub fn list_rows(&self) -> Vec<List> {
        let mut rows = self.state.lists.lock().unwrap().clone();
        rows.sort_by_key(|l| l.position);
        rows
    }

    pub fn list_patch_calls(&self) -> usize {
        self.state.list_patch_calls.load(Ordering::SeqCst)
    }

    pub fn reset_list_patch_calls(&self) {
        self.state.list_patch_calls.store(0, Ordering::SeqCst);
    }

    /// Make the next PATCH against this list id fail once with a 500.
    pub fn fail_next_list_patch(&self, id: Uuid) {
        *self.state.fail_next_list_patch.lock().unwrap() = Some(id);
    }

    /// Stall the next GET /api/lists response for `ms` after it snapshots
    /// state.
    pub fn delay_next_get_lists(&self, ms: u64) {
        *self.state.delay_next_get_lists.lock().unwrap() = Some(ms);
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Build an app wired to the fake backend, with its session file inside the
/// given temp dir.
pub fn test_app(backend: &TestBackend, dir: &tempfile::TempDir) -> App {
    let config = Config::from_parts(
        backend.base_url.clone(),
        "test-service-key",
        dir.path().join("session.json"),
    );
    App::new(config)
}

/// Seed the default account and sign the app in.
pub async fn sign_in(backend: &TestBackend, app: &App) -> User {
    let user = backend.seed_user();
    app.auth
        .sign_in(EMAIL, PASSWORD)
        .await
        .expect("test sign-in succeeds");
    user
}

/// Poll until `predicate` holds or the timeout elapses. Used to observe
/// feed-driven mutations, which land asynchronously.
pub async fn wait_for(mut predicate: impl FnMut() -> bool, what: &str) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}
