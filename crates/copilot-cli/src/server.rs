//! Browser UI and the JSON analysis endpoint.
//!
//! Each browser session is keyed by the `copilot_session` cookie. Engine
//! calls block, so they run on the blocking pool while holding that
//! session's lock; a second request for the same session waits its turn.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use copilot_contracts::messages::UploadedImage;
use copilot_contracts::session::SessionState;
use copilot_engine::{CopilotEngine, CopilotError, ErrorKind, TurnOutcome};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::page::{chart_preview, render_page, PageView};

pub const SESSION_COOKIE: &str = "copilot_session";
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);
pub const MAX_SESSIONS: usize = 1024;

#[derive(Debug)]
pub struct WebSession {
    pub state: SessionState,
    pub notice: Option<String>,
    pub preview: Option<String>,
}

type SharedSession = Arc<Mutex<WebSession>>;

struct RegistryEntry {
    session: SharedSession,
    last_seen: Instant,
    // Recency order; instants can tie.
    tick: u64,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<String, RegistryEntry>,
    tick: u64,
}

impl Sessions {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Drops idle sessions, then the least recently seen until one slot is free.
    fn evict(&mut self, now: Instant, idle_ttl: Duration, capacity: usize) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) <= idle_ttl);
        while self.entries.len() >= capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.tick)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            self.entries.remove(&oldest);
        }
        before - self.entries.len()
    }
}

/// Browser sessions by cookie id, bounded by an idle TTL and a capacity.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<Sessions>>,
    idle_ttl: Duration,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SESSION_IDLE_TTL, MAX_SESSIONS)
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: Arc::default(),
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let expired = now.duration_since(sessions.entries.get(id)?.last_seen) > self.idle_ttl;
        if expired {
            sessions.entries.remove(id);
            debug!(session = %id, "browser session expired");
            return None;
        }
        let tick = sessions.next_tick();
        let entry = sessions.entries.get_mut(id)?;
        entry.last_seen = now;
        entry.tick = tick;
        Some(Arc::clone(&entry.session))
    }

    pub async fn insert(&self, state: SessionState) -> SharedSession {
        let id = state.id().to_string();
        let session = Arc::new(Mutex::new(WebSession {
            state,
            notice: None,
            preview: None,
        }));
        let mut sessions = self.sessions.write().await;
        let evicted = sessions.evict(Instant::now(), self.idle_ttl, self.capacity);
        if evicted > 0 {
            info!(evicted, "browser sessions evicted");
        }
        let tick = sessions.next_tick();
        sessions.entries.insert(
            id,
            RegistryEntry {
                session: Arc::clone(&session),
                last_seen: Instant::now(),
                tick,
            },
        );
        session
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.entries.len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CopilotEngine>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(engine: Arc<CopilotEngine>) -> Self {
        Self {
            engine,
            sessions: SessionRegistry::default(),
        }
    }

    /// Finds the cookie's session or opens a fresh one. The second value is
    /// the id to set as a cookie when a new session was opened.
    async fn session(&self, headers: &HeaderMap) -> (SharedSession, Option<String>) {
        if let Some(id) = session_cookie(headers) {
            if let Some(session) = self.sessions.get(&id).await {
                return (session, None);
            }
        }
        let state = self.engine.open_session();
        let id = state.id().to_string();
        info!(session = %id, "browser session opened");
        (self.sessions.insert(state).await, Some(id))
    }

    /// Runs `action` on the blocking pool with the session locked.
    async fn run_locked<T, F>(&self, session: SharedSession, action: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&CopilotEngine, &mut WebSession) -> T + Send + 'static,
    {
        let mut guard: OwnedMutexGuard<WebSession> = session.lock_owned().await;
        let engine = Arc::clone(&self.engine);
        let value = tokio::task::spawn_blocking(move || action(&engine, &mut guard)).await?;
        Ok(value)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/ask", post(ask))
        .route("/suggestions/:index", post(pick_suggestion))
        .route("/reset", post(reset))
        .route("/analyze", post(analyze))
        .route("/health", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[instrument(skip(state))]
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("chart co-pilot listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

pub struct AppError(anyhow::Error);

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        warn!(error = %format!("{:#}", self.0), "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn with_cookie(new_session: Option<String>, response: impl IntoResponse) -> Response {
    match new_session {
        Some(id) => (
            [(
                header::SET_COOKIE,
                format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"),
            )],
            response,
        )
            .into_response(),
        None => response.into_response(),
    }
}

fn back_to_page(new_session: Option<String>) -> Response {
    with_cookie(new_session, Redirect::to("/"))
}

/// Stores the banner for a finished action: the primary failure, or the
/// suggestion failure that came with a successful answer.
fn record_outcome(session: &mut WebSession, outcome: Result<TurnOutcome, CopilotError>) {
    session.notice = match outcome {
        Ok(TurnOutcome {
            suggestion_error: Some(err),
            ..
        }) => Some(format!("Suggested questions are unavailable. {}", err.user_message())),
        Ok(_) => None,
        Err(err) => Some(err.user_message()),
    };
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, new_session) = state.session(&headers).await;
    let mut guard = session.lock().await;
    let notice = guard.notice.take();
    let html = render_page(&PageView {
        state: &guard.state,
        notice: notice.as_deref(),
        preview: guard.preview.as_deref(),
        model: state.engine.model(),
    });
    drop(guard);
    with_cookie(new_session, Html(html))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Option<UploadedImage>, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("could not read the upload: {err}"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().trim().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| format!("could not read the upload: {err}"))?;
        if file_name.is_empty() && bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadedImage::new(file_name, bytes.to_vec())));
    }
    Ok(None)
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let (session, new_session) = state.session(&headers).await;
    let upload = read_upload(&mut multipart).await;
    state
        .run_locked(session, move |engine, session| match upload {
            Ok(Some(image)) => {
                let outcome = engine.start_from_upload(&mut session.state, image);
                if outcome.is_ok() {
                    session.preview = chart_preview(&session.state, &engine.config().normalize);
                }
                record_outcome(session, outcome);
            }
            Ok(None) => session.notice = Some("Choose an image file to upload.".to_string()),
            Err(message) => session.notice = Some(message),
        })
        .await?;
    Ok(back_to_page(new_session))
}

#[derive(Debug, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    question: String,
}

async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AskForm>,
) -> Result<Response, AppError> {
    let (session, new_session) = state.session(&headers).await;
    state
        .run_locked(session, move |engine, session| {
            let outcome = engine.submit_question(&mut session.state, &form.question);
            record_outcome(session, outcome);
        })
        .await?;
    Ok(back_to_page(new_session))
}

async fn pick_suggestion(
    State(state): State<AppState>,
    Path(choice): Path<usize>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (session, new_session) = state.session(&headers).await;
    state
        .run_locked(session, move |engine, session| {
            let outcome = engine.submit_suggestion(&mut session.state, choice);
            record_outcome(session, outcome);
        })
        .await?;
    Ok(back_to_page(new_session))
}

async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let (session, new_session) = state.session(&headers).await;
    state
        .run_locked(session, |engine, session| {
            engine.reset(&mut session.state);
            session.notice = None;
            session.preview = None;
        })
        .await?;
    Ok(back_to_page(new_session))
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn analyze_status(err: &CopilotError) -> StatusCode {
    match err.kind() {
        ErrorKind::RemoteCall | ErrorKind::ResponseParse => StatusCode::BAD_GATEWAY,
        ErrorKind::ImageDecode | ErrorKind::InvalidAction => StatusCode::BAD_REQUEST,
    }
}

async fn analyze(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let image = match read_upload(&mut multipart).await {
        Ok(Some(image)) => image,
        Ok(None) => return Ok(json_error(StatusCode::BAD_REQUEST, "missing multipart field 'file'")),
        Err(message) => return Ok(json_error(StatusCode::BAD_REQUEST, message)),
    };
    let engine = Arc::clone(&state.engine);
    let result = tokio::task::spawn_blocking(move || engine.analyze_once(&image)).await?;
    Ok(match result {
        Ok(analysis) => Json(json!({ "openai_analysis": analysis })).into_response(),
        Err(err) => json_error(analyze_status(&err), err.user_message()),
    })
}
