use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::schemas::exam::{ExamLevel, ExamStructureFile, ExamTextsFile, SolutionsFile};
use crate::schemas::remote::{RemoteStatus, StatusResponse, SubmitAck, SubmitRequest};
use crate::schemas::student::{LoginRequest, StudentIdentity};
use crate::services::exam_content::ExamContent;
use crate::services::remote_session::{RemoteError, RemoteSession};

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn clear_wavy_env() {
    let keys: Vec<String> =
        std::env::vars().map(|(key, _)| key).filter(|key| key.starts_with("WAVY_")).collect();
    for key in keys {
        std::env::remove_var(key);
    }
}

/// Scratch directory removed on drop.
pub(crate) struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub(crate) fn new() -> Self {
        let path = std::env::temp_dir().join(format!("wavy-learn-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn fixture_structure() -> Value {
    json!({
        "parts": [
            {
                "id": "leseverstehen_teil_3",
                "type": "matching_situations",
                "title": "Leseverstehen Teil 3",
                "instruction": "Lesen Sie die Situationen und die Anzeigen.",
                "items": [{ "question_id": 1 }, { "question_id": 2 }],
                "options": [{ "id": "a" }, { "id": "b" }, { "id": "x" }]
            },
            {
                "id": "leseverstehen_teil_2",
                "type": "multiple_choice",
                "title": "Leseverstehen Teil 2",
                "items": [{
                    "question_id": 6,
                    "question": "Warum zieht Anna um?",
                    "choices": [
                        { "key": "a", "text": "Wegen der Arbeit" },
                        { "key": "b", "text": "Wegen der Familie" },
                        { "key": "c", "text": "Wegen des Wetters" }
                    ]
                }]
            },
            {
                "id": "sprachbausteine_teil_1",
                "type": "gap_fill_choice",
                "title": "Sprachbausteine Teil 1",
                "items": [{ "question_id": 21, "choices": ["der", "die", "das"] }]
            },
            {
                "id": "sprachbausteine_teil_2",
                "type": "gap_fill_bank",
                "title": "Sprachbausteine Teil 2",
                "items": [{ "question_id": "31" }],
                "word_bank": [{ "key": "A", "word": "weil" }, { "key": "B", "word": "obwohl" }]
            }
        ]
    })
}

fn fixture_texts() -> Value {
    json!({
        "texts": {
            "leseverstehen_teil_3": {
                "situations": [{ "id": 1, "text": "Sie suchen eine Wohnung." }],
                "ads": [
                    { "id": "a", "title": "Wohnung frei", "text": "2 Zimmer in Mitte." },
                    { "id": "b", "text": "Sprachkurs ab Mai." }
                ]
            },
            "leseverstehen_teil_2": {
                "title": "Ein neues Leben",
                "headline": "Reportage",
                "content": "Anna wohnt seit zwei Jahren in Berlin."
            },
            "sprachbausteine_teil_1": { "content": "Ich suche __(21)__ Wohnung." },
            "sprachbausteine_teil_2": {
                "content": "Ich bleibe zu Hause, __( 31 )__ ich krank bin."
            }
        }
    })
}

fn fixture_solutions() -> Value {
    json!({
        "exam_id": "telc_b1_fixture",
        "solutions": { "1": "a", "2": "x", "6": "b", "21": "b", "31": "a" }
    })
}

/// Writes the fixture exam under `<content_dir>/<level>/`.
pub(crate) fn write_fixture_content(content_dir: &Path, level: ExamLevel) {
    let dir = content_dir.join(level.as_str());
    std::fs::create_dir_all(&dir).expect("create content dir");
    for (name, value) in [
        ("exam_data.json", fixture_structure()),
        ("exam_texts.json", fixture_texts()),
        ("exam_solutions.json", fixture_solutions()),
    ] {
        let raw = serde_json::to_vec_pretty(&value).expect("serialize fixture");
        std::fs::write(dir.join(name), raw).expect("write fixture");
    }
}

/// B1 fixture: questions 1, 2 (matching), 6 (multiple choice), 21 (gap choice), 31 (word bank).
pub(crate) fn fixture_content() -> ExamContent {
    let structure: ExamStructureFile =
        serde_json::from_value(fixture_structure()).expect("fixture structure");
    let texts: ExamTextsFile = serde_json::from_value(fixture_texts()).expect("fixture texts");
    let solutions: SolutionsFile =
        serde_json::from_value(fixture_solutions()).expect("fixture solutions");
    ExamContent::assemble(ExamLevel::B1, structure, texts, solutions).expect("fixture content")
}

pub(crate) fn status(status: RemoteStatus, remaining_ms: Option<f64>) -> StatusResponse {
    StatusResponse { status, time_remaining: remaining_ms, config: None, duration_minutes: None }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SubmitScript {
    Accept,
    Unavailable,
    Status(StatusCode),
}

#[derive(Default)]
struct ScriptState {
    statuses: VecDeque<Option<StatusResponse>>,
    last_status: Option<StatusResponse>,
    submits: VecDeque<SubmitScript>,
    submitted: Vec<(Uuid, SubmitRequest)>,
    login_rejection: Option<String>,
    logins: usize,
}

/// In-memory remote. Status answers are consumed in order, then the last success repeats.
#[derive(Default)]
pub(crate) struct ScriptedRemote {
    state: StdMutex<ScriptState>,
}

impl ScriptedRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_status(&self, status: StatusResponse) {
        self.state.lock().expect("lock").statuses.push_back(Some(status));
    }

    pub(crate) fn push_status_failure(&self) {
        self.state.lock().expect("lock").statuses.push_back(None);
    }

    pub(crate) fn script_submits(&self, script: impl IntoIterator<Item = SubmitScript>) {
        self.state.lock().expect("lock").submits.extend(script);
    }

    pub(crate) fn reject_logins(&self, reason: &str) {
        self.state.lock().expect("lock").login_rejection = Some(reason.to_string());
    }

    pub(crate) fn submit_count(&self) -> usize {
        self.state.lock().expect("lock").submitted.len()
    }

    pub(crate) fn submit_keys(&self) -> Vec<Uuid> {
        self.state.lock().expect("lock").submitted.iter().map(|(key, _)| *key).collect()
    }

    pub(crate) fn submitted_requests(&self) -> Vec<SubmitRequest> {
        self.state.lock().expect("lock").submitted.iter().map(|(_, req)| req.clone()).collect()
    }

    pub(crate) fn login_count(&self) -> usize {
        self.state.lock().expect("lock").logins
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Status { status: StatusCode::SERVICE_UNAVAILABLE, body: "unavailable".into() }
}

#[async_trait]
impl RemoteSession for ScriptedRemote {
    async fn login(&self, request: &LoginRequest) -> Result<StudentIdentity, RemoteError> {
        let mut state = self.state.lock().expect("lock");
        state.logins += 1;
        match &state.login_rejection {
            Some(reason) => Err(RemoteError::Rejected(reason.clone())),
            None => Ok(request.fallback_identity()),
        }
    }

    async fn status(&self) -> Result<StatusResponse, RemoteError> {
        let mut state = self.state.lock().expect("lock");
        match state.statuses.pop_front() {
            Some(Some(status)) => {
                state.last_status = Some(status.clone());
                Ok(status)
            }
            Some(None) => Err(unavailable()),
            None => state.last_status.clone().ok_or_else(unavailable),
        }
    }

    async fn submit(
        &self,
        request: &SubmitRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmitAck, RemoteError> {
        let mut state = self.state.lock().expect("lock");
        state.submitted.push((idempotency_key, request.clone()));
        match state.submits.pop_front().unwrap_or(SubmitScript::Accept) {
            SubmitScript::Accept => Ok(json!({ "success": true })),
            SubmitScript::Unavailable => Err(unavailable()),
            SubmitScript::Status(status) => {
                Err(RemoteError::Status { status, body: "rejected".to_string() })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReceivedSubmission {
    pub(crate) key: Option<String>,
    pub(crate) body: Value,
}

struct FakeState {
    status: Value,
    login_rejection: Option<String>,
    failing_submits: usize,
    submissions: Vec<ReceivedSubmission>,
    frames: Vec<String>,
}

type SharedFakeState = Arc<StdMutex<FakeState>>;

/// Exam server on an ephemeral local port: `/api/*` plus a push socket at `/`.
pub(crate) struct FakeServer {
    addr: SocketAddr,
    state: SharedFakeState,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(StdMutex::new(FakeState {
            status: json!({ "status": "waiting", "timeRemaining": 0 }),
            login_rejection: None,
            failing_submits: 0,
            submissions: Vec::new(),
            frames: Vec::new(),
        }));

        let app = Router::new()
            .route("/", get(push_socket))
            .route("/api/login", post(login))
            .route("/api/status", get(status_handler))
            .route("/api/submit", post(submit))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub(crate) fn set_status(&self, status: Value) {
        self.state.lock().expect("lock").status = status;
    }

    pub(crate) fn reject_logins(&self, reason: &str) {
        self.state.lock().expect("lock").login_rejection = Some(reason.to_string());
    }

    pub(crate) fn fail_submissions(&self, count: usize) {
        self.state.lock().expect("lock").failing_submits = count;
    }

    pub(crate) fn push_frames(&self, frames: Vec<String>) {
        self.state.lock().expect("lock").frames = frames;
    }

    pub(crate) fn submissions(&self) -> Vec<ReceivedSubmission> {
        self.state.lock().expect("lock").submissions.clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn login(
    State(state): State<SharedFakeState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let rejection = state.lock().expect("lock").login_rejection.clone();
    match rejection {
        Some(error) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "error": error })))
        }
        None => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "student": { "name": body["name"], "phone": body["phone"] }
            })),
        ),
    }
}

async fn status_handler(State(state): State<SharedFakeState>) -> Json<Value> {
    Json(state.lock().expect("lock").status.clone())
}

async fn submit(
    State(state): State<SharedFakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().expect("lock");
    if state.failing_submits > 0 {
        state.failing_submits -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "busy" })));
    }
    let key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.submissions.push(ReceivedSubmission { key, body });
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn push_socket(
    State(state): State<SharedFakeState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    let frames = state.lock().expect("lock").frames.clone();
    upgrade.on_upgrade(move |mut socket| async move {
        for frame in frames {
            if socket.send(WsMessage::Text(frame)).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}
