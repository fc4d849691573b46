use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;
use validator::Validate;

use crate::core::config::{Settings, SubmitSettings};
use crate::core::metrics;
use crate::repositories::identity::IdentityStore;
use crate::repositories::outbox::SubmissionOutbox;
use crate::schemas::remote::{StatusResponse, TimeUpdate};
use crate::schemas::student::{LoginRequest, StudentIdentity};
use crate::services::countdown::CountdownTimer;
use crate::services::exam_session::{
    ExamSession, FinishReason, PendingSubmission, SessionError, SessionStatus, SessionView,
    SubmissionState, Transition,
};
use crate::services::push_channel::run_push_listener;
use crate::services::remote_session::{RemoteError, RemoteSession};
use crate::services::submission::{self, FlushReport};

const PUSH_BUFFER: usize = 16;
const SUBMIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_INCOMPLETE: &str = "Name and phone are required.";

#[derive(Debug, Clone)]
pub(crate) struct RunnerConfig {
    pub(crate) poll_interval: Duration,
    pub(crate) tick: Duration,
    pub(crate) submit: SubmitSettings,
    pub(crate) push_url: Option<String>,
}

impl RunnerConfig {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let remote = settings.remote();
        Self {
            poll_interval: settings.session().poll_interval,
            tick: settings.session().tick,
            submit: settings.submit(),
            push_url: remote.push_enabled.then(|| remote.ws_url.clone()),
        }
    }
}

enum SessionEvent {
    Poll(Result<StatusResponse, String>),
    TimeExpired,
    LoginSubmitted(LoginRequest),
    LoginCompleted(Result<StudentIdentity, String>),
    Answer {
        question_id: String,
        option: String,
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    FinishRequested,
    Logout {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SubmitFinished {
        idempotency_key: Uuid,
        state: SubmissionState,
    },
    OutboxFlushed(FlushReport),
    Close,
}

/// Front-end side of a running session. Every mutation goes through the runner task.
pub(crate) struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub(crate) fn login(&self, name: &str, phone: &str) {
        self.send(SessionEvent::LoginSubmitted(LoginRequest::new(name, phone)));
    }

    pub(crate) async fn answer(
        &self,
        question_id: &str,
        option: &str,
    ) -> Result<String, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionEvent::Answer {
            question_id: question_id.to_string(),
            option: option.to_string(),
            reply,
        });
        response.await.unwrap_or(Err(SessionError::Closed))
    }

    pub(crate) fn finish(&self) {
        self.send(SessionEvent::FinishRequested);
    }

    pub(crate) async fn logout(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionEvent::Logout { reply });
        response.await.unwrap_or(Err(SessionError::Closed))
    }

    /// Stops the runner and waits for its teardown.
    pub(crate) async fn close(self) {
        self.send(SessionEvent::Close);
        self.join().await;
    }

    pub(crate) async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Session runner join failed");
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Session runner already stopped");
        }
    }
}

pub(crate) fn spawn(
    session: ExamSession,
    remote: Arc<dyn RemoteSession>,
    identity: IdentityStore,
    outbox: SubmissionOutbox,
    config: RunnerConfig,
    shutdown: watch::Receiver<bool>,
) -> SessionHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(session.view(None));
    let (stop, _) = watch::channel(false);

    let runner = Runner {
        session,
        remote,
        identity,
        outbox,
        config,
        events: events_tx.clone(),
        view: view_tx,
        stop,
        timer: None,
        clock: None,
        poll_task: None,
        push_task: None,
        submit_task: None,
        poll_now: Arc::new(Notify::new()),
        flushing: false,
        submission_key: None,
    };
    let task = tokio::spawn(runner.run(events_rx, shutdown));

    SessionHandle { events: events_tx, view: view_rx, task }
}

struct Runner {
    session: ExamSession,
    remote: Arc<dyn RemoteSession>,
    identity: IdentityStore,
    outbox: SubmissionOutbox,
    config: RunnerConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Sender<SessionView>,
    stop: watch::Sender<bool>,
    timer: Option<CountdownTimer>,
    clock: Option<watch::Receiver<Duration>>,
    poll_task: Option<JoinHandle<()>>,
    push_task: Option<JoinHandle<()>>,
    submit_task: Option<JoinHandle<()>>,
    poll_now: Arc<Notify>,
    flushing: bool,
    submission_key: Option<Uuid>,
}

impl Runner {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let saved = match self.identity.load().await {
            Ok(saved) => saved,
            Err(err) => {
                tracing::warn!(error = %err, "Could not read saved student, asking for login");
                None
            }
        };
        self.session.resume(saved).await;
        self.publish();

        self.poll_task = Some(tokio::spawn(poll_loop(
            self.remote.clone(),
            self.events.clone(),
            self.config.poll_interval,
            self.poll_now.clone(),
            self.stop.subscribe(),
        )));

        let (push_tx, mut push_rx) = mpsc::channel(PUSH_BUFFER);
        let mut push_open = false;
        if let Some(url) = self.config.push_url.clone() {
            push_open = true;
            let listener = run_push_listener(url, push_tx, self.stop.subscribe());
            self.push_task = Some(tokio::spawn(listener));
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Close) | None => break,
                    Some(event) => self.handle(event).await,
                },
                update = push_rx.recv(), if push_open => match update {
                    Some(update) => self.apply_time_update(update),
                    None => push_open = false,
                },
                ticking = clock_changed(&mut self.clock) => {
                    if !ticking {
                        self.clock = None;
                    }
                }
                _ = shutdown.changed() => break,
            }

            self.publish();
            self.stop_polling_when_settled();
        }

        self.teardown().await;
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Poll(Ok(status)) => self.apply_status(status),
            SessionEvent::Poll(Err(reason)) => self.session.apply_poll_failure(reason),
            SessionEvent::TimeExpired => self.finish(FinishReason::TimeExpired),
            SessionEvent::FinishRequested => self.finish(FinishReason::StudentConfirmed),
            SessionEvent::LoginSubmitted(request) => self.start_login(request),
            SessionEvent::LoginCompleted(Ok(student)) => {
                if let Err(err) = self.identity.save(&student).await {
                    tracing::warn!(error = %err, "Failed to persist student identity");
                }
                self.session.logged_in(student).await;
                // Fetch the status now rather than on the next tick.
                self.poll_now.notify_one();
            }
            SessionEvent::LoginCompleted(Err(reason)) => self.session.login_failed(reason),
            SessionEvent::Answer { question_id, option, reply } => {
                let result = self.session.record_answer(&question_id, &option).await;
                let _ = reply.send(result);
            }
            SessionEvent::Logout { reply } => {
                let result = self.session.logout();
                if result.is_ok() {
                    if let Err(err) = self.identity.clear().await {
                        tracing::warn!(error = %err, "Failed to clear saved student");
                    }
                    tracing::info!("Student logged out");
                }
                let _ = reply.send(result);
            }
            SessionEvent::SubmitFinished { idempotency_key, state } => {
                self.submit_task = None;
                match state {
                    SubmissionState::Confirmed => self.session.submission_confirmed().await,
                    SubmissionState::Queued => self.session.submission_failed(true),
                    _ => self.session.submission_failed(false),
                }
                tracing::debug!(%idempotency_key, ?state, "Submission settled");
            }
            SessionEvent::OutboxFlushed(report) => {
                self.flushing = false;
                for sent in report.sent {
                    if self.submission_key == Some(sent.idempotency_key) {
                        self.session.submission_confirmed().await;
                    } else {
                        self.session.replay_confirmed(sent.level, &sent.phone).await;
                    }
                }
            }
            SessionEvent::Close => {}
        }
    }

    fn apply_status(&mut self, status: StatusResponse) {
        let server_remaining = status.remaining();
        match self.session.apply_status(&status, Instant::now()) {
            Transition::Started { remaining } | Transition::Resumed { remaining } => {
                self.start_countdown(remaining);
            }
            Transition::Waiting => self.stop_countdown(),
            Transition::Finished(pending) => self.after_finish(pending),
            Transition::Unchanged => {
                if self.session.status() == SessionStatus::Running {
                    if let (Some(timer), Some(remaining)) = (&self.timer, server_remaining) {
                        timer.resync(remaining);
                    }
                }
            }
        }

        if !self.flushing {
            self.flush_outbox();
        }
    }

    fn apply_time_update(&mut self, update: TimeUpdate) {
        if let Some(remaining) = self.session.apply_time_update(update) {
            if let Some(timer) = &self.timer {
                timer.resync(remaining);
            }
        }
    }

    fn finish(&mut self, reason: FinishReason) {
        let pending = self.session.finish(reason, Instant::now());
        self.after_finish(pending);
    }

    fn start_countdown(&mut self, remaining: Option<Duration>) {
        let Some(initial) = remaining.or(self.session.duration()) else {
            tracing::warn!("Exam running without a known remaining time");
            return;
        };
        if let Some(timer) = &self.timer {
            timer.resync(initial);
            return;
        }

        let events = self.events.clone();
        let timer = CountdownTimer::start(initial, self.config.tick, move || {
            let _ = events.send(SessionEvent::TimeExpired);
        });
        self.clock = Some(timer.subscribe());
        self.timer = Some(timer);
    }

    fn stop_countdown(&mut self) {
        self.timer = None;
        self.clock = None;
    }

    fn after_finish(&mut self, pending: Option<PendingSubmission>) {
        self.stop_countdown();
        let Some(PendingSubmission { idempotency_key, request }) = pending else {
            return;
        };
        self.submission_key = Some(idempotency_key);

        let remote = self.remote.clone();
        let outbox = self.outbox.clone();
        let events = self.events.clone();
        let settings = self.config.submit;
        let level = self.session.level();
        self.submit_task = Some(tokio::spawn(async move {
            let state = match submission::submit_with_retry(
                remote.as_ref(),
                &request,
                idempotency_key,
                settings,
            )
            .await
            {
                Ok(_) => SubmissionState::Confirmed,
                Err(err) if err.is_retryable() => {
                    match submission::enqueue(&outbox, level, request, idempotency_key).await {
                        Ok(()) => SubmissionState::Queued,
                        Err(err) => {
                            tracing::error!(error = %err, "Failed to queue submission for resend");
                            SubmissionState::Failed
                        }
                    }
                }
                Err(_) => SubmissionState::Failed,
            };
            let _ = events.send(SessionEvent::SubmitFinished { idempotency_key, state });
        }));
    }

    fn flush_outbox(&mut self) {
        self.flushing = true;
        let remote = self.remote.clone();
        let outbox = self.outbox.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let report = match submission::flush_outbox(remote.as_ref(), &outbox).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to flush queued submissions");
                    FlushReport::default()
                }
            };
            let _ = events.send(SessionEvent::OutboxFlushed(report));
        });
    }

    fn start_login(&mut self, request: LoginRequest) {
        if self.session.status() != SessionStatus::Login {
            tracing::debug!(status = ?self.session.status(), "Login ignored outside login screen");
            return;
        }
        if let Err(err) = request.validate() {
            tracing::debug!(error = %err, "Login form incomplete");
            self.session.login_failed(LOGIN_INCOMPLETE.to_string());
            return;
        }

        let remote = self.remote.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = remote.login(&request).await.map_err(|err| match err {
                RemoteError::Rejected(reason) => reason,
                other => {
                    tracing::warn!(error = %other, "Login request failed");
                    format!("Connection failed: {other}")
                }
            });
            let _ = events.send(SessionEvent::LoginCompleted(result));
        });
    }

    /// Polling only matters while the exam is live or our submission is unsettled.
    fn stop_polling_when_settled(&mut self) {
        if *self.stop.borrow() || self.session.status() != SessionStatus::Finished {
            return;
        }
        let unsettled = self.session.outcome().is_some_and(|outcome| {
            matches!(outcome.submission, SubmissionState::InFlight | SubmissionState::Queued)
        });
        if !unsettled {
            tracing::info!("Exam settled, stopping background polling");
            self.stop.send_replace(true);
        }
    }

    fn publish(&self) {
        let remaining = self.timer.as_ref().map(CountdownTimer::remaining);
        self.view.send_replace(self.session.view(remaining));
    }

    async fn teardown(mut self) {
        self.stop.send_replace(true);
        self.stop_countdown();

        for handle in [self.poll_task.take(), self.push_task.take()].into_iter().flatten() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Session task join failed");
            }
        }
        if let Some(handle) = self.submit_task.take() {
            if tokio::time::timeout(SUBMIT_DRAIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Submission still in flight at shutdown");
            }
        }
        tracing::info!("Session runner stopped");
    }
}

/// Resolves on every countdown tick; `false` once the timer is gone.
async fn clock_changed(clock: &mut Option<watch::Receiver<Duration>>) -> bool {
    match clock {
        Some(clock) => clock.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn poll_loop(
    remote: Arc<dyn RemoteSession>,
    events: mpsc::UnboundedSender<SessionEvent>,
    period: Duration,
    poll_now: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = poll_now.notified() => ticker.reset(),
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let result = tokio::select! {
            result = remote.status() => result,
            _ = stop.changed() => break,
        };
        let event = match result {
            Ok(status) => {
                metrics::record_poll("ok");
                SessionEvent::Poll(Ok(status))
            }
            Err(err) => {
                metrics::record_poll("error");
                tracing::debug!(error = %err, "Status poll failed");
                SessionEvent::Poll(Err(err.to_string()))
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }

    tracing::debug!("Status polling stopped");
}
