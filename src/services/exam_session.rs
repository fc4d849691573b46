use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::metrics;
use crate::repositories::answers::AnswerStore;
use crate::schemas::exam::ExamLevel;
use crate::schemas::remote::{RemoteStatus, StatusResponse, SubmitRequest, TimeUpdate};
use crate::schemas::student::StudentIdentity;
use crate::schemas::AnswerMap;
use crate::services::exam_content::ExamContent;
use crate::services::scoring::{self, Score, WeightTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionStatus {
    Loading,
    Login,
    Waiting,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishReason {
    ServerFinished,
    TimeExpired,
    StudentConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmissionState {
    InFlight,
    Confirmed,
    Queued,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SessionError {
    #[error("answers are not accepted while the session is {0:?}")]
    NotAccepting(SessionStatus),
    #[error("unknown question {0}")]
    UnknownQuestion(String),
    #[error("option '{option}' is not offered for question {question_id}")]
    InvalidOption { question_id: String, option: String },
    #[error("logout is only possible before the exam starts")]
    LogoutNotAllowed,
    #[error("the session has ended")]
    Closed,
}

/// The right to score and submit one attempt. Issued when the attempt starts and
/// consumed by the first finish, so a second finish has nothing to spend.
#[derive(Debug)]
struct SubmissionToken {
    idempotency_key: Uuid,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingSubmission {
    pub(crate) idempotency_key: Uuid,
    pub(crate) request: SubmitRequest,
}

/// Result of a finished attempt, kept for the results screen.
#[derive(Debug, Clone)]
pub(crate) struct ExamOutcome {
    pub(crate) score: Score,
    pub(crate) reason: FinishReason,
    pub(crate) time_taken: Duration,
    pub(crate) answers: AnswerMap,
    pub(crate) submission: SubmissionState,
}

/// What the status poll changed, for the runner to act on.
#[derive(Debug)]
pub(crate) enum Transition {
    Unchanged,
    Waiting,
    Started { remaining: Option<Duration> },
    Resumed { remaining: Option<Duration> },
    Finished(Option<PendingSubmission>),
}

#[derive(Debug, Clone)]
pub(crate) struct SessionView {
    pub(crate) status: SessionStatus,
    pub(crate) student: Option<StudentIdentity>,
    pub(crate) duration: Option<Duration>,
    pub(crate) remaining: Option<Duration>,
    pub(crate) answers: AnswerMap,
    pub(crate) attempt_started: bool,
    pub(crate) outcome: Option<ExamOutcome>,
    pub(crate) last_error: Option<String>,
    pub(crate) login_error: Option<String>,
    pub(crate) login_failures: u32,
}

/// One student's attempt at one exam level.
pub(crate) struct ExamSession {
    content: Arc<ExamContent>,
    weights: WeightTable,
    data_dir: PathBuf,
    status: SessionStatus,
    student: Option<StudentIdentity>,
    answers: AnswerMap,
    answer_store: Option<AnswerStore>,
    started_at: Option<Instant>,
    duration: Option<Duration>,
    remaining: Option<Duration>,
    token: Option<SubmissionToken>,
    outcome: Option<ExamOutcome>,
    last_error: Option<String>,
    login_error: Option<String>,
    login_failures: u32,
}

impl ExamSession {
    pub(crate) fn new(content: Arc<ExamContent>, weights: WeightTable, data_dir: PathBuf) -> Self {
        Self {
            content,
            weights,
            data_dir,
            status: SessionStatus::Loading,
            student: None,
            answers: AnswerMap::new(),
            answer_store: None,
            started_at: None,
            duration: None,
            remaining: None,
            token: None,
            outcome: None,
            last_error: None,
            login_error: None,
            login_failures: 0,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn level(&self) -> ExamLevel {
        self.content.level
    }

    #[cfg(test)]
    pub(crate) fn student(&self) -> Option<&StudentIdentity> {
        self.student.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    pub(crate) fn outcome(&self) -> Option<&ExamOutcome> {
        self.outcome.as_ref()
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub(crate) fn attempt_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Startup with whatever identity was persisted.
    pub(crate) async fn resume(&mut self, identity: Option<StudentIdentity>) {
        match identity {
            Some(identity) => self.adopt_student(identity).await,
            None => {
                self.status = SessionStatus::Login;
                tracing::info!("No saved student, showing login");
            }
        }
    }

    pub(crate) async fn logged_in(&mut self, identity: StudentIdentity) {
        self.login_error = None;
        self.adopt_student(identity).await;
    }

    pub(crate) fn login_failed(&mut self, reason: String) {
        self.status = SessionStatus::Login;
        self.login_error = Some(reason);
        self.login_failures += 1;
    }

    async fn adopt_student(&mut self, identity: StudentIdentity) {
        let store = AnswerStore::new(&self.data_dir, self.content.level, &identity.phone);
        match store.load().await {
            Ok(answers) => {
                if !answers.is_empty() {
                    let count = answers.len();
                    tracing::info!(key = store.key(), count, "Restored saved answers");
                }
                self.answers = answers;
            }
            Err(err) => {
                tracing::warn!(error = %err, key = store.key(), "Could not read saved answers");
            }
        }
        tracing::info!(phone = %identity.phone, "Student identified, waiting for exam status");
        self.answer_store = Some(store);
        self.student = Some(identity);
        self.status = SessionStatus::Loading;
    }

    /// Only before the attempt starts; the runner clears the identity store.
    pub(crate) fn logout(&mut self) -> Result<(), SessionError> {
        if self.attempt_started() || self.status == SessionStatus::Finished {
            return Err(SessionError::LogoutNotAllowed);
        }
        self.student = None;
        self.answer_store = None;
        self.answers.clear();
        self.status = SessionStatus::Login;
        Ok(())
    }

    /// Applies one successful poll. `Finished` is terminal: later polls change nothing.
    pub(crate) fn apply_status(&mut self, response: &StatusResponse, now: Instant) -> Transition {
        if self.status == SessionStatus::Finished {
            return Transition::Unchanged;
        }
        if let Some(duration) = response.duration_for(self.content.level) {
            self.duration = Some(duration);
        }
        self.last_error = None;

        if self.student.is_none() {
            self.status = SessionStatus::Login;
            return Transition::Unchanged;
        }

        let previous = self.status;
        match response.status {
            RemoteStatus::Waiting => {
                self.status = SessionStatus::Waiting;
                if previous == SessionStatus::Waiting {
                    Transition::Unchanged
                } else {
                    tracing::info!(from = ?previous, "Exam not started, waiting in lobby");
                    Transition::Waiting
                }
            }
            RemoteStatus::Running => {
                self.remaining = response.remaining().or(self.remaining);
                self.status = SessionStatus::Running;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                    self.token = Some(SubmissionToken { idempotency_key: Uuid::new_v4() });
                    tracing::info!(
                        exam_id = %self.content.exam_id,
                        remaining_ms = self.remaining.map(|r| r.as_millis() as u64),
                        "Exam started"
                    );
                    Transition::Started { remaining: self.remaining }
                } else if previous == SessionStatus::Running {
                    Transition::Unchanged
                } else {
                    Transition::Resumed { remaining: self.remaining }
                }
            }
            RemoteStatus::Finished => {
                Transition::Finished(self.finish(FinishReason::ServerFinished, now))
            }
        }
    }

    /// Background polling keeps going; only a fresh success leaves `Error`.
    pub(crate) fn apply_poll_failure(&mut self, reason: String) {
        if matches!(
            self.status,
            SessionStatus::Loading | SessionStatus::Waiting | SessionStatus::Running
        ) && self.student.is_some()
        {
            tracing::warn!(from = ?self.status, reason = %reason, "Lost contact with exam server");
            self.status = SessionStatus::Error;
        }
        if self.status == SessionStatus::Error {
            self.last_error = Some(reason);
        }
    }

    /// Push frames adjust the clock while running and never change status.
    pub(crate) fn apply_time_update(&mut self, update: TimeUpdate) -> Option<Duration> {
        if self.status != SessionStatus::Running || !update.is_running {
            return None;
        }
        self.remaining = Some(update.remaining);
        self.remaining
    }

    fn accepting_answers(&self) -> bool {
        match self.status {
            SessionStatus::Running => true,
            SessionStatus::Error => self.token.is_some(),
            _ => false,
        }
    }

    /// Returns the canonical option key that was stored.
    pub(crate) async fn record_answer(
        &mut self,
        question_id: &str,
        option: &str,
    ) -> Result<String, SessionError> {
        if !self.accepting_answers() {
            return Err(SessionError::NotAccepting(self.status));
        }
        let question_id = question_id.trim();
        if self.content.question(question_id).is_none() {
            return Err(SessionError::UnknownQuestion(question_id.to_string()));
        }
        let Some(key) = self.content.accepted_option(question_id, option) else {
            return Err(SessionError::InvalidOption {
                question_id: question_id.to_string(),
                option: option.trim().to_string(),
            });
        };

        self.answers.insert(question_id.to_string(), key.clone());
        metrics::record_answer();
        if let Some(store) = &self.answer_store {
            if let Err(err) = store.save(&self.answers).await {
                tracing::warn!(error = %err, key = store.key(), "Failed to persist answers");
            }
        }
        Ok(key)
    }

    /// Scores the attempt and freezes answers. Only the first call that holds the
    /// submission token yields a submission; every later call is a no-op.
    pub(crate) fn finish(
        &mut self,
        reason: FinishReason,
        now: Instant,
    ) -> Option<PendingSubmission> {
        if self.status == SessionStatus::Finished {
            tracing::debug!(?reason, "Session already finished, ignoring");
            return None;
        }
        let in_attempt = matches!(self.status, SessionStatus::Running | SessionStatus::Error)
            && self.token.is_some();
        if reason != FinishReason::ServerFinished && !in_attempt {
            tracing::debug!(?reason, status = ?self.status, "No attempt in progress to finish");
            return None;
        }

        self.status = SessionStatus::Finished;
        let Some(token) = self.token.take() else {
            tracing::info!("Exam closed before this student started");
            return None;
        };

        let score = scoring::score(&self.answers, &self.content.solutions, &self.weights);
        let time_taken = self.started_at.map(|start| now.duration_since(start)).unwrap_or_default();
        self.outcome = Some(ExamOutcome {
            score,
            reason,
            time_taken,
            answers: self.answers.clone(),
            submission: SubmissionState::InFlight,
        });
        tracing::info!(?reason, %score, "Exam finished");

        let student = self.student.as_ref()?;
        let request = SubmitRequest {
            phone: student.phone.clone(),
            exam_id: Some(self.content.exam_id.clone()),
            student_name: Some(student.name.clone()),
            score: score.correct,
            total: score.total,
            answers: self.answers.clone(),
            time_taken: Some(time_taken.as_millis() as u64),
        };
        Some(PendingSubmission { idempotency_key: token.idempotency_key, request })
    }

    pub(crate) async fn submission_confirmed(&mut self) {
        if let Some(outcome) = &mut self.outcome {
            outcome.submission = SubmissionState::Confirmed;
        }
        if let Some(store) = &self.answer_store {
            if let Err(err) = store.clear().await {
                tracing::warn!(error = %err, key = store.key(), "Failed to clear saved answers");
            }
        }
    }

    /// A submission queued by an earlier run was acknowledged, so its saved answers
    /// must not seed a new attempt. An attempt already under way keeps its own.
    pub(crate) async fn replay_confirmed(&mut self, level: ExamLevel, phone: &str) {
        let same_student = level == self.content.level
            && self.student.as_ref().is_some_and(|student| student.phone == phone);
        if same_student && self.attempt_started() {
            return;
        }

        let store = AnswerStore::new(&self.data_dir, level, phone);
        if let Err(err) = store.clear().await {
            tracing::warn!(error = %err, key = store.key(), "Failed to clear replayed answers");
            return;
        }
        if same_student && !self.answers.is_empty() {
            tracing::info!(key = store.key(), "Dropped answers of an already submitted attempt");
            self.answers.clear();
        }
    }

    /// A queued resend may already have been acknowledged; that wins.
    pub(crate) fn submission_failed(&mut self, queued: bool) {
        if let Some(outcome) = &mut self.outcome {
            if outcome.submission == SubmissionState::Confirmed {
                return;
            }
            outcome.submission =
                if queued { SubmissionState::Queued } else { SubmissionState::Failed };
        }
    }

    pub(crate) fn view(&self, remaining: Option<Duration>) -> SessionView {
        SessionView {
            status: self.status,
            student: self.student.clone(),
            duration: self.duration,
            remaining: remaining.or(self.remaining),
            answers: self.answers.clone(),
            attempt_started: self.attempt_started(),
            outcome: self.outcome.clone(),
            last_error: self.last_error.clone(),
            login_error: self.login_error.clone(),
            login_failures: self.login_failures,
        }
    }
}
