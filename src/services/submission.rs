use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::config::SubmitSettings;
use crate::core::metrics;
use crate::repositories::outbox::{QueuedSubmission, SubmissionOutbox};
use crate::schemas::exam::ExamLevel;
use crate::schemas::remote::{SubmitAck, SubmitRequest};
use crate::services::remote_session::{RemoteError, RemoteSession};

/// Sends `request` with up to `max_retries` retries, backing off `base·2^attempt`.
/// Every attempt carries the same idempotency key.
pub(crate) async fn submit_with_retry(
    remote: &dyn RemoteSession,
    request: &SubmitRequest,
    idempotency_key: Uuid,
    settings: SubmitSettings,
) -> Result<SubmitAck, RemoteError> {
    let mut attempt = 0;
    loop {
        match remote.submit(request, idempotency_key).await {
            Ok(ack) => {
                metrics::record_submission("accepted");
                tracing::info!(
                    phone = %request.phone,
                    exam_id = request.exam_id.as_deref().unwrap_or_default(),
                    attempt,
                    "Submission accepted"
                );
                return Ok(ack);
            }
            Err(err) if err.is_retryable() && attempt < settings.max_retries => {
                let backoff = backoff_for(settings.backoff_base, attempt);
                tracing::warn!(
                    error = %err,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Submit attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                metrics::record_submission("failed");
                tracing::error!(error = %err, attempt, "Submission failed");
                return Err(err);
            }
        }
    }
}

fn backoff_for(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

/// A queued submission the server acknowledged on replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentSubmission {
    pub(crate) idempotency_key: Uuid,
    pub(crate) level: ExamLevel,
    pub(crate) phone: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FlushReport {
    pub(crate) sent: Vec<SentSubmission>,
    pub(crate) remaining: usize,
}

pub(crate) async fn enqueue(
    outbox: &SubmissionOutbox,
    level: ExamLevel,
    request: SubmitRequest,
    idempotency_key: Uuid,
) -> anyhow::Result<()> {
    let entry = QueuedSubmission {
        idempotency_key,
        level,
        request,
        queued_at: OffsetDateTime::now_utc(),
    };
    outbox.enqueue(&entry).await?;
    metrics::record_submission("queued");
    tracing::warn!(%idempotency_key, "Submission queued for resend");
    Ok(())
}

/// One attempt per queued entry; stops at the first transport failure.
pub(crate) async fn flush_outbox(
    remote: &dyn RemoteSession,
    outbox: &SubmissionOutbox,
) -> anyhow::Result<FlushReport> {
    let pending = outbox.pending().await?;
    let mut report = FlushReport { sent: Vec::new(), remaining: pending.len() };

    for entry in pending {
        match remote.submit(&entry.request, entry.idempotency_key).await {
            Ok(_) => {
                outbox.remove(entry.idempotency_key).await?;
                metrics::record_submission("resent");
                tracing::info!(idempotency_key = %entry.idempotency_key, "Queued submission sent");
                report.sent.push(SentSubmission {
                    idempotency_key: entry.idempotency_key,
                    level: entry.level,
                    phone: entry.request.phone,
                });
                report.remaining -= 1;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "Server unreachable, keeping queued submissions");
                break;
            }
            Err(err) => {
                // A rejected replay will be rejected again; drop it.
                outbox.remove(entry.idempotency_key).await?;
                metrics::record_submission("dropped");
                tracing::error!(
                    error = %err,
                    idempotency_key = %entry.idempotency_key,
                    "Queued submission rejected, dropping"
                );
                report.remaining -= 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::schemas::AnswerMap;
    use crate::test_support::{ScriptedRemote, SubmitScript, TempDir};

    fn request() -> SubmitRequest {
        SubmitRequest {
            phone: "699000111".to_string(),
            exam_id: Some("telc_b1_fixture".to_string()),
            student_name: Some("Jean".to_string()),
            score: 7.5,
            total: 9.0,
            answers: AnswerMap::new(),
            time_taken: Some(60_000),
        }
    }

    fn settings(max_retries: u32) -> SubmitSettings {
        SubmitSettings { max_retries, backoff_base: Duration::from_millis(100) }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_for(base, 0), Duration::from_millis(250));
        assert_eq!(backoff_for(base, 3), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_same_key() {
        let remote = ScriptedRemote::new();
        remote.script_submits([SubmitScript::Unavailable, SubmitScript::Unavailable]);
        let key = Uuid::new_v4();

        submit_with_retry(&remote, &request(), key, settings(3)).await.expect("eventually ok");

        let keys = remote.submit_keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|sent| *sent == key));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let remote = ScriptedRemote::new();
        remote.script_submits(std::iter::repeat(SubmitScript::Unavailable).take(10));

        let err = submit_with_retry(&remote, &request(), Uuid::new_v4(), settings(2))
            .await
            .expect_err("gives up");

        assert!(err.is_retryable());
        assert_eq!(remote.submit_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let remote = ScriptedRemote::new();
        remote.script_submits([SubmitScript::Status(StatusCode::UNPROCESSABLE_ENTITY)]);

        let err = submit_with_retry(&remote, &request(), Uuid::new_v4(), settings(5))
            .await
            .expect_err("rejected");

        assert!(!err.is_retryable());
        assert_eq!(remote.submit_count(), 1);
    }

    #[tokio::test]
    async fn flush_sends_queued_entries_and_removes_them() {
        let dir = TempDir::new();
        let outbox = SubmissionOutbox::new(dir.path());
        let remote = ScriptedRemote::new();
        let key = Uuid::new_v4();
        enqueue(&outbox, ExamLevel::B1, request(), key).await.expect("enqueue");

        let report = flush_outbox(&remote, &outbox).await.expect("flush");

        let sent = SentSubmission {
            idempotency_key: key,
            level: ExamLevel::B1,
            phone: "699000111".to_string(),
        };
        assert_eq!(report, FlushReport { sent: vec![sent], remaining: 0 });
        assert_eq!(remote.submit_keys(), vec![key]);
        assert!(outbox.pending().await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn flush_keeps_entries_while_server_is_down() {
        let dir = TempDir::new();
        let outbox = SubmissionOutbox::new(dir.path());
        let remote = ScriptedRemote::new();
        remote.script_submits([SubmitScript::Unavailable]);
        for _ in 0..2 {
            enqueue(&outbox, ExamLevel::B1, request(), Uuid::new_v4()).await.expect("enqueue");
        }

        let report = flush_outbox(&remote, &outbox).await.expect("flush");

        assert_eq!(report, FlushReport { sent: Vec::new(), remaining: 2 });
        assert_eq!(remote.submit_count(), 1);
        assert_eq!(outbox.pending().await.expect("pending").len(), 2);
    }
}
