use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::files::{self, StoreError};
use crate::schemas::exam::ExamLevel;
use crate::schemas::remote::SubmitRequest;

/// A scored attempt whose submission has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QueuedSubmission {
    pub(crate) idempotency_key: Uuid,
    pub(crate) level: ExamLevel,
    pub(crate) request: SubmitRequest,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) queued_at: OffsetDateTime,
}

/// Submissions that exhausted their retries, re-sent once the server is reachable.
#[derive(Debug, Clone)]
pub(crate) struct SubmissionOutbox {
    dir: PathBuf,
}

impl SubmissionOutbox {
    pub(crate) fn new(data_dir: &Path) -> Self {
        Self { dir: data_dir.join("outbox") }
    }

    fn entry_path(&self, key: Uuid) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub(crate) async fn enqueue(&self, entry: &QueuedSubmission) -> Result<(), StoreError> {
        files::write_json_atomic(&self.entry_path(entry.idempotency_key), entry).await
    }

    /// Oldest first. Unreadable entries are skipped and left on disk.
    pub(crate) async fn pending(&self) -> Result<Vec<QueuedSubmission>, StoreError> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: self.dir.clone(), source }),
        };

        let mut entries = Vec::new();
        loop {
            let next = reader
                .next_entry()
                .await
                .map_err(|source| StoreError::Io { path: self.dir.clone(), source })?;
            let Some(dir_entry) = next else {
                break;
            };
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match files::read_json::<QueuedSubmission>(&path).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "Skipping unreadable outbox entry"),
            }
        }

        entries.sort_by_key(|entry| entry.queued_at);
        Ok(entries)
    }

    pub(crate) async fn remove(&self, key: Uuid) -> Result<(), StoreError> {
        files::remove_if_exists(&self.entry_path(key)).await
    }
}

#[cfg(test)]
mod tests {
    use time::Duration as TimeDuration;

    use super::*;
    use crate::schemas::AnswerMap;
    use crate::test_support::TempDir;

    fn queued(phone: &str, queued_at: OffsetDateTime) -> QueuedSubmission {
        QueuedSubmission {
            idempotency_key: Uuid::new_v4(),
            level: ExamLevel::B2,
            request: SubmitRequest {
                phone: phone.to_string(),
                exam_id: Some("telc_b2_test".to_string()),
                student_name: Some("Awa".to_string()),
                score: 3.0,
                total: 4.0,
                answers: AnswerMap::new(),
                time_taken: Some(1_000),
            },
            queued_at,
        }
    }

    #[tokio::test]
    async fn empty_outbox_has_nothing_pending() {
        let dir = TempDir::new();
        let outbox = SubmissionOutbox::new(dir.path());
        assert!(outbox.pending().await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn entries_come_back_oldest_first_until_removed() {
        let dir = TempDir::new();
        let outbox = SubmissionOutbox::new(dir.path());
        let now = OffsetDateTime::now_utc();
        let newer = queued("222", now);
        let older = queued("111", now - TimeDuration::minutes(5));

        outbox.enqueue(&newer).await.expect("enqueue newer");
        outbox.enqueue(&older).await.expect("enqueue older");

        let pending = outbox.pending().await.expect("pending");
        let phones: Vec<_> = pending.iter().map(|entry| entry.request.phone.as_str()).collect();
        assert_eq!(phones, vec!["111", "222"]);

        outbox.remove(older.idempotency_key).await.expect("remove");
        let pending = outbox.pending().await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key, newer.idempotency_key);
    }

    #[tokio::test]
    async fn unreadable_entries_are_skipped() {
        let dir = TempDir::new();
        let outbox = SubmissionOutbox::new(dir.path());
        outbox.enqueue(&queued("111", OffsetDateTime::now_utc())).await.expect("enqueue");
        std::fs::write(dir.path().join("outbox/garbage.json"), "nope").expect("seed");

        assert_eq!(outbox.pending().await.expect("pending").len(), 1);
    }
}
