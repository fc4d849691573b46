use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::schemas::remote::{LoginResponse, StatusResponse, SubmitAck, SubmitRequest};
use crate::schemas::student::{LoginRequest, StudentIdentity};

#[derive(Debug, Error)]
pub(crate) enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("login rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Client errors other than timeouts and throttling will not change on retry.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Decode(_) | Self::Rejected(_) => false,
        }
    }
}

/// The exam server as seen by one student.
#[async_trait]
pub(crate) trait RemoteSession: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<StudentIdentity, RemoteError>;

    async fn status(&self) -> Result<StatusResponse, RemoteError>;

    /// `idempotency_key` is identical across retries of one submission.
    async fn submit(
        &self,
        request: &SubmitRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmitAck, RemoteError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpRemoteSession {
    client: Client,
    base_url: String,
}

impl HttpRemoteSession {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, RemoteError> {
        Self::new(&settings.remote().api_url, settings.remote().request_timeout)
    }

    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .user_agent(concat!("wavy-learn/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteSession for HttpRemoteSession {
    async fn login(&self, request: &LoginRequest) -> Result<StudentIdentity, RemoteError> {
        let response = self.client.post(self.endpoint("/api/login")).json(request).send().await?;
        let body: LoginResponse = read_json(response).await?;

        if !body.success {
            let reason = body.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(RemoteError::Rejected(reason));
        }

        Ok(body.student.unwrap_or_else(|| {
            tracing::warn!("Login succeeded without a student record, keeping submitted identity");
            request.fallback_identity()
        }))
    }

    async fn status(&self) -> Result<StatusResponse, RemoteError> {
        let response = self.client.get(self.endpoint("/api/status")).send().await?;
        read_json(response).await
    }

    async fn submit(
        &self,
        request: &SubmitRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmitAck, RemoteError> {
        let response = self
            .client
            .post(self.endpoint("/api/submit"))
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status { status, body: raw_body });
        }
        if raw_body.trim().is_empty() {
            return Ok(SubmitAck::Null);
        }
        serde_json::from_str(&raw_body)
            .map_err(|err| RemoteError::Decode(format!("{err}: {raw_body}")))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    let raw_body = response.text().await?;

    // Login rejections come back as JSON with a non-2xx status; prefer the body when it parses.
    match serde_json::from_str::<T>(&raw_body) {
        Ok(parsed) => Ok(parsed),
        Err(_) if !status.is_success() => Err(RemoteError::Status { status, body: raw_body }),
        Err(err) => Err(RemoteError::Decode(format!("{err}: {raw_body}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::remote::RemoteStatus;
    use crate::schemas::AnswerMap;
    use crate::test_support::FakeServer;

    fn sample_submit() -> SubmitRequest {
        let mut answers = AnswerMap::new();
        answers.insert("1".to_string(), "a".to_string());
        SubmitRequest {
            phone: "699000111".to_string(),
            exam_id: Some("telc_b1_test".to_string()),
            student_name: Some("Jean Dupont".to_string()),
            score: 5.0,
            total: 9.0,
            answers,
            time_taken: Some(42_000),
        }
    }

    fn client_for(server: &FakeServer) -> HttpRemoteSession {
        HttpRemoteSession::new(&server.base_url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn login_returns_server_identity() {
        let server = FakeServer::start().await;
        let remote = client_for(&server);

        let request = LoginRequest::new("Jean Dupont", "699000111");
        let identity = remote.login(&request).await.expect("login");

        assert_eq!(identity.name, "Jean Dupont");
        assert_eq!(identity.phone, "699000111");
    }

    #[tokio::test]
    async fn login_rejection_carries_server_message() {
        let server = FakeServer::start().await;
        server.reject_logins("phone already used");
        let remote = client_for(&server);

        let err = remote.login(&LoginRequest::new("Jean", "699")).await.expect_err("rejected");

        assert!(matches!(err, RemoteError::Rejected(ref reason) if reason == "phone already used"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn status_is_decoded() {
        let server = FakeServer::start().await;
        server.set_status(serde_json::json!({
            "status": "running",
            "timeRemaining": 120_000,
            "config": { "durationB1": 3_600_000 }
        }));
        let remote = client_for(&server);

        let status = remote.status().await.expect("status");

        assert_eq!(status.status, RemoteStatus::Running);
        assert_eq!(status.remaining(), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn submit_sends_payload_and_idempotency_key() {
        let server = FakeServer::start().await;
        let remote = client_for(&server);
        let key = Uuid::new_v4();

        remote.submit(&sample_submit(), key).await.expect("submit");

        let received = server.submissions();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].key.as_deref(), Some(key.to_string().as_str()));
        assert_eq!(received[0].body["phone"], "699000111");
        assert_eq!(received[0].body["timeTaken"], 42_000);
        assert_eq!(received[0].body["answers"]["1"], "a");
    }

    #[tokio::test]
    async fn submit_server_error_is_retryable() {
        let server = FakeServer::start().await;
        server.fail_submissions(1);
        let remote = client_for(&server);

        let err = remote.submit(&sample_submit(), Uuid::new_v4()).await.expect_err("fails");

        assert!(matches!(err, RemoteError::Status { status, .. } if status.is_server_error()));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let timeout = Duration::from_millis(500);
        let remote = HttpRemoteSession::new("http://127.0.0.1:9", timeout).expect("client");

        let err = remote.status().await.expect_err("no server");

        assert!(matches!(err, RemoteError::Transport(_)));
    }
}
