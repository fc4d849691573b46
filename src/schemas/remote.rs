use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::exam::ExamLevel;
use super::student::StudentIdentity;
use super::AnswerMap;
use crate::core::time::millis_to_duration;

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) student: Option<StudentIdentity>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RemoteStatus {
    Waiting,
    Running,
    Finished,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    pub(crate) status: RemoteStatus,
    #[serde(default)]
    pub(crate) time_remaining: Option<f64>,
    #[serde(default)]
    pub(crate) config: Option<TimingConfig>,
    #[serde(default)]
    pub(crate) duration_minutes: Option<f64>,
}

impl StatusResponse {
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.time_remaining.map(millis_to_duration)
    }

    /// Configured exam length for `level`, in order of specificity.
    pub(crate) fn duration_for(&self, level: ExamLevel) -> Option<Duration> {
        self.config
            .as_ref()
            .and_then(|config| config.duration_for(level))
            .or_else(|| {
                self.duration_minutes.map(|minutes| millis_to_duration(minutes * 60_000.0))
            })
    }
}

/// Durations are milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TimingConfig {
    #[serde(default)]
    pub(crate) duration: Option<f64>,
    #[serde(default, rename = "durationB1")]
    pub(crate) duration_b1: Option<f64>,
    #[serde(default, rename = "durationB2")]
    pub(crate) duration_b2: Option<f64>,
}

impl TimingConfig {
    pub(crate) fn duration_for(&self, level: ExamLevel) -> Option<Duration> {
        let specific = match level {
            ExamLevel::B1 => self.duration_b1,
            ExamLevel::B2 => self.duration_b2,
        };
        specific.or(self.duration).map(millis_to_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubmitRequest {
    pub(crate) phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) exam_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) student_name: Option<String>,
    pub(crate) score: f64,
    pub(crate) total: f64,
    pub(crate) answers: AnswerMap,
    #[serde(default, rename = "timeTaken", skip_serializing_if = "Option::is_none")]
    pub(crate) time_taken: Option<u64>,
}

pub(crate) type SubmitAck = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PushMessage {
    TimeUpdate {
        #[serde(rename = "timeRemaining")]
        time_remaining: f64,
        #[serde(rename = "isRunning", default)]
        is_running: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeUpdate {
    pub(crate) remaining: Duration,
    pub(crate) is_running: bool,
}

impl PushMessage {
    pub(crate) fn time_update(&self) -> Option<TimeUpdate> {
        match self {
            Self::TimeUpdate { time_remaining, is_running } => Some(TimeUpdate {
                remaining: millis_to_duration(*time_remaining),
                is_running: *is_running,
            }),
            Self::Unknown => None,
        }
    }
}
