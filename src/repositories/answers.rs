use std::path::{Path, PathBuf};

use super::files::{self, StoreError};
use crate::schemas::exam::ExamLevel;
use crate::schemas::AnswerMap;

/// In-progress answers of one student for one exam level.
#[derive(Debug, Clone)]
pub(crate) struct AnswerStore {
    key: String,
    path: PathBuf,
}

impl AnswerStore {
    pub(crate) fn new(data_dir: &Path, level: ExamLevel, phone: &str) -> Self {
        let key = format!("exam_{}_answers_{}", level.as_str(), sanitize(phone));
        let path = data_dir.join("answers").join(format!("{key}.json"));
        Self { key, path }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn load(&self) -> Result<AnswerMap, StoreError> {
        match files::read_json::<AnswerMap>(&self.path).await {
            Ok(answers) => Ok(answers.unwrap_or_default()),
            Err(StoreError::Json { source, .. }) => {
                tracing::warn!(
                    error = %source,
                    key = %self.key,
                    "Discarding corrupt saved answers"
                );
                Ok(AnswerMap::new())
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn save(&self, answers: &AnswerMap) -> Result<(), StoreError> {
        files::write_json_atomic(&self.path, answers).await
    }

    pub(crate) async fn clear(&self) -> Result<(), StoreError> {
        files::remove_if_exists(&self.path).await
    }
}

fn sanitize(phone: &str) -> String {
    phone
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '+' || ch == '-' { ch } else { '_' })
        .collect()
}
