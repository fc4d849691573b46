use std::path::{Path, PathBuf};

use super::files::{self, StoreError};
use crate::schemas::student::StudentIdentity;

const IDENTITY_FILE: &str = "exam_student.json";

/// The logged-in student, kept until an explicit logout.
#[derive(Debug, Clone)]
pub(crate) struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub(crate) fn new(data_dir: &Path) -> Self {
        Self { path: data_dir.join(IDENTITY_FILE) }
    }

    /// A corrupt file counts as no identity; the student simply logs in again.
    pub(crate) async fn load(&self) -> Result<Option<StudentIdentity>, StoreError> {
        match files::read_json::<StudentIdentity>(&self.path).await {
            Ok(identity) => Ok(identity.filter(|identity| !identity.phone.trim().is_empty())),
            Err(StoreError::Json { source, .. }) => {
                tracing::warn!(
                    error = %source,
                    path = %self.path.display(),
                    "Ignoring corrupt identity file"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn save(&self, identity: &StudentIdentity) -> Result<(), StoreError> {
        files::write_json_atomic(&self.path, identity).await
    }

    pub(crate) async fn clear(&self) -> Result<(), StoreError> {
        files::remove_if_exists(&self.path).await
    }
}
