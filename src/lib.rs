pub(crate) mod core;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;
pub(crate) mod terminal;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;

use crate::core::{config::Settings, shutdown, telemetry};
use crate::repositories::identity::IdentityStore;
use crate::repositories::outbox::SubmissionOutbox;
use crate::services::exam_content::ExamContent;
use crate::services::exam_session::ExamSession;
use crate::services::remote_session::{HttpRemoteSession, RemoteSession};
use crate::tasks::exam_runner::{self, RunnerConfig};
use crate::terminal::{Console, ScreenOptions};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    tracing::info!(
        environment = settings.runtime().environment.as_str(),
        api_url = %settings.remote().api_url,
        push_enabled = settings.remote().push_enabled,
        "WAVY.LEARN starting"
    );

    let mut console = Console::new(BufReader::new(tokio::io::stdin()), std::io::stdout());
    let level = match settings.exam().level {
        Some(level) => level,
        None => match console.choose_level().await? {
            Some(level) => level,
            None => return Ok(()),
        },
    };

    let storage = settings.storage();
    let content = ExamContent::load(&storage.content_dir, level)
        .await
        .with_context(|| format!("failed to load {} exam content", level.label()))?;
    let content = Arc::new(content);

    let remote: Arc<dyn RemoteSession> = Arc::new(
        HttpRemoteSession::from_settings(&settings).context("failed to build exam server client")?,
    );
    let shutdown = shutdown::spawn_shutdown_listener();

    let session = ExamSession::new(
        content.clone(),
        settings.exam().weights_for(level).clone(),
        storage.data_dir.clone(),
    );
    let handle = exam_runner::spawn(
        session,
        remote,
        IdentityStore::new(&storage.data_dir),
        SubmissionOutbox::new(&storage.data_dir),
        RunnerConfig::from_settings(&settings),
        shutdown.clone(),
    );

    let options = ScreenOptions {
        urgent_threshold: settings.session().urgent_threshold,
        data_dir: storage.data_dir.clone(),
    };
    let result = terminal::run_session(&mut console, &handle, content, options, shutdown).await;

    handle.close().await;
    let view = result?;
    tracing::info!(status = ?view.status, "Exam session closed");

    Ok(())
}
