pub(crate) mod commands;
pub(crate) mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::watch;

use crate::schemas::exam::ExamLevel;
use crate::services::exam_content::ExamContent;
use crate::services::exam_session::{SessionStatus, SessionView, SubmissionState};
use crate::services::results::{self, ResultsBreakdown};
use crate::tasks::exam_runner::SessionHandle;
use commands::{is_yes, Command};

const CONFIRM_FINISH: &str = "Hand in the exam now? Answers cannot be changed afterwards. (yes/no)";

/// Line-oriented terminal: commands in, screens out.
pub(crate) struct Console<R, W> {
    lines: Lines<R>,
    out: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub(crate) fn new(reader: R, out: W) -> Self {
        Self { lines: reader.lines(), out }
    }

    pub(crate) fn say(&mut self, text: &str) -> anyhow::Result<()> {
        writeln!(self.out, "{text}").context("failed to write to terminal")?;
        self.out.flush().context("failed to flush terminal")
    }

    async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        self.lines.next_line().await.context("failed to read from terminal")
    }

    /// `None` when the user quits or input ends.
    pub(crate) async fn choose_level(&mut self) -> anyhow::Result<Option<ExamLevel>> {
        self.say(&render::level_menu())?;
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            let choice = line.trim();
            if matches!(choice, "quit" | "exit") {
                return Ok(None);
            }
            match ExamLevel::parse(choice) {
                Some(level) => return Ok(Some(level)),
                None => self.say("Please type 1 (B1) or 2 (B2).")?,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoginStep {
    AwaitName,
    AwaitPhone { name: String },
    Pending,
}

pub(crate) struct ScreenOptions {
    pub(crate) urgent_threshold: Duration,
    pub(crate) data_dir: PathBuf,
}

struct Screen {
    content: Arc<ExamContent>,
    options: ScreenOptions,
    part: usize,
    login: LoginStep,
    confirming_finish: bool,
    shown_status: Option<SessionStatus>,
    shown_submission: Option<SubmissionState>,
    shown_login_failures: u32,
    warned_urgent: bool,
}

/// Drives one session until the user quits, input ends or shutdown is signalled.
pub(crate) async fn run_session<R, W>(
    console: &mut Console<R, W>,
    handle: &SessionHandle,
    content: Arc<ExamContent>,
    options: ScreenOptions,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<SessionView>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut screen = Screen {
        content,
        options,
        part: 0,
        login: LoginStep::AwaitName,
        confirming_finish: false,
        shown_status: None,
        shown_submission: None,
        shown_login_failures: 0,
        warned_urgent: false,
    };
    let mut views = handle.subscribe();
    let initial = views.borrow_and_update().clone();
    screen.refresh(console, &initial).await?;

    loop {
        tokio::select! {
            line = console.read_line() => {
                let Some(line) = line? else {
                    break;
                };
                if screen.handle_line(console, handle, &line).await? == Flow::Quit {
                    break;
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                screen.refresh(console, &view).await?;
            }
            _ = shutdown.changed() => break,
        }
    }

    Ok(handle.view())
}

impl Screen {
    /// Prints whatever changed since the last call. Countdown ticks alone print nothing.
    async fn refresh<R, W>(
        &mut self,
        console: &mut Console<R, W>,
        view: &SessionView,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        if self.shown_status != Some(view.status) {
            self.shown_status = Some(view.status);
            self.enter(console, view).await?;
        }

        if view.status == SessionStatus::Login && view.login_failures != self.shown_login_failures
        {
            self.shown_login_failures = view.login_failures;
            if let Some(reason) = &view.login_error {
                console.say(&format!("Login failed: {reason}"))?;
            }
            self.login = LoginStep::AwaitName;
            console.say("Name:")?;
        }

        if view.status == SessionStatus::Running && !self.warned_urgent {
            if let Some(remaining) = view.remaining {
                if remaining < self.options.urgent_threshold {
                    self.warned_urgent = true;
                    console.say(&render::clock(view, self.options.urgent_threshold))?;
                }
            }
        }

        if view.status == SessionStatus::Finished {
            let submission = view.outcome.as_ref().map(|outcome| outcome.submission);
            if submission != self.shown_submission {
                self.shown_submission = submission;
                if let Some(state) = submission {
                    console.say(render::submission_line(state))?;
                }
            }
        }
        Ok(())
    }

    async fn enter<R, W>(
        &mut self,
        console: &mut Console<R, W>,
        view: &SessionView,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        match view.status {
            SessionStatus::Loading => console.say("Connecting to the exam server...")?,
            SessionStatus::Login => {
                self.login = LoginStep::AwaitName;
                self.shown_login_failures = view.login_failures;
                console.say("Sign in with the name and phone number you registered.\nName:")?;
            }
            SessionStatus::Waiting => console.say(&render::lobby(view))?,
            SessionStatus::Running => {
                console.say("The exam is running.")?;
                console.say(&render::clock(view, self.options.urgent_threshold))?;
                console.say(&render::part(&self.content, self.part, &view.answers))?;
                console.say("Type `help` for commands.")?;
            }
            SessionStatus::Error => console.say(&render::connection_lost(view))?,
            SessionStatus::Finished => {
                self.confirming_finish = false;
                self.shown_submission = view.outcome.as_ref().map(|outcome| outcome.submission);
                console.say(&render::finished(view))?;
                self.show_results(console, view).await?;
            }
        }
        Ok(())
    }

    async fn show_results<R, W>(
        &self,
        console: &mut Console<R, W>,
        view: &SessionView,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let (Some(outcome), Some(student)) = (&view.outcome, &view.student) else {
            return Ok(());
        };
        let breakdown = ResultsBreakdown::build(
            &self.content,
            &outcome.answers,
            outcome.score,
            outcome.time_taken,
        );
        console.say(&render::results(&breakdown))?;

        let label = self.content.level.label();
        match results::write_report(&self.options.data_dir, &breakdown, student, label).await {
            Ok(path) => console.say(&format!("Report saved to {}", path.display()))?,
            Err(err) => tracing::warn!(error = %err, "Failed to write results report"),
        }
        Ok(())
    }

    async fn handle_line<R, W>(
        &mut self,
        console: &mut Console<R, W>,
        handle: &SessionHandle,
        line: &str,
    ) -> anyhow::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        // Catch up first so the input is read against the state the runner is in now.
        let view = handle.view();
        self.refresh(console, &view).await?;

        if view.status == SessionStatus::Login {
            return self.login_step(console, handle, line);
        }
        if self.confirming_finish {
            self.confirming_finish = false;
            if is_yes(line) {
                handle.finish();
                console.say("Handing in your exam...")?;
            } else {
                console.say("Continuing the exam.")?;
            }
            return Ok(Flow::Continue);
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => {
                console.say(&err.to_string())?;
                return Ok(Flow::Continue);
            }
        };

        let in_attempt = view.attempt_started && view.status != SessionStatus::Finished;
        match command {
            Command::Help => console.say(render::help())?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Time => match view.status {
                SessionStatus::Waiting => console.say(&render::lobby(&view))?,
                _ if in_attempt => {
                    console.say(&render::clock(&view, self.options.urgent_threshold))?;
                }
                _ => console.say("No exam in progress.")?,
            },
            Command::Logout => match handle.logout().await {
                Ok(()) => console.say("Logged out.")?,
                Err(err) => console.say(&err.to_string())?,
            },
            Command::Answer { question_id, option } => {
                match handle.answer(&question_id, &option).await {
                    Ok(key) => console.say(&format!("Saved: [{question_id}] -> {key}"))?,
                    Err(err) => console.say(&err.to_string())?,
                }
            }
            Command::Finish if in_attempt => {
                self.confirming_finish = true;
                console.say(CONFIRM_FINISH)?;
            }
            Command::Finish => console.say("No exam in progress.")?,
            navigation if in_attempt => self.navigate(console, &view, navigation)?,
            _ => console.say("The exam has not started yet.")?,
        }
        Ok(Flow::Continue)
    }

    fn login_step<R, W>(
        &mut self,
        console: &mut Console<R, W>,
        handle: &SessionHandle,
        line: &str,
    ) -> anyhow::Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let input = line.trim();
        if matches!(input, "quit" | "exit") {
            return Ok(Flow::Quit);
        }

        match std::mem::replace(&mut self.login, LoginStep::Pending) {
            LoginStep::AwaitName if input.is_empty() => {
                self.login = LoginStep::AwaitName;
                console.say("Name is required.\nName:")?;
            }
            LoginStep::AwaitName => {
                self.login = LoginStep::AwaitPhone { name: input.to_string() };
                console.say("Phone:")?;
            }
            LoginStep::AwaitPhone { name } if input.is_empty() => {
                self.login = LoginStep::AwaitPhone { name };
                console.say("Phone is required.\nPhone:")?;
            }
            LoginStep::AwaitPhone { name } => {
                handle.login(&name, input);
                console.say("Signing in...")?;
            }
            LoginStep::Pending => console.say("Signing in, please wait...")?,
        }
        Ok(Flow::Continue)
    }

    fn navigate<R, W>(
        &mut self,
        console: &mut Console<R, W>,
        view: &SessionView,
        command: Command,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let count = self.content.parts.len();
        let target = match command {
            Command::Parts => {
                return console.say(&render::parts_list(&self.content, &view.answers));
            }
            Command::Show => self.part,
            Command::Next => (self.part + 1).min(count.saturating_sub(1)),
            Command::Prev => self.part.saturating_sub(1),
            Command::Part(number) => number - 1,
            _ => return Ok(()),
        };
        if target >= count {
            return console.say(&format!("There are {count} parts."));
        }
        self.part = target;
        console.say(&render::part(&self.content, self.part, &view.answers))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

    use super::*;
    use crate::core::config::SubmitSettings;
    use crate::repositories::identity::IdentityStore;
    use crate::repositories::outbox::SubmissionOutbox;
    use crate::schemas::remote::RemoteStatus;
    use crate::schemas::student::StudentIdentity;
    use crate::services::exam_session::ExamSession;
    use crate::services::scoring::WeightTable;
    use crate::tasks::exam_runner::{self, RunnerConfig};
    use crate::test_support::{self, ScriptedRemote, TempDir};

    type TestConsole = Console<BufReader<DuplexStream>, Vec<u8>>;

    async fn start_runner(
        dir: &TempDir,
        remote: Arc<ScriptedRemote>,
        saved: Option<StudentIdentity>,
    ) -> (SessionHandle, watch::Sender<bool>) {
        let identity = IdentityStore::new(dir.path());
        if let Some(saved) = saved {
            identity.save(&saved).await.expect("save identity");
        }
        let session = ExamSession::new(
            Arc::new(test_support::fixture_content()),
            WeightTable::default(),
            dir.path().to_path_buf(),
        );
        let config = RunnerConfig {
            poll_interval: Duration::from_millis(30),
            tick: Duration::from_millis(10),
            submit: SubmitSettings { max_retries: 0, backoff_base: Duration::from_millis(1) },
            push_url: None,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let outbox = SubmissionOutbox::new(dir.path());
        let handle = exam_runner::spawn(session, remote, identity, outbox, config, shutdown_rx);
        (handle, shutdown_tx)
    }

    async fn wait_until<F>(views: &mut watch::Receiver<SessionView>, ready: F)
    where
        F: Fn(&SessionView) -> bool,
    {
        let waiting = async {
            loop {
                if ready(&*views.borrow_and_update()) {
                    return;
                }
                views.changed().await.expect("runner alive");
            }
        };
        tokio::time::timeout(Duration::from_secs(5), waiting).await.expect("state reached");
    }

    fn spawn_terminal(
        handle: SessionHandle,
        dir: &TempDir,
        shutdown: watch::Receiver<bool>,
    ) -> (DuplexStream, tokio::task::JoinHandle<String>) {
        let (input, terminal_side) = tokio::io::duplex(1024);
        let options = ScreenOptions {
            urgent_threshold: Duration::from_secs(300),
            data_dir: dir.path().to_path_buf(),
        };
        let task = tokio::spawn(async move {
            let mut console: TestConsole = Console::new(BufReader::new(terminal_side), Vec::new());
            let content = Arc::new(test_support::fixture_content());
            run_session(&mut console, &handle, content, options, shutdown).await.expect("session");
            String::from_utf8(console.out).expect("utf8")
        });
        (input, task)
    }

    async fn type_line(input: &mut DuplexStream, line: &str) {
        input.write_all(format!("{line}\n").as_bytes()).await.expect("type");
    }

    #[tokio::test]
    async fn level_menu_retries_until_a_valid_choice() {
        let input: &[u8] = b"5\n2\n";
        let mut console = Console::new(BufReader::new(input), Vec::new());

        let level = console.choose_level().await.expect("read");

        assert_eq!(level, Some(ExamLevel::B2));
        let output = String::from_utf8(console.out).expect("utf8");
        assert!(output.contains("1) Telc B1"));
        assert!(output.contains("Please type 1 (B1) or 2 (B2)."));
    }

    #[tokio::test]
    async fn level_menu_quits_on_end_of_input() {
        let input: &[u8] = b"";
        let mut console = Console::new(BufReader::new(input), Vec::new());
        assert_eq!(console.choose_level().await.expect("read"), None);
    }

    #[tokio::test]
    async fn login_prompts_for_name_then_phone() {
        let dir = TempDir::new();
        let remote = Arc::new(ScriptedRemote::new());
        remote.push_status(test_support::status(RemoteStatus::Waiting, None));
        let (handle, _stop_runner) = start_runner(&dir, remote, None).await;
        let mut views = handle.subscribe();
        let (_stop, shutdown) = watch::channel(false);
        let (mut input, terminal) = spawn_terminal(handle, &dir, shutdown);

        wait_until(&mut views, |view| view.status == SessionStatus::Login).await;
        type_line(&mut input, "").await;
        type_line(&mut input, "Awa Diallo").await;
        type_line(&mut input, "699000222").await;
        wait_until(&mut views, |view| view.status == SessionStatus::Waiting).await;
        type_line(&mut input, "part 1").await;
        type_line(&mut input, "quit").await;

        let output = tokio::time::timeout(Duration::from_secs(5), terminal)
            .await
            .expect("terminal exits")
            .expect("join");
        assert!(output.contains("Name is required."));
        assert!(output.contains("Phone:"));
        assert!(output.contains("Welcome, Awa Diallo."));
        assert!(output.contains("The exam has not started yet."));
    }

    #[tokio::test]
    async fn answering_and_finishing_prints_results_and_report() {
        let dir = TempDir::new();
        let remote = Arc::new(ScriptedRemote::new());
        remote.push_status(test_support::status(RemoteStatus::Running, Some(600_000.0)));
        let student = StudentIdentity { name: "Jean Dupont".into(), phone: "699000111".into() };
        let (handle, _stop_runner) = start_runner(&dir, remote.clone(), Some(student)).await;
        let mut views = handle.subscribe();
        let (_stop, shutdown) = watch::channel(false);
        let (mut input, terminal) = spawn_terminal(handle, &dir, shutdown);

        wait_until(&mut views, |view| view.status == SessionStatus::Running).await;
        type_line(&mut input, "1=a").await;
        type_line(&mut input, "answer 21 q").await;
        type_line(&mut input, "finish").await;
        type_line(&mut input, "yes").await;
        wait_until(&mut views, |view| {
            view.outcome.as_ref().is_some_and(|outcome| {
                outcome.submission == SubmissionState::Confirmed
            })
        })
        .await;
        type_line(&mut input, "quit").await;

        let output = tokio::time::timeout(Duration::from_secs(5), terminal)
            .await
            .expect("terminal exits")
            .expect("join");
        assert!(output.contains("Saved: [1] -> a"));
        assert!(output.contains("option 'q' is not offered for question 21"));
        assert!(output.contains("Exam finished (handed in)."));
        assert!(output.contains("Result: "));
        assert!(output.contains("Report saved to"));
        assert!(dir.path().join("reports/results_Telc_B1_Jean_Dupont.txt").exists());
        assert_eq!(remote.submit_count(), 1);
    }
}
