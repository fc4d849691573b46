use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Running(Duration),
    /// Returned exactly once, on the tick that reaches zero.
    Expired,
    Stopped,
}

/// Local copy of the remaining time, decremented per tick and replaced on resync.
#[derive(Debug, Clone)]
pub(crate) struct Countdown {
    remaining: Duration,
    expired: bool,
}

impl Countdown {
    pub(crate) fn new(initial: Duration) -> Self {
        Self { remaining: initial, expired: false }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.remaining
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expired
    }

    pub(crate) fn tick(&mut self, step: Duration) -> TickOutcome {
        if self.expired {
            return TickOutcome::Stopped;
        }
        self.remaining = self.remaining.saturating_sub(step);
        self.settle()
    }

    /// The server value replaces the local one outright. Ignored once expired.
    pub(crate) fn resync(&mut self, server_remaining: Duration) -> TickOutcome {
        if self.expired {
            return TickOutcome::Stopped;
        }
        self.remaining = server_remaining;
        self.settle()
    }

    fn settle(&mut self) -> TickOutcome {
        if self.remaining.is_zero() {
            self.expired = true;
            TickOutcome::Expired
        } else {
            TickOutcome::Running(self.remaining)
        }
    }
}

/// Drives a [`Countdown`] on the tokio clock. Dropping the timer stops it.
pub(crate) struct CountdownTimer {
    resync_tx: mpsc::UnboundedSender<Duration>,
    remaining_rx: watch::Receiver<Duration>,
    task: JoinHandle<()>,
}

impl CountdownTimer {
    pub(crate) fn start<F>(initial: Duration, tick: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();
        let (remaining_tx, remaining_rx) = watch::channel(initial);
        let task = tokio::spawn(run_countdown(initial, tick, resync_rx, remaining_tx, on_expire));
        Self { resync_tx, remaining_rx, task }
    }

    pub(crate) fn resync(&self, server_remaining: Duration) {
        if self.resync_tx.send(server_remaining).is_err() {
            tracing::debug!("Countdown already stopped, resync ignored");
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        *self.remaining_rx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining_rx.clone()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_countdown<F>(
    initial: Duration,
    tick: Duration,
    mut resync_rx: mpsc::UnboundedReceiver<Duration>,
    remaining_tx: watch::Sender<Duration>,
    on_expire: F,
) where
    F: FnOnce() + Send + 'static,
{
    if initial.is_zero() {
        on_expire();
        return;
    }
    let mut countdown = Countdown::new(initial);

    let mut ticker = interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outcome = tokio::select! {
            _ = ticker.tick() => countdown.tick(tick),
            Some(server_remaining) = resync_rx.recv() => countdown.resync(server_remaining),
        };
        remaining_tx.send_replace(countdown.remaining());
        if !matches!(outcome, TickOutcome::Running(_)) {
            break;
        }
    }

    if countdown.is_expired() {
        tracing::info!("Countdown reached zero");
        on_expire();
    }
}
