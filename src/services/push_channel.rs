use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::core::metrics;
use crate::schemas::remote::{PushMessage, TimeUpdate};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Forwards `time_update` frames until shutdown, reconnecting with capped backoff.
/// The channel only carries time; exam status always comes from polling.
pub(crate) async fn run_push_listener(
    url: String,
    updates: mpsc::Sender<TimeUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                tracing::info!(%url, "Push channel connected");
                delay = INITIAL_RECONNECT_DELAY;
                match forward_frames(stream, &updates, &mut shutdown).await {
                    StreamEnd::Shutdown => break,
                    StreamEnd::Disconnected => {
                        tracing::warn!("Push channel disconnected, falling back to polling");
                    }
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, %url, "Push channel unavailable");
            }
        }

        if updates.is_closed() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }

    tracing::debug!("Push listener stopped");
}

async fn forward_frames<S>(
    mut stream: S,
    updates: &mpsc::Sender<TimeUpdate>,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = shutdown.changed() => return StreamEnd::Shutdown,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return StreamEnd::Disconnected,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::debug!(error = %err, "Push channel read failed");
                return StreamEnd::Disconnected;
            }
        };

        let Some(update) = parse_time_update(&text) else {
            continue;
        };
        metrics::record_push_message();
        if updates.send(update).await.is_err() {
            return StreamEnd::Shutdown;
        }
    }
}

fn parse_time_update(text: &str) -> Option<TimeUpdate> {
    match serde_json::from_str::<PushMessage>(text) {
        Ok(message) => message.time_update(),
        Err(err) => {
            tracing::debug!(error = %err, "Ignoring malformed push frame");
            None
        }
    }
}
