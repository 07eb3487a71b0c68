use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::dispatch::Broadcaster;
use crate::transport::{CapturedMessage, Destination, Transport};

/// Timing knobs for the poll-broadcast loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Wait between cycles.
    pub interval: Duration,
    /// Bound on one fetch of the source channel.
    pub fetch_timeout: Duration,
    /// Fixed penalty wait after an iteration that failed. Kept shorter
    /// than the normal interval, but long enough that a persistent error
    /// does not spin the loop hot.
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(45),
            error_backoff: Duration::from_secs(10),
        }
    }
}

/// Poll the source channel and broadcast every captured message until the
/// running flag flips false or the task is cancelled.
///
/// A single cycle's failure never ends the loop: a fetch timeout counts
/// as "no message this cycle" and any other error is logged and followed
/// by the penalty wait. Cycles are strictly sequential; the next poll
/// does not start until the previous fan-out has fully completed.
pub async fn run(
    transport: Arc<dyn Transport>,
    broadcaster: Broadcaster,
    source: Destination,
    destinations: Vec<String>,
    settings: PollSettings,
    running: Arc<AtomicBool>,
) {
    tracing::info!(
        "poll loop started: source {source}, {} destinations, every {:?}",
        destinations.len(),
        settings.interval
    );
    while running.load(Ordering::SeqCst) {
        let wait = match cycle(&transport, &broadcaster, &source, &destinations, &settings).await {
            Ok(()) => settings.interval,
            Err(e) => {
                tracing::error!("broadcast cycle failed: {e}");
                settings.error_backoff
            }
        };
        if !sleep_while_running(wait, &running).await {
            break;
        }
    }
    tracing::info!("poll loop stopped");
}

async fn cycle(
    transport: &Arc<dyn Transport>,
    broadcaster: &Broadcaster,
    source: &Destination,
    destinations: &[String],
    settings: &PollSettings,
) -> Result<()> {
    let message: Option<CapturedMessage> =
        match tokio::time::timeout(settings.fetch_timeout, transport.fetch_latest(source)).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!("timed out fetching the latest message from {source}");
                None
            }
        };
    match message {
        Some(message) => {
            tracing::info!("captured message {} from {source}, broadcasting", message.id);
            broadcaster.broadcast(&message, destinations).await;
        }
        None => tracing::info!("no message found in {source} this cycle"),
    }
    Ok(())
}

/// Wait out `total` in one-second slices so a stop request takes effect
/// within about a second instead of a full interval. Returns false once
/// the running flag has flipped.
async fn sleep_while_running(total: Duration, running: &AtomicBool) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let slice = remaining.min(Duration::from_secs(1));
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
    running.load(Ordering::SeqCst)
}
