use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;

use crate::media;
use crate::mutate;
use crate::transport::{
    CapturedMessage, Destination, FormattingSpan, MediaRef, Transport, TransportError,
};

/// Rate-limit waits above this are logged as an extended slow-mode
/// condition rather than a brief anti-spam pause.
const SLOW_MODE_THRESHOLD_SECS: u64 = 120;

/// Terminal state of one per-destination delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    RateLimited { wait_secs: u64 },
    Forbidden,
    InvalidDestination,
    Unknown(String),
}

/// Map a transport error onto a delivery outcome. Structured variants map
/// directly; unstructured text goes through a substring fallback because
/// the provider library sometimes reports these conditions as plain
/// strings. Unmatched text lands on `Unknown`.
pub fn classify(err: &TransportError) -> DeliveryOutcome {
    match err {
        TransportError::RateLimited(secs) => DeliveryOutcome::RateLimited { wait_secs: *secs },
        TransportError::Forbidden => DeliveryOutcome::Forbidden,
        TransportError::InvalidPeer => DeliveryOutcome::InvalidDestination,
        other => {
            let text = other.to_string().to_lowercase();
            if text.contains("restricted") || text.contains("can't write") {
                DeliveryOutcome::Forbidden
            } else if text.contains("invalid peer") {
                DeliveryOutcome::InvalidDestination
            } else {
                DeliveryOutcome::Unknown(other.to_string())
            }
        }
    }
}

/// Fans one captured message out to every destination of a cycle.
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    /// Per-send random delay range, in milliseconds.
    jitter_ms: Range<u64>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_jitter(transport, 2_000..12_000)
    }

    pub fn with_jitter(transport: Arc<dyn Transport>, jitter_ms: Range<u64>) -> Self {
        Self {
            transport,
            jitter_ms,
        }
    }

    /// Deliver `message` (as per-destination variants) to every
    /// destination concurrently, returning outcomes in destination order
    /// once all deliveries have reached a terminal state.
    ///
    /// No per-destination failure escapes this call; everything is
    /// classified and logged. An empty destination set returns
    /// immediately without touching the transport.
    pub async fn broadcast(
        &self,
        message: &CapturedMessage,
        destinations: &[String],
    ) -> Vec<DeliveryOutcome> {
        if destinations.is_empty() {
            return Vec::new();
        }
        let cached_media = media::cache_for_cycle(&self.transport, message).await;

        // Spawn every task before awaiting any, so sends are in flight
        // concurrently with no completion-order guarantee.
        let mut tasks = JoinSet::new();
        for (idx, raw) in destinations.iter().enumerate() {
            let dest = Destination::parse(raw);
            let transport = Arc::clone(&self.transport);
            let text = message.text.clone();
            let spans = message.spans.clone();
            let media = cached_media.clone();
            let jitter_ms = self.jitter_ms.clone();
            tasks.spawn(async move {
                (idx, deliver(transport, dest, text, media, spans, jitter_ms).await)
            });
        }

        let mut outcomes =
            vec![DeliveryOutcome::Unknown("dispatch task aborted".into()); destinations.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = outcome,
                Err(e) => tracing::error!("dispatch task failed: {e}"),
            }
        }
        outcomes
    }
}

/// One isolated delivery: derive a cycle-local text variant, wait out an
/// independent random delay so the batch does not land as a burst, send
/// with the original spans (still valid, the variant only appends), then
/// classify the result.
async fn deliver(
    transport: Arc<dyn Transport>,
    dest: Destination,
    text: String,
    media: Option<MediaRef>,
    spans: Vec<FormattingSpan>,
    jitter_ms: Range<u64>,
) -> DeliveryOutcome {
    let varied = mutate::mutate(&text);
    if !jitter_ms.is_empty() {
        let delay = rand::thread_rng().gen_range(jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    match transport.send(&dest, &varied, media.as_ref(), &spans).await {
        Ok(_) => {
            tracing::info!("message delivered to {dest}");
            DeliveryOutcome::Sent
        }
        Err(err) => {
            let outcome = classify(&err);
            match &outcome {
                DeliveryOutcome::RateLimited { wait_secs }
                    if *wait_secs > SLOW_MODE_THRESHOLD_SECS =>
                {
                    tracing::warn!(
                        "slow mode on {dest}: a {wait_secs}s wait is required, skipped this cycle"
                    );
                }
                DeliveryOutcome::RateLimited { wait_secs } => {
                    tracing::warn!("anti-spam pause of {wait_secs}s requested for {dest}");
                }
                DeliveryOutcome::Forbidden => {
                    tracing::error!("no permission to post in {dest}, skipped");
                }
                DeliveryOutcome::InvalidDestination => {
                    tracing::error!("{dest} is not a destination this account recognizes");
                }
                DeliveryOutcome::Unknown(detail) => {
                    tracing::error!("delivery to {dest} failed: {detail}");
                }
                DeliveryOutcome::Sent => {}
            }
            outcome
        }
    }
}
