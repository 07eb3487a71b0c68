use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::dispatch::{Broadcaster, DeliveryOutcome};
use crate::poll::{self, PollSettings};
use crate::transport::{
    CapturedMessage, ConnectOutcome, Credentials, Destination, Dialog, SignInOutcome, Transport,
    TransportError,
};

/// Timing knobs for the engine's transport-facing operations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll: PollSettings,
    /// Bound on one dialog listing.
    pub dialog_timeout: Duration,
    /// Per-send random delay range for broadcasts, in milliseconds.
    pub send_jitter_ms: Range<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            dialog_timeout: Duration::from_secs(60),
            send_jitter_ms: 2_000..12_000,
        }
    }
}

/// Owns the dedicated background runtime every transport call is
/// serialized through, plus the `connected`/`running` flags shared with
/// callers on other threads.
///
/// The chat-protocol client is not assumed safe to drive from more than
/// one execution context, so shells never touch the transport directly:
/// each entry point submits its work onto the single background thread
/// and hands back a join handle the caller can await (or block on) from
/// its own context. Parallelism happens only via the task fan-out inside
/// a broadcast, all on that same thread.
pub struct Engine {
    transport: Arc<dyn Transport>,
    handle: runtime::Handle,
    config: EngineConfig,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(transport, EngineConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build engine runtime")?;
        let handle = rt.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("recast-engine".into())
            .spawn(move || {
                // Parks here until shutdown; submitted work runs on this
                // thread. Dropping the runtime afterwards cancels
                // anything still pending.
                rt.block_on(async {
                    let _ = stop_rx.await;
                });
            })
            .context("failed to spawn engine thread")?;
        Ok(Self {
            transport,
            handle,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Submit a unit of asynchronous work onto the engine's execution
    /// context. The returned handle is awaitable from any other context.
    pub fn submit<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the poll-broadcast loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connect(&self, creds: Credentials) -> JoinHandle<Result<ConnectOutcome, TransportError>> {
        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        self.submit(async move {
            let outcome = transport.connect(&creds).await?;
            if outcome == ConnectOutcome::Connected {
                connected.store(true, Ordering::SeqCst);
            }
            Ok(outcome)
        })
    }

    /// Submit the verification code the provider sent after `connect`.
    pub fn submit_code(&self, code: String) -> JoinHandle<Result<SignInOutcome, TransportError>> {
        self.sign_in(Some(code), None)
    }

    /// Submit the second-factor password after `submit_code` asked for it.
    pub fn submit_second_factor(
        &self,
        password: String,
    ) -> JoinHandle<Result<SignInOutcome, TransportError>> {
        self.sign_in(None, Some(password))
    }

    fn sign_in(
        &self,
        code: Option<String>,
        password: Option<String>,
    ) -> JoinHandle<Result<SignInOutcome, TransportError>> {
        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        self.submit(async move {
            let outcome = transport
                .sign_in(code.as_deref(), password.as_deref())
                .await?;
            if outcome == SignInOutcome::Success {
                connected.store(true, Ordering::SeqCst);
            }
            Ok(outcome)
        })
    }

    /// Whether a previously stored session is still usable. Any error
    /// counts as "no".
    pub fn check_session(&self, creds: Credentials) -> JoinHandle<bool> {
        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        self.submit(async move {
            match transport.has_valid_session(&creds).await {
                Ok(true) => {
                    connected.store(true, Ordering::SeqCst);
                    true
                }
                Ok(false) => false,
                Err(e) => {
                    tracing::warn!("session check failed: {e}");
                    false
                }
            }
        })
    }

    /// List the account's dialogs, bounded by the configured timeout.
    /// Timeouts and errors are logged and come back as an empty list.
    pub fn dialogs(&self, limit: usize) -> JoinHandle<Vec<Dialog>> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.dialog_timeout;
        self.submit(async move {
            match tokio::time::timeout(timeout, transport.list_dialogs(limit)).await {
                Ok(Ok(dialogs)) => dialogs,
                Ok(Err(e)) => {
                    tracing::error!("failed to list dialogs: {e}");
                    Vec::new()
                }
                Err(_) => {
                    tracing::error!("timed out listing dialogs");
                    Vec::new()
                }
            }
        })
    }

    /// Latest message of the source channel, bounded by the poll fetch
    /// timeout; a timeout or error counts as "no message".
    pub fn fetch_latest(&self, source: Destination) -> JoinHandle<Option<CapturedMessage>> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.poll.fetch_timeout;
        self.submit(async move {
            match tokio::time::timeout(timeout, transport.fetch_latest(&source)).await {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    tracing::error!("failed to fetch the latest message from {source}: {e}");
                    None
                }
                Err(_) => {
                    tracing::warn!("timed out fetching the latest message from {source}");
                    None
                }
            }
        })
    }

    /// Run one broadcast cycle outside the poll loop.
    pub fn broadcast_once(
        &self,
        message: CapturedMessage,
        destinations: Vec<String>,
    ) -> JoinHandle<Vec<DeliveryOutcome>> {
        let broadcaster =
            Broadcaster::with_jitter(Arc::clone(&self.transport), self.config.send_jitter_ms.clone());
        self.submit(async move { broadcaster.broadcast(&message, &destinations).await })
    }

    /// Start the poll-broadcast loop with the given cadence. Starting an
    /// already-running loop is a logged no-op.
    pub fn start_loop(
        &self,
        source: Destination,
        destinations: Vec<String>,
        interval: Duration,
    ) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("poll loop is already running");
            return self.submit(async {});
        }
        let mut settings = self.config.poll.clone();
        settings.interval = interval;
        let broadcaster =
            Broadcaster::with_jitter(Arc::clone(&self.transport), self.config.send_jitter_ms.clone());
        self.submit(poll::run(
            Arc::clone(&self.transport),
            broadcaster,
            source,
            destinations,
            settings,
            Arc::clone(&self.running),
        ))
    }

    /// Ask the loop to stop. Takes effect at its next safe point: the top
    /// of an iteration, or within about a second while waiting out an
    /// interval. An in-flight per-destination send is allowed to finish.
    pub fn stop_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Log out of the provider (invalidating the stored session) and
    /// disconnect.
    pub fn log_out(&self) -> JoinHandle<Result<(), TransportError>> {
        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        self.submit(async move {
            transport.log_out().await?;
            transport.disconnect().await?;
            connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Disconnect without invalidating the stored session.
    pub fn disconnect(&self) -> JoinHandle<Result<(), TransportError>> {
        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        self.submit(async move {
            transport.disconnect().await?;
            connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Stop the loop and tear the background context down. Pending work
    /// is cancelled rather than drained; a caller that needs a cycle to
    /// finish should await its handle before shutting down.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
