use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account credentials for the chat provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
}

/// Where a message can be delivered.
///
/// Numeric-looking identifiers (including the `-100` channel prefix) are
/// addressed by id; anything else is treated as a handle. `Saved` is the
/// account's own private echo chat, used for media caching only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Channel(i64),
    Handle(String),
    Saved,
}

impl Destination {
    /// Coerce a numeric-looking string to its numeric form; anything else
    /// passes through unchanged as handle-style addressing.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(id) => Destination::Channel(id),
            Err(_) => Destination::Handle(raw.to_string()),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Channel(id) => write!(f, "{id}"),
            Destination::Handle(handle) => write!(f, "{handle}"),
            Destination::Saved => write!(f, "saved messages"),
        }
    }
}

/// Reference to media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    /// A server-side media object that can be re-sent by reference.
    Stored { id: i64 },
    /// Artifact of a URL preview. Not real attached media; never re-uploaded.
    LinkPreview,
}

impl MediaRef {
    pub fn is_link_preview(&self) -> bool {
        matches!(self, MediaRef::LinkPreview)
    }
}

/// Offset-based style annotation over a range of the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattingSpan {
    pub offset: usize,
    pub length: usize,
    pub style: SpanStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStyle {
    Bold,
    Italic,
    Underline,
    Code,
    Link(String),
}

/// Immutable snapshot of the most recent message found in the source
/// channel at poll time. The dispatch engine never writes to it; each
/// delivery task derives its own text variant.
#[derive(Debug, Clone)]
pub struct CapturedMessage {
    pub id: i64,
    pub text: String,
    pub media: Option<MediaRef>,
    pub spans: Vec<FormattingSpan>,
}

/// A message as acknowledged by the provider after sending.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: i64,
    pub media: Option<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    NeedVerificationCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    Success,
    NeedSecondFactor,
    Failed(String),
}

/// One chat the account can see, as listed by the provider.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub name: String,
    pub id: i64,
}

/// Errors surfaced by the transport. The provider library does not always
/// report structured errors; `Other` carries whatever text it gave us and
/// is classified downstream by substring matching.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited: a wait of {0}s is required")]
    RateLimited(u64),
    #[error("no permission to write to this chat")]
    Forbidden,
    #[error("invalid peer")]
    InvalidPeer,
    #[error("not connected")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

/// Narrow async contract the engine drives the chat-protocol client
/// through. Implementations are not assumed safe to drive from more than
/// one execution context; the engine serializes every call through its
/// single background runtime.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, creds: &Credentials) -> Result<ConnectOutcome, TransportError>;
    async fn sign_in(
        &self,
        code: Option<&str>,
        password: Option<&str>,
    ) -> Result<SignInOutcome, TransportError>;
    /// Whether a previously stored session is still valid for these credentials.
    async fn has_valid_session(&self, creds: &Credentials) -> Result<bool, TransportError>;
    /// Latest message of the source channel, if any. Callers impose their
    /// own timeout around this.
    async fn fetch_latest(
        &self,
        source: &Destination,
    ) -> Result<Option<CapturedMessage>, TransportError>;
    async fn list_dialogs(&self, limit: usize) -> Result<Vec<Dialog>, TransportError>;
    async fn send(
        &self,
        dest: &Destination,
        text: &str,
        media: Option<&MediaRef>,
        spans: &[FormattingSpan],
    ) -> Result<SentMessage, TransportError>;
    async fn log_out(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

    use super::*;

    /// Media id the mock hands back for a successful saved-messages echo.
    pub const CACHED_MEDIA_ID: i64 = 424_242;

    /// What the mock should do when asked to send to a given destination.
    #[derive(Debug, Clone)]
    pub enum SendScript {
        Ok,
        RateLimited(u64),
        Forbidden,
        InvalidPeer,
        Text(String),
    }

    #[derive(Debug, Clone)]
    pub struct SendRecord {
        pub dest: Destination,
        pub text: String,
        pub media: Option<MediaRef>,
        pub spans: Vec<FormattingSpan>,
    }

    #[derive(Default)]
    pub struct MockTransport {
        pub latest: Mutex<Option<CapturedMessage>>,
        pub dialogs: Mutex<Vec<Dialog>>,
        pub scripts: Mutex<HashMap<Destination, SendScript>>,
        pub sent: Mutex<Vec<SendRecord>>,
        pub fetch_calls: AtomicUsize,
        pub saved_uploads: AtomicUsize,
        pub hang_fetch: AtomicBool,
        pub hang_dialogs: AtomicBool,
        pub fail_fetch: AtomicBool,
        pub fail_saved_upload: AtomicBool,
        pub authorized: AtomicBool,
        next_id: AtomicI64,
    }

    impl MockTransport {
        pub fn with_latest(message: CapturedMessage) -> Self {
            let mock = Self::default();
            *mock.latest.lock().unwrap() = Some(message);
            mock
        }

        pub fn script(&self, dest: Destination, script: SendScript) {
            self.scripts.lock().unwrap().insert(dest, script);
        }

        pub fn sent_records(&self) -> Vec<SendRecord> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _creds: &Credentials) -> Result<ConnectOutcome, TransportError> {
            if self.authorized.load(Ordering::SeqCst) {
                Ok(ConnectOutcome::Connected)
            } else {
                Ok(ConnectOutcome::NeedVerificationCode)
            }
        }

        async fn sign_in(
            &self,
            _code: Option<&str>,
            _password: Option<&str>,
        ) -> Result<SignInOutcome, TransportError> {
            self.authorized.store(true, Ordering::SeqCst);
            Ok(SignInOutcome::Success)
        }

        async fn has_valid_session(&self, _creds: &Credentials) -> Result<bool, TransportError> {
            Ok(self.authorized.load(Ordering::SeqCst))
        }

        async fn fetch_latest(
            &self,
            _source: &Destination,
        ) -> Result<Option<CapturedMessage>, TransportError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_fetch.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(TransportError::Other("source unreachable".into()));
            }
            Ok(self.latest.lock().unwrap().clone())
        }

        async fn list_dialogs(&self, limit: usize) -> Result<Vec<Dialog>, TransportError> {
            if self.hang_dialogs.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            Ok(self
                .dialogs
                .lock()
                .unwrap()
                .iter()
                .take(limit)
                .cloned()
                .collect())
        }

        async fn send(
            &self,
            dest: &Destination,
            text: &str,
            media: Option<&MediaRef>,
            spans: &[FormattingSpan],
        ) -> Result<SentMessage, TransportError> {
            if *dest == Destination::Saved {
                if self.fail_saved_upload.load(Ordering::SeqCst) {
                    return Err(TransportError::Other("upload failed".into()));
                }
                self.saved_uploads.fetch_add(1, Ordering::SeqCst);
                return Ok(SentMessage {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    media: media.map(|_| MediaRef::Stored { id: CACHED_MEDIA_ID }),
                });
            }
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(dest)
                .cloned()
                .unwrap_or(SendScript::Ok);
            match script {
                SendScript::Ok => {
                    self.sent.lock().unwrap().push(SendRecord {
                        dest: dest.clone(),
                        text: text.to_string(),
                        media: media.cloned(),
                        spans: spans.to_vec(),
                    });
                    Ok(SentMessage {
                        id: self.next_id.fetch_add(1, Ordering::SeqCst),
                        media: None,
                    })
                }
                SendScript::RateLimited(secs) => Err(TransportError::RateLimited(secs)),
                SendScript::Forbidden => Err(TransportError::Forbidden),
                SendScript::InvalidPeer => Err(TransportError::InvalidPeer),
                SendScript::Text(text) => Err(TransportError::Other(text)),
            }
        }

        async fn log_out(&self) -> Result<(), TransportError> {
            self.authorized.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }
}
