//! Channel-backed message source.
//!
//! [`ChannelSource`] is the bridge between a native SDK and the async engine:
//! whatever thread receives the SDK callbacks holds a [`ChannelFeed`] and
//! pushes decoded envelopes into it. Each `connect` opens a fresh session
//! channel, so envelopes pushed for one session can never leak into the next.
//!
//! ```rust
//! use simlink_transport_traits::{ChannelSource, Envelope, MessageSource, OpenInfo};
//!
//! # tokio_test::block_on(async {
//! let (source, feed) = ChannelSource::new();
//! source.connect("demo").await.unwrap();
//! feed.push(Envelope::open(OpenInfo::default())).unwrap();
//! let env = source.next_message().await.unwrap();
//! assert!(matches!(env.kind, simlink_transport_traits::MessageKind::Open));
//! # });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};

use crate::error::{SourceError, SourceResult};
use crate::message::Envelope;
use crate::traits::MessageSource;
use crate::types::SourceRequest;

/// Decides whether connect attempt number `attempt` (1-based) succeeds.
type Connector = dyn Fn(u32, &str) -> SourceResult<()> + Send + Sync;

struct ChannelShared {
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    connector: Box<Connector>,
    attempts: AtomicU32,
    sessions: AtomicU64,
    session_opened: Notify,
    requests: Mutex<Vec<SourceRequest>>,
}

/// A [`MessageSource`] fed through an in-process channel.
#[derive(Clone)]
pub struct ChannelSource {
    shared: Arc<ChannelShared>,
}

/// Producer side of a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelFeed {
    shared: Arc<ChannelShared>,
}

impl ChannelSource {
    /// Creates a source whose connect attempts always succeed.
    pub fn new() -> (Self, ChannelFeed) {
        Self::with_connector(|_, _| Ok(()))
    }

    /// Creates a source whose connect attempts are answered by `connector`.
    pub fn with_connector<F>(connector: F) -> (Self, ChannelFeed)
    where
        F: Fn(u32, &str) -> SourceResult<()> + Send + Sync + 'static,
    {
        let shared = Arc::new(ChannelShared {
            tx: Mutex::new(None),
            rx: tokio::sync::Mutex::new(None),
            connector: Box::new(connector),
            attempts: AtomicU32::new(0),
            sessions: AtomicU64::new(0),
            session_opened: Notify::new(),
            requests: Mutex::new(Vec::new()),
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            ChannelFeed { shared },
        )
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn connect(&self, client_name: &str) -> SourceResult<()> {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        (self.shared.connector)(attempt, client_name)?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.rx.lock().await = Some(rx);
        *self.shared.tx.lock() = Some(tx);

        let session = self.shared.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.session_opened.notify_waiters();
        info!(client_name, attempt, session, "Channel session opened");
        Ok(())
    }

    async fn next_message(&self) -> Option<Envelope> {
        let mut guard = self.shared.rx.lock().await;
        let rx = guard.as_mut()?;
        let next = rx.recv().await;
        if next.is_none() {
            *guard = None;
        }
        next
    }

    async fn disconnect(&self) -> SourceResult<()> {
        if self.shared.tx.lock().take().is_some() {
            debug!("Channel session closed by disconnect");
        }
        Ok(())
    }

    async fn send_request(&self, request: SourceRequest) -> SourceResult<()> {
        if self.shared.tx.lock().is_none() {
            return Err(SourceError::NotConnected);
        }
        self.shared.requests.lock().push(request);
        Ok(())
    }
}

impl ChannelFeed {
    /// Pushes an envelope into the current session.
    pub fn push(&self, envelope: Envelope) -> SourceResult<()> {
        let guard = self.shared.tx.lock();
        let tx = guard.as_ref().ok_or(SourceError::NotConnected)?;
        tx.send(envelope).map_err(|_| SourceError::NotConnected)
    }

    /// Pushes several envelopes in order.
    pub fn push_all(&self, envelopes: impl IntoIterator<Item = Envelope>) -> SourceResult<()> {
        envelopes.into_iter().try_for_each(|env| self.push(env))
    }

    /// Ends the current session; the consumer sees the stream close once it
    /// has drained what was already pushed.
    pub fn close_session(&self) {
        if self.shared.tx.lock().take().is_some() {
            debug!("Channel session closed by feed");
        }
    }

    /// Reports a stream failure and then ends the session.
    pub fn fail_session(&self, error: SourceError) {
        if let Err(push_error) = self.push(Envelope::failed(error)) {
            debug!(error = %push_error, "No session to report the failure to");
        }
        self.close_session();
    }

    /// Returns `true` while a session is open.
    pub fn is_connected(&self) -> bool {
        self.shared.tx.lock().is_some()
    }

    /// Number of connect attempts seen so far, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Number of sessions opened so far.
    pub fn sessions(&self) -> u64 {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` sessions have been opened.
    pub async fn wait_for_session(&self, count: u64) {
        loop {
            let mut notified = std::pin::pin!(self.shared.session_opened.notified());
            notified.as_mut().enable();
            if self.sessions() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Every request issued so far, in order.
    pub fn requests(&self) -> Vec<SourceRequest> {
        self.shared.requests.lock().clone()
    }

    /// Drains the request log.
    pub fn take_requests(&self) -> Vec<SourceRequest> {
        std::mem::take(&mut *self.shared.requests.lock())
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("connected", &self.shared.tx.lock().is_some())
            .field("attempts", &self.shared.attempts.load(Ordering::Relaxed))
            .field("sessions", &self.shared.sessions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ChannelFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFeed")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
