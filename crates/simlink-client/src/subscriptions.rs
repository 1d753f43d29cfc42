//! Bounded, filtered consumer queues.
//!
//! A [`Subscription`] is an isolated queue fed by the dispatch task. Delivery
//! never blocks: when a queue is full the item is dropped for that
//! subscription only, the drop is counted and the optional drop callback
//! runs.
//!
//! ## Filters
//!
//! - **All**: every item is delivered.
//! - **Predicate**: a caller supplied function decides. A panicking predicate
//!   counts as a rejection.
//! - **Allow set**: only envelopes whose [`MessageKind`] is in a fixed set.
//!
//! ## Lifetime
//!
//! Each subscription holds a child of the client's cancellation token. It is
//! closed by [`Subscription::unsubscribe`], by dropping the handle, or when
//! the client shuts down. Closing is idempotent: the queue is closed, the
//! done signal fires and the shutdown tracker is released exactly once.

use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use simlink_transport_traits::MessageKind;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::{ClientError, Result};
use crate::handlers::panic_message;
use crate::metrics::ClientMetrics;

/// Called with the subscription name whenever a delivery is dropped.
pub type DropCallback = dyn Fn(&str) + Send + Sync;

/// Unique id of a subscription within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Settings for a new subscription.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Name used in logs and passed to the drop callback.
    pub name: Option<String>,
    /// Queue capacity. Defaults to the client's `buffer_size`.
    pub capacity: Option<usize>,
    /// Called whenever a delivery is dropped because the queue is full.
    pub on_drop: Option<Arc<DropCallback>>,
}

impl SubscriptionOptions {
    /// Options with every field defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the drop callback.
    pub fn on_drop<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_drop = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("on_drop", &self.on_drop.is_some())
            .finish()
    }
}

/// Predicate deciding whether an item is delivered.
pub(crate) type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Which items a subscription accepts.
pub(crate) enum Filter<T> {
    All,
    Predicate(Predicate<T>),
    AllowSet {
        kinds: HashSet<MessageKind>,
        classify: fn(&T) -> MessageKind,
    },
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Predicate(_) => write!(f, "Predicate"),
            Self::AllowSet { kinds, .. } => f.debug_tuple("AllowSet").field(kinds).finish(),
        }
    }
}

/// Counts open subscriptions so shutdown can wait for them to close.
#[derive(Debug, Default)]
pub(crate) struct ShutdownTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ShutdownTracker {
    fn acquire(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until nothing is tracked. Returns `false` on timeout.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let mut idle = std::pin::pin!(self.idle.notified());
                idle.as_mut().enable();
                if self.active() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

pub(crate) struct Entry<T> {
    id: SubscriptionId,
    name: Arc<str>,
    filter: Filter<T>,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    closed: AtomicBool,
    token: CancellationToken,
    on_drop: Option<Arc<DropCallback>>,
    dropped: AtomicU64,
}

impl<T> Entry<T> {
    fn accepts(&self, item: &T, metrics: &ClientMetrics) -> bool {
        match &self.filter {
            Filter::All => true,
            Filter::AllowSet { kinds, classify } => kinds.contains(&classify(item)),
            Filter::Predicate(predicate) => {
                match catch_unwind(AssertUnwindSafe(|| predicate(item))) {
                    Ok(accepted) => accepted,
                    Err(payload) => {
                        ClientMetrics::incr(&metrics.predicate_panics);
                        error!(
                            subscription = %self.name,
                            panic = %panic_message(payload.as_ref()),
                            "Subscription predicate panicked, rejecting"
                        );
                        false
                    }
                }
            }
        }
    }

    /// Marks the entry closed. Returns `false` if it already was.
    fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        self.sender.lock().take();
        true
    }

    fn report_drop(&self, metrics: &ClientMetrics) {
        ClientMetrics::incr(&metrics.subscription_drops);
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(subscription = %self.name, dropped, "Queue full, delivery dropped");

        if let Some(callback) = &self.on_drop
            && let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&self.name)))
        {
            ClientMetrics::incr(&metrics.handler_panics);
            error!(
                subscription = %self.name,
                panic = %panic_message(payload.as_ref()),
                "Drop callback panicked"
            );
        }
    }
}

struct RegistryInner<T> {
    kind: &'static str,
    default_capacity: usize,
    next_id: Arc<AtomicU64>,
    entries: RwLock<Vec<Arc<Entry<T>>>>,
    tracker: Arc<ShutdownTracker>,
    metrics: Arc<ClientMetrics>,
    root: CancellationToken,
}

impl<T> RegistryInner<T> {
    fn close(&self, entry: &Entry<T>) -> bool {
        if !entry.mark_closed() {
            return false;
        }
        self.entries.write().retain(|e| e.id != entry.id);
        self.tracker.release();
        debug!(kind = self.kind, subscription = %entry.name, id = %entry.id, "Subscription closed");
        true
    }
}

/// Subscriptions carrying items of one type.
pub(crate) struct SubscriptionRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for SubscriptionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("kind", &self.inner.kind)
            .field("len", &self.inner.entries.read().len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> SubscriptionRegistry<T> {
    pub(crate) fn new(
        kind: &'static str,
        default_capacity: usize,
        next_id: Arc<AtomicU64>,
        tracker: Arc<ShutdownTracker>,
        metrics: Arc<ClientMetrics>,
        root: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                kind,
                default_capacity,
                next_id,
                entries: RwLock::new(Vec::new()),
                tracker,
                metrics,
                root,
            }),
        }
    }

    /// Opens a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ShuttingDown`] once the client is shutting down.
    pub(crate) fn subscribe(
        &self,
        options: SubscriptionOptions,
        filter: Filter<T>,
    ) -> Result<Subscription<T>> {
        if self.inner.root.is_cancelled() {
            return Err(ClientError::ShuttingDown);
        }

        // mpsc::channel panics on zero capacity
        let capacity = options
            .capacity
            .unwrap_or(self.inner.default_capacity)
            .max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = match options.name {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("{}-{}", self.inner.kind, id.0)),
        };

        let entry = Arc::new(Entry {
            id,
            name,
            filter,
            sender: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            token: self.inner.root.child_token(),
            on_drop: options.on_drop,
            dropped: AtomicU64::new(0),
        });

        self.inner.tracker.acquire();
        self.inner.entries.write().push(Arc::clone(&entry));
        self.spawn_watcher(&entry);

        debug!(
            kind = self.inner.kind,
            subscription = %entry.name,
            id = %id,
            capacity,
            filter = ?entry.filter,
            "Subscription opened"
        );

        Ok(Subscription {
            entry,
            receiver: rx,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Closes the subscription as soon as its token is cancelled, which also
    /// covers cancellation of the client's root token.
    fn spawn_watcher(&self, entry: &Arc<Entry<T>>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Without a runtime only explicit unsubscribe and close_all apply
            return;
        };
        let entry = Arc::clone(entry);
        let registry = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            entry.token.cancelled().await;
            if let Some(registry) = registry.upgrade() {
                registry.close(&entry);
            }
        });
    }

    /// Copies the open entries into `scratch`.
    pub(crate) fn snapshot_into(&self, scratch: &mut Vec<Arc<Entry<T>>>) {
        scratch.clear();
        scratch.extend(self.inner.entries.read().iter().cloned());
    }

    /// Offers `item` to every entry in `scratch`, draining it.
    ///
    /// Returns the number of queues the item was enqueued on.
    pub(crate) fn deliver(&self, item: &T, scratch: &mut Vec<Arc<Entry<T>>>) -> usize {
        let metrics = &self.inner.metrics;
        let mut delivered = 0;

        for entry in scratch.drain(..) {
            if entry.closed.load(Ordering::SeqCst) || !entry.accepts(item, metrics) {
                continue;
            }

            let outcome = {
                let sender = entry.sender.lock();
                match sender.as_ref() {
                    Some(tx) => tx.try_send(item.clone()),
                    None => continue,
                }
            };

            match outcome {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => entry.report_drop(metrics),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver gone without an unsubscribe
                    self.inner.close(&entry);
                }
            }
        }

        delivered
    }

    /// Snapshots and delivers in one step.
    pub(crate) fn publish(&self, item: &T, scratch: &mut Vec<Arc<Entry<T>>>) -> usize {
        self.snapshot_into(scratch);
        if scratch.is_empty() {
            return 0;
        }
        self.deliver(item, scratch)
    }

    /// Closes every open subscription. Returns how many were closed.
    pub(crate) fn close_all(&self) -> usize {
        let entries: Vec<_> = self.inner.entries.read().iter().cloned().collect();
        entries
            .iter()
            .filter(|entry| self.inner.close(entry))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.entries.read().len()
    }
}

/// Receiving end of a subscription.
///
/// Items already queued can still be received after the subscription closes;
/// [`recv`](Self::recv) returns `None` once the queue is closed and drained.
/// Dropping the handle unsubscribes.
pub struct Subscription<T> {
    entry: Arc<Entry<T>>,
    receiver: mpsc::Receiver<T>,
    registry: Weak<RegistryInner<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next item.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Takes the next item if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Unique id.
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    /// Name given at creation, or a generated one.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Returns `true` once the subscription no longer receives new items.
    pub fn is_closed(&self) -> bool {
        self.entry.closed.load(Ordering::SeqCst)
    }

    /// Deliveries dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.entry.dropped.load(Ordering::Relaxed)
    }

    /// Items waiting in the queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Stops delivery. Returns `false` if the subscription was already closed.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.close(&self.entry),
            // Registry gone: nothing to remove or release
            None => self.entry.mark_closed(),
        }
    }

    /// Resolves once the subscription is closed.
    pub async fn done(&self) {
        self.entry.token.cancelled().await;
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("name", &self.entry.name)
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> (SubscriptionRegistry<u32>, Arc<ShutdownTracker>, CancellationToken) {
        let tracker = Arc::new(ShutdownTracker::default());
        let root = CancellationToken::new();
        let registry = SubscriptionRegistry::new(
            "test",
            capacity,
            Arc::new(AtomicU64::new(1)),
            Arc::clone(&tracker),
            Arc::new(ClientMetrics::new()),
            root.clone(),
        );
        (registry, tracker, root)
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (registry, _, _) = registry(2);
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        let sub = registry
            .subscribe(
                SubscriptionOptions::new().on_drop(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Filter::All,
            )
            .unwrap();

        let mut scratch = Vec::new();
        for n in 0..10 {
            registry.publish(&n, &mut scratch);
        }

        assert_eq!(sub.queued(), 2);
        assert_eq!(sub.dropped(), 8);
        assert_eq!(drops.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (registry, tracker, _) = registry(4);
        let sub = registry.subscribe(SubscriptionOptions::new(), Filter::All).unwrap();
        assert_eq!(tracker.active(), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(sub.is_closed());
        assert_eq!(tracker.active(), 0);
        assert_eq!(registry.len(), 0);

        drop(sub);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_predicate_panic_rejects() {
        let (registry, _, _) = registry(4);
        let mut sub = registry
            .subscribe(
                SubscriptionOptions::new(),
                Filter::Predicate(Arc::new(|n: &u32| {
                    assert!(*n != 13, "unlucky");
                    n % 2 == 1
                })),
            )
            .unwrap();

        let mut scratch = Vec::new();
        for n in [1, 2, 13, 3] {
            registry.publish(&n, &mut scratch);
        }

        assert_eq!(sub.try_recv(), Some(1));
        assert_eq!(sub.try_recv(), Some(3));
        assert_eq!(sub.try_recv(), None);
        assert_eq!(registry.inner.metrics.snapshot().predicate_panics, 1);
    }

    #[tokio::test]
    async fn test_root_cancel_closes_subscriptions() {
        let (registry, tracker, root) = registry(4);
        let sub = registry.subscribe(SubscriptionOptions::new(), Filter::All).unwrap();

        root.cancel();
        sub.done().await;
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
        assert!(sub.is_closed());
        assert!(matches!(
            registry.subscribe(SubscriptionOptions::new(), Filter::All),
            Err(ClientError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_queued_items_survive_close() {
        let (registry, _, _) = registry(4);
        let mut sub = registry
            .subscribe(SubscriptionOptions::new().named("drain"), Filter::All)
            .unwrap();
        assert_eq!(sub.name(), "drain");

        let mut scratch = Vec::new();
        registry.publish(&7, &mut scratch);
        assert_eq!(registry.close_all(), 1);

        assert_eq!(sub.recv().await, Some(7));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (registry, _, _) = registry(4);
        let mut sub = registry
            .subscribe(SubscriptionOptions::new().with_capacity(0), Filter::All)
            .unwrap();
        let mut scratch = Vec::new();
        assert_eq!(registry.publish(&1, &mut scratch), 1);
        assert_eq!(registry.publish(&2, &mut scratch), 0);
        assert_eq!(sub.try_recv(), Some(1));
    }
}
