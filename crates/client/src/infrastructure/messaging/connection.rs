//! Bus connection lifecycle management.
//!
//! [`BusConnection`] is the cloneable handle the rest of the client holds. The
//! physical socket, the retry timer and every state transition live in the
//! bridge task (see `bridge.rs`); the handle only posts commands to it and
//! reads the snapshot the task publishes here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use robodeck_protocol::ClientOp;
use tokio::sync::mpsc;

use super::bridge::{self, Command};
use super::registry::TopicRegistry;
use super::service::PendingCalls;
use crate::infrastructure::websocket::ReconnectPolicy;
use crate::ports::outbound::TransportConnector;

/// Connection state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, no attempt in progress
    Disconnected,
    /// Attempting to establish the connection
    Connecting,
    /// Socket open, topics registered
    Connected,
    /// Last attempt or link failed.
    ///
    /// Reported a second time, without leaving `Error`, when reconnection
    /// gives up.
    Error,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Error => 3,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Connecting or connected.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Callback invoked on every state transition.
pub type StatusObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: u64,
    entries: Vec<(u64, StatusObserver)>,
}

/// Registration of a status observer.
///
/// Dropping the subscription unregisters the observer.
#[must_use = "dropping the subscription unregisters the observer"]
pub struct StatusSubscription {
    id: u64,
    observers: Weak<Mutex<ObserverList>>,
}

impl StatusSubscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(self) {}
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            lock(&observers).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Live transport handle for one open link.
///
/// Only valid while the connection is `Connected`; the bus replaces it on
/// every reconnect, so callers must not hold on to it.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    session: u64,
    outbound: mpsc::UnboundedSender<String>,
}

impl TransportHandle {
    pub(crate) fn new(session: u64, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { session, outbound }
    }

    /// Identifies the link this handle belongs to.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Send one operation; returns false if it never reached the socket.
    pub fn send(&self, op: &ClientOp) -> bool {
        let frame = match op.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(topic = %op.topic(), error = %e, "Failed to encode operation");
                return false;
            }
        };
        self.outbound.send(frame).is_ok()
    }
}

/// Socket handle, topic registrations and outstanding service calls,
/// guarded together so a channel created mid-reconnect is either replayed by
/// the bus or registers itself, and no call outlives its link.
#[derive(Default)]
pub(crate) struct LinkSlot {
    pub(crate) handle: Option<TransportHandle>,
    pub(crate) registry: TopicRegistry,
    pub(crate) calls: PendingCalls,
}

/// State shared between the bridge task and every handle.
pub(crate) struct Shared {
    state: AtomicU8,
    attempt: AtomicU32,
    retry_pending: AtomicBool,
    exhausted: AtomicBool,
    url: RwLock<Option<String>>,
    link: Mutex<LinkSlot>,
    observers: Arc<Mutex<ObserverList>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            attempt: AtomicU32::new(0),
            retry_pending: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            url: RwLock::new(None),
            link: Mutex::new(LinkSlot::default()),
            observers: Arc::new(Mutex::new(ObserverList::default())),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Record a transition and notify every observer, in registration order.
    ///
    /// Only the bridge task calls this, so notifications leave in the order
    /// transitions happen. Observers run outside the registry lock and a
    /// panicking observer does not stop the others.
    pub(crate) fn transition(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next.to_u8(), Ordering::SeqCst));
        tracing::debug!(?previous, ?next, "Bus state transition");

        let observers: Vec<StatusObserver> = lock(&self.observers)
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(next))).is_err() {
                tracing::warn!(state = ?next, "Status observer panicked");
            }
        }
    }

    pub(crate) fn link(&self) -> MutexGuard<'_, LinkSlot> {
        lock(&self.link)
    }

    pub(crate) fn url(&self) -> Option<String> {
        self.url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_url(&self, url: String) {
        *self.url.write().unwrap_or_else(PoisonError::into_inner) = Some(url);
    }

    pub(crate) fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::SeqCst);
    }

    pub(crate) fn set_retry_pending(&self, pending: bool) {
        self.retry_pending.store(pending, Ordering::SeqCst);
    }

    pub(crate) fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    fn add_observer(&self, observer: StatusObserver) -> StatusSubscription {
        let mut list = lock(&self.observers);
        list.next_id += 1;
        let id = list.next_id;
        list.entries.push((id, observer));
        StatusSubscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the single long-lived bus connection.
///
/// Cheap to clone; every clone talks to the same bridge task. The application
/// shell creates one and passes clones to whatever needs the bus. The bridge
/// task exits (closing the socket) once every clone has been dropped.
#[derive(Clone)]
pub struct BusConnection {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl BusConnection {
    /// Create the connection and spawn its bridge task.
    ///
    /// Must be called from within a tokio runtime. Nothing is opened until
    /// [`BusConnection::connect`] is called.
    pub fn new(connector: Arc<dyn TransportConnector>, policy: ReconnectPolicy) -> Self {
        let shared = Arc::new(Shared::new());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        bridge::spawn(Arc::clone(&shared), connector, policy, commands_rx);
        Self { shared, commands }
    }

    /// Open the connection to `url`.
    ///
    /// Ignored while already connecting or connected. Otherwise any pending
    /// retry is cancelled and the attempt counter starts over.
    pub fn connect(&self, url: impl Into<String>) {
        self.post(Command::Connect(Some(url.into())));
    }

    /// Connect again to the last used URL (e.g. after retries ran out).
    pub fn reconnect(&self) {
        self.post(Command::Connect(None));
    }

    /// Close the connection and stop any reconnection.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Switch to a new URL, reconnecting if the connection is live.
    pub fn set_url(&self, url: impl Into<String>) {
        self.post(Command::SetUrl(url.into()));
    }

    /// Register a callback invoked on every state transition.
    ///
    /// When automatic reconnection gives up, observers get one more `Error`
    /// while the state is already `Error`. [`BusConnection::retries_exhausted`]
    /// is true by the time that call runs.
    pub fn on_status_change<F>(&self, observer: F) -> StatusSubscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared.add_observer(Arc::new(observer))
    }

    /// Live transport handle, or `None` unless connected.
    pub fn current_handle(&self) -> Option<TransportHandle> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.shared.link().handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn url(&self) -> Option<String> {
        self.shared.url()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Whether a retry timer is currently outstanding.
    pub fn retry_pending(&self) -> bool {
        self.shared.retry_pending.load(Ordering::SeqCst)
    }

    /// Whether automatic reconnection gave up.
    pub fn retries_exhausted(&self) -> bool {
        self.shared.exhausted.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!("Bus bridge task is gone; command dropped");
        }
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("state", &self.state())
            .field("url", &self.url())
            .finish()
    }
}
