//! Connection lifecycle
//!
//! [`ConnectionController`] owns the [`ConnectionState`] of one client. Every
//! transition goes through a single check-and-set, observers are notified
//! synchronously in registration order, and the side effects of entering or
//! leaving `Connected` (dispatcher, heartbeat, pending waiters) happen in the
//! same step.
//!
//! ```text
//!             connect()                 transport ok
//! Disconnected ─────────► Connecting ─────────────────► Connected
//!      ▲  ▲                   │                            │ │
//!      │  │                   │ transport error            │ │ heartbeat failure
//!      │  │                   ▼                            │ ▼
//!      │  │ disconnect()    Error ◄─────────────────────────┘ Error
//!      │  └── Disconnecting ◄─┘   (reconnect scheduled with backoff)
//!      └─ peer closed (reconnect scheduled)
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use relaymcp_protocol::{McpError, McpResult, methods};
use relaymcp_transport::Transport;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken as TimerToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::protocol::ProtocolClient;
use crate::stats::StatsRecorder;
use crate::subscribers::{SubscriberRegistry, Subscription};

const TRANSITION_IN_PROGRESS: &str = "connection transition already in progress";

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Ready for calls
    Connected,
    /// Transport close in progress
    Disconnecting,
    /// Connection failed or was lost
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        })
    }
}

type StateObserver = dyn Fn(ConnectionState) + Send + Sync;

/// Drives the connection state machine, the heartbeat and reconnection
///
/// Cloning yields another handle to the same controller.
pub struct ConnectionController<T: Transport + 'static> {
    inner: Arc<ControllerInner<T>>,
}

struct ControllerInner<T: Transport + 'static> {
    config: ClientConfig,
    protocol: Arc<ProtocolClient<T>>,
    stats: Arc<StatsRecorder>,

    /// Serializes transitions so observers see them in the order they happened
    transition_lock: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    observers: Arc<SubscriberRegistry<StateObserver>>,

    /// Backoff attempts in the current outage
    attempts: AtomicU32,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    /// Timer of the scheduled or running reconnection, if any
    pending_reconnect: Mutex<Option<TimerToken>>,
    /// Set when the connection was abandoned without closing the transport
    stale_link: AtomicBool,
}

impl<T: Transport + 'static> ConnectionController<T> {
    pub(crate) fn new(
        config: ClientConfig,
        protocol: Arc<ProtocolClient<T>>,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        let inner = Arc::new(ControllerInner {
            config,
            protocol,
            stats,
            transition_lock: Mutex::new(()),
            state: watch::Sender::new(ConnectionState::Disconnected),
            observers: SubscriberRegistry::new(),
            attempts: AtomicU32::new(0),
            heartbeat: Mutex::new(None),
            pending_reconnect: Mutex::new(None),
            stale_link: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .protocol
            .dispatcher()
            .set_close_handler(Arc::new(move |reason: Option<String>| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_transport_closed(reason);
                }
            }));

        Self { inner }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether calls can be issued
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Backoff attempts scheduled since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Observe every state transition
    ///
    /// Observers run synchronously, in registration order, on the task that
    /// performed the transition.
    pub fn on_state_change(
        &self,
        observer: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(Arc::new(observer))
    }

    /// Connect the transport
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` when already connected
    /// - `InvalidRequest` while another transition is in progress
    /// - the transport's error when it fails to connect; the state is then
    ///   `Error` and a reconnection is scheduled if enabled
    ///
    /// A reconnection attempt that is already dialing is abandoned first.
    pub async fn connect(&self) -> McpResult<()> {
        let inner = &self.inner;
        inner.preempt_reconnect().await;

        match inner.transition(
            |s| matches!(s, ConnectionState::Disconnected | ConnectionState::Error),
            ConnectionState::Connecting,
        ) {
            Ok(_) => {}
            Err(ConnectionState::Connected) => return Err(McpError::already_connected()),
            Err(_) => return Err(McpError::invalid_request(TRANSITION_IN_PROGRESS)),
        }

        info!(endpoint = ?inner.protocol.transport().endpoint(), "Connecting");
        let guard = SettleGuard::new(inner, ConnectionState::Connecting, ConnectionState::Error);
        inner.close_stale_link().await;
        let result = inner.protocol.connect().await;
        guard.disarm();

        match result {
            Ok(()) => {
                let _ = inner.transition(
                    |s| s == ConnectionState::Connecting,
                    ConnectionState::Connected,
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connection failed");
                let _ = inner.transition(
                    |s| s == ConnectionState::Connecting,
                    ConnectionState::Error,
                );
                inner.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Disconnect the transport
    ///
    /// Stops the heartbeat, the dispatcher and any pending reconnection. A
    /// reconnection attempt that is already dialing is abandoned and settles
    /// in `Disconnected`. A no-op when already disconnected.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` while another transition is in progress
    /// - the transport's close error; the state still ends at `Disconnected`
    pub async fn disconnect(&self) -> McpResult<()> {
        let inner = &self.inner;
        inner.preempt_reconnect().await;
        inner.stale_link.store(false, Ordering::SeqCst);

        match inner.transition(
            |s| matches!(s, ConnectionState::Connected | ConnectionState::Error),
            ConnectionState::Disconnecting,
        ) {
            Ok(_) => {}
            Err(ConnectionState::Disconnected) => return Ok(()),
            Err(_) => return Err(McpError::invalid_request(TRANSITION_IN_PROGRESS)),
        }

        let guard = SettleGuard::new(
            inner,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        );
        let result = inner.protocol.disconnect().await;
        guard.disarm();

        let _ = inner.transition(
            |s| s == ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        );
        if let Err(e) = &result {
            warn!(error = %e, "Transport reported an error while closing");
        }
        result
    }
}

impl<T: Transport + 'static> ControllerInner<T> {
    /// Move to `next` if `allowed(current)` holds
    ///
    /// Returns the previous state, or the current one if the transition was
    /// refused. Entering or leaving `Connected` starts or stops the
    /// dispatcher and heartbeat before observers are told.
    fn transition(
        self: &Arc<Self>,
        allowed: impl FnOnce(ConnectionState) -> bool,
        next: ConnectionState,
    ) -> Result<ConnectionState, ConnectionState> {
        let _serial = self.transition_lock.lock();

        let previous = *self.state.borrow();
        if previous == next || !allowed(previous) {
            return Err(previous);
        }
        self.state.send_replace(next);
        info!(from = %previous, to = %next, "Connection state changed");

        if previous == ConnectionState::Connected {
            self.leave_connected();
        }
        if next == ConnectionState::Connected {
            self.enter_connected();
        }

        self.observers.emit("connection state", |observer| observer(next));
        Ok(previous)
    }

    fn enter_connected(self: &Arc<Self>) {
        self.stats.record_connect();
        self.attempts.store(0, Ordering::SeqCst);
        self.protocol
            .dispatcher()
            .start(Arc::clone(self.protocol.transport()));
        self.start_heartbeat();
    }

    fn leave_connected(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
        self.protocol.dispatcher().stop();
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let Some(interval) = self.config.heartbeat_interval() else {
            return;
        };
        let weak = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                let timeout = inner.config.heartbeat_timeout();
                match inner.protocol.request(methods::PING, None, timeout).await {
                    Ok(_) => trace!("Heartbeat acknowledged"),
                    Err(e) => {
                        warn!(error = %e, "Heartbeat failed");
                        inner.handle_connection_failure();
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    /// The transport is still open; the next connect or disconnect closes it
    fn handle_connection_failure(self: &Arc<Self>) {
        if self
            .transition(
                |s| s == ConnectionState::Connected,
                ConnectionState::Error,
            )
            .is_ok()
        {
            self.stale_link.store(true, Ordering::SeqCst);
            self.schedule_reconnect();
        }
    }

    async fn close_stale_link(&self) {
        if !self.stale_link.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("Closing the abandoned transport before dialing again");
        if let Err(e) = self.protocol.disconnect().await {
            debug!(error = %e, "Ignoring close error on the abandoned transport");
        }
    }

    fn handle_transport_closed(self: &Arc<Self>, reason: Option<String>) {
        if self
            .transition(
                |s| s == ConnectionState::Connected,
                ConnectionState::Disconnected,
            )
            .is_ok()
        {
            warn!(
                reason = reason.as_deref().unwrap_or("closed by peer"),
                "Connection lost"
            );
            self.schedule_reconnect();
        }
    }

    /// Schedule the next reconnection attempt, if the budget allows
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect {
            return;
        }

        let max_retries = self.config.max_retries;
        let Ok(attempt) = self.attempts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < max_retries).then_some(n + 1)
        }) else {
            warn!(max_retries, "Reconnection attempts exhausted");
            return;
        };
        self.stats.record_reconnect();

        let delay = self.config.backoff_delay(attempt);
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection"
        );

        let timer = TimerToken::new();
        if let Some(previous) = self.pending_reconnect.lock().replace(timer.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.reconnect(attempt + 1, timer).await;
            }
        });
    }

    async fn reconnect(self: Arc<Self>, attempt: u32, timer: TimerToken) {
        let started = self.transition(
            |s| {
                matches!(s, ConnectionState::Disconnected | ConnectionState::Error)
                    && !timer.is_cancelled()
            },
            ConnectionState::Connecting,
        );
        if started.is_err() {
            debug!(attempt, "Reconnection superseded");
            return;
        }

        let guard = SettleGuard::new(&self, ConnectionState::Connecting, ConnectionState::Error);
        self.close_stale_link().await;
        let result = tokio::select! {
            biased;
            () = timer.cancelled() => None,
            result = self.protocol.connect() => Some(result),
        };
        guard.disarm();

        match result {
            Some(Ok(())) if !timer.is_cancelled() => {
                let _ = self.transition(
                    |s| s == ConnectionState::Connecting,
                    ConnectionState::Connected,
                );
                info!(attempt, "Reconnected");
            }
            Some(Err(e)) if !timer.is_cancelled() => {
                warn!(attempt, error = %e, "Reconnection attempt failed");
                let _ = self.transition(
                    |s| s == ConnectionState::Connecting,
                    ConnectionState::Error,
                );
                self.schedule_reconnect();
            }
            _ => {
                info!(attempt, "Reconnection abandoned");
                if let Err(e) = self.protocol.disconnect().await {
                    debug!(error = %e, "Ignoring close error after an abandoned reconnection");
                }
                let _ = self.transition(
                    |s| s == ConnectionState::Connecting,
                    ConnectionState::Disconnected,
                );
            }
        }
    }

    /// Cancel any scheduled reconnection; if its attempt is already dialing,
    /// wait until it has left `Connecting`
    async fn preempt_reconnect(&self) {
        let Some(timer) = self.pending_reconnect.lock().take() else {
            return;
        };
        timer.cancel();

        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await;
    }
}

impl<T: Transport + 'static> Drop for ControllerInner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.pending_reconnect.get_mut().take() {
            timer.cancel();
        }
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.abort();
        }
        self.protocol.dispatcher().stop();
    }
}

/// Leaves an intermediate state if the awaiting future is dropped midway
struct SettleGuard<'a, T: Transport + 'static> {
    inner: &'a Arc<ControllerInner<T>>,
    from: ConnectionState,
    to: ConnectionState,
    armed: bool,
}

impl<'a, T: Transport + 'static> SettleGuard<'a, T> {
    fn new(inner: &'a Arc<ControllerInner<T>>, from: ConnectionState, to: ConnectionState) -> Self {
        Self {
            inner,
            from,
            to,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Transport + 'static> Drop for SettleGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let from = self.from;
            let _ = self.inner.transition(|s| s == from, self.to);
        }
    }
}

impl<T: Transport + 'static> Clone for ConnectionController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> fmt::Debug for ConnectionController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .field("observers", &self.inner.observers.len())
            .finish()
    }
}
