//! Session state shared between the caller and the background tasks.
//!
//! A [`SessionHandle`] is a cheap clone of the shared session. Callers use it
//! to issue commands; the receiver and sender tasks use the same state to
//! route lines and write frames.

mod receiver;
mod sender;

pub(crate) use receiver::run as run_receiver;
pub(crate) use sender::{CommandRequest, Outbound, run as run_sender};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::SessionConfig;
use crate::correlation::{CorrelationTable, SequenceGenerator};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, ReportQueue, Subscription};
use crate::protocol::{Button, Response};
use crate::types::{ButtonReport, Position, Version};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link, or the link failed.
    Disconnected,
    /// Port open, handshake running.
    Connecting,
    /// Handshake complete.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Firmware and hardware versions cached for the current connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct Identity {
    pub firmware: Option<Version>,
    pub hardware: Option<String>,
}

pub(crate) struct Shared {
    pub config: SessionConfig,
    state: watch::Sender<ConnectionState>,
    device_ready: watch::Sender<bool>,
    sequence: SequenceGenerator,
    pub correlations: CorrelationTable,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    pub positions: ReportQueue<Position>,
    menu_button: ReportQueue<ButtonReport>,
    play_button: ReportQueue<ButtonReport>,
    pub dispatcher: EventDispatcher,
    identity: Mutex<Identity>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once `state` reads `Disconnected`.
pub(crate) async fn disconnected(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await;
}

impl Shared {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_device_ready(&self) -> bool {
        !self.device_ready.send_replace(true)
    }

    pub const fn button_queue(&self, button: Button) -> &ReportQueue<ButtonReport> {
        match button {
            Button::Menu => &self.menu_button,
            Button::Play => &self.play_button,
        }
    }

    pub fn close_reports(&self) {
        self.positions.close();
        self.menu_button.close();
        self.play_button.close();
    }

    /// Marks the session as failed after a fatal I/O error.
    pub fn degrade(&self) {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        self.close_reports();
        if previous != ConnectionState::Disconnected {
            tracing::warn!("session degraded to disconnected");
            self.dispatcher.dispatch(Event::Disconnected);
        }
    }
}

/// Handle to a session's shared state.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Creates an idle session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (device_ready, _) = watch::channel(false);
        let shared = Shared {
            correlations: CorrelationTable::new(
                config.correlation_retention,
                config.correlation_capacity,
            ),
            positions: ReportQueue::new(config.report_capacity),
            menu_button: ReportQueue::new(config.report_capacity),
            play_button: ReportQueue::new(config.report_capacity),
            config,
            state,
            device_ready,
            sequence: SequenceGenerator::new(),
            outbound: Mutex::new(None),
            dispatcher: EventDispatcher::new(EVENT_CAPACITY),
            identity: Mutex::new(Identity::default()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_state()
    }

    /// Returns true once the handshake has completed and the link is alive.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns true if the device sent its readiness line.
    #[must_use]
    pub fn device_ready(&self) -> bool {
        *self.shared.device_ready.borrow()
    }

    /// Returns the response timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.shared.config.timeout
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.dispatcher.subscribe()
    }

    /// Sends a command and waits for its correlated response.
    ///
    /// Returns `Ok(None)` if no response arrived within the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not connected and
    /// [`Error::InvalidArgument`] if `payload` contains a line terminator.
    pub async fn send_and_receive(&self, payload: &str) -> Result<Option<Response>> {
        self.request(payload, !self.shared.config.require_ready).await
    }

    /// Queues a command without waiting for its response and returns the
    /// sequence id it was given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not connected and
    /// [`Error::InvalidArgument`] if `payload` contains a line terminator.
    pub fn send_only(&self, payload: &str) -> Result<u16> {
        self.enqueue(payload, false, !self.shared.config.require_ready)
    }

    /// Pops the newest position report, waiting up to the timeout.
    pub async fn get_report_position(&self) -> Option<Position> {
        self.shared.positions.pop(self.timeout()).await
    }

    /// Pops the newest report for `button`. With `wait`, waits up to the
    /// timeout for one to arrive.
    pub async fn get_report_button(&self, button: Button, wait: bool) -> Option<ButtonReport> {
        let queue = self.shared.button_queue(button);
        if wait {
            queue.pop(self.timeout()).await
        } else {
            queue.try_pop()
        }
    }

    pub(crate) async fn request(
        &self,
        payload: &str,
        allow_connecting: bool,
    ) -> Result<Option<Response>> {
        let id = self.enqueue(payload, true, allow_connecting)?;
        let timeout = self.timeout();

        match self.shared.correlations.wait_take(id, timeout).await {
            Some(fields) => Ok(Some(Response::new(id, fields))),
            None => {
                tracing::debug!("no response to #{} {} within {:?}", id, payload, timeout);
                Ok(None)
            }
        }
    }

    fn enqueue(&self, payload: &str, wait: bool, allow_connecting: bool) -> Result<u16> {
        if payload.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument {
                reason: format!("payload {payload:?} contains a line terminator"),
            });
        }

        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Connecting if allow_connecting => {}
            _ => return Err(Error::NotConnected),
        }

        let id = self.shared.sequence.next_id();
        self.shared.correlations.discard(id);

        let request = CommandRequest {
            sequence_id: id,
            payload: payload.to_string(),
            wait,
        };

        let outbound = lock(&self.shared.outbound);
        let sender = outbound.as_ref().ok_or(Error::NotConnected)?;
        sender
            .send(Outbound::Command(request))
            .map_err(|_| Error::NotConnected)?;
        Ok(id)
    }

    /// Resets per-connection state and opens a fresh outbound queue.
    pub(crate) fn begin(&self) -> mpsc::UnboundedReceiver<Outbound> {
        let shared = &self.shared;
        shared.correlations.clear();
        shared.sequence.reset();
        shared.positions.reset();
        shared.menu_button.reset();
        shared.play_button.reset();
        shared.device_ready.send_replace(false);
        *lock(&shared.identity) = Identity::default();

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&shared.outbound) = Some(tx);
        shared.state.send_replace(ConnectionState::Connecting);
        rx
    }

    /// Waits up to `timeout` for the readiness line.
    pub(crate) async fn wait_device_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.shared.device_ready.subscribe();
        let mut state = self.watch_state();
        let became_ready = async move { ready.wait_for(|ready| *ready).await.is_ok() };
        tokio::select! {
            result = tokio::time::timeout(timeout, became_ready) => result.unwrap_or(false),
            () = disconnected(&mut state) => false,
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.shared.state.send_modify(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Ready;
            }
        });
    }

    /// Moves to `Disconnected`, queues the shutdown sentinel and releases
    /// report consumers. Returns true if the session was not already
    /// disconnected.
    pub(crate) fn shutdown(&self) -> bool {
        let shared = &self.shared;
        let previous = shared.state.send_replace(ConnectionState::Disconnected);
        if let Some(tx) = lock(&shared.outbound).take() {
            // The sender may already be gone
            let _ = tx.send(Outbound::Shutdown);
        }
        shared.close_reports();
        previous != ConnectionState::Disconnected
    }

    pub(crate) fn identity(&self) -> Identity {
        lock(&self.shared.identity).clone()
    }

    pub(crate) fn update_identity(&self, update: impl FnOnce(&mut Identity)) {
        update(&mut lock(&self.shared.identity));
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_rejected_while_disconnected() {
        let session = SessionHandle::new(SessionConfig::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(session.send_only("P2203"), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_and_receive_rejected_while_disconnected() {
        let session = SessionHandle::new(SessionConfig::default());
        let result = session.send_and_receive("P2203").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[test]
    fn test_gating_while_connecting() {
        let lenient = SessionHandle::new(SessionConfig::default());
        let mut queue = lenient.begin();
        assert_eq!(lenient.state(), ConnectionState::Connecting);
        assert_eq!(lenient.send_only("P2203").unwrap(), 1);
        assert!(matches!(
            queue.try_recv(),
            Ok(Outbound::Command(r)) if r.sequence_id == 1 && !r.wait
        ));

        let strict = SessionHandle::new(SessionConfig::default().require_ready(true));
        let _queue = strict.begin();
        assert!(matches!(strict.send_only("P2203"), Err(Error::NotConnected)));
        strict.mark_ready();
        assert!(strict.is_ready());
        assert!(strict.send_only("P2203").is_ok());
    }

    #[test]
    fn test_embedded_terminator_rejected_without_taking_id() {
        let session = SessionHandle::new(SessionConfig::default());
        let mut queue = session.begin();

        for payload in ["P2220\n#1 M2231 V1", "P2220\r", "\n"] {
            assert!(matches!(
                session.send_only(payload),
                Err(Error::InvalidArgument { .. })
            ));
        }
        assert!(queue.try_recv().is_err());

        assert_eq!(session.send_only("P2220").unwrap(), 1);
        assert!(matches!(
            queue.try_recv(),
            Ok(Outbound::Command(r)) if r.sequence_id == 1 && r.payload == "P2220"
        ));
    }

    #[tokio::test]
    async fn test_send_and_receive_rejects_embedded_terminator() {
        let session = SessionHandle::new(SessionConfig::default());
        let mut queue = session.begin();

        let result = session.send_and_receive("M2231 V1\r\n#2 M2231 V0").await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_sends_sentinel_once() {
        let session = SessionHandle::new(SessionConfig::default());
        let mut queue = session.begin();

        assert!(session.shutdown());
        assert!(matches!(queue.try_recv(), Ok(Outbound::Shutdown)));
        assert!(!session.shutdown());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(session.send_only("P2203"), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_request_times_out_with_none() {
        let config = SessionConfig::default().timeout(Duration::from_millis(50));
        let session = SessionHandle::new(config);
        let _queue = session.begin();

        let response = session.send_and_receive("P2220").await.unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_request_returns_correlated_response() {
        let session = SessionHandle::new(SessionConfig::default());
        let mut queue = session.begin();
        let shared = session.shared();

        let device = tokio::spawn(async move {
            if let Some(Outbound::Command(request)) = queue.recv().await {
                shared
                    .correlations
                    .insert(request.sequence_id, vec!["OK".into(), "V3.2.1".into()]);
            }
        });

        let response = session.send_and_receive("P2203").await.unwrap().unwrap();
        assert_eq!(response.sequence_id, 1);
        assert_eq!(response.value(0), Some("3.2.1"));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_degrade_releases_report_waiters() {
        let session = SessionHandle::new(SessionConfig::default());
        let _queue = session.begin();
        let mut events = session.subscribe();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.get_report_position().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.shared().degrade();
        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(events.recv().await, Some(Event::Disconnected));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
