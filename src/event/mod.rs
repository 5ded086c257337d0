//! Event system for async report handling.
//!
//! The receiver pushes unsolicited device reports into [`ReportQueue`]s for
//! polling callers and also broadcasts them, together with connection state
//! changes, through the [`EventDispatcher`].

mod queue;

pub use queue::{DEFAULT_REPORT_CAPACITY, ReportQueue};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::types::{ButtonReport, Position};

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transport opened and background tasks started.
    Connected { port: String },
    /// Device sent its readiness line.
    Ready,
    /// Connection lost or closed.
    Disconnected,
    /// Position report received.
    Position(Position),
    /// Button report received.
    Button(ButtonReport),
}

/// Discriminant of an [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Ready,
    Disconnected,
    Position,
    Button,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Ready => EventKind::Ready,
            Self::Disconnected => EventKind::Disconnected,
            Self::Position(_) => EventKind::Position,
            Self::Button(_) => EventKind::Button,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, skipping over any the subscriber lagged
    /// behind on. Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific event kinds.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted kinds; `None` accepts everything.
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self { kinds: Some(kinds) }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::time::timeout(timeout, async {
            while let Some(event) = subscription.recv().await {
                if filter.matches(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Button;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::Ready);

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert_eq!(event, Some(Event::Ready));
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::kinds(vec![EventKind::Position, EventKind::Button]);

        assert!(filter.matches(&Event::Position(Position::new(1.0, 2.0, 3.0))));
        assert!(filter.matches(&Event::Button(ButtonReport {
            button: Button::Play,
            state: 1,
        })));
        assert!(!filter.matches(&Event::Disconnected));
        assert!(EventFilter::default().matches(&Event::Disconnected));
    }

    #[tokio::test]
    async fn test_wait_for_skips_other_kinds() {
        let dispatcher = EventDispatcher::new(16);
        let background = dispatcher.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.dispatch(Event::Ready);
            background.dispatch(Event::Disconnected);
        });

        let event = dispatcher
            .wait_for(
                EventFilter::kinds(vec![EventKind::Disconnected]),
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(event, Some(Event::Disconnected));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(4);
        let event = dispatcher
            .wait_for(EventFilter::default(), Duration::from_millis(200))
            .await;
        assert_eq!(event, None);
    }
}
