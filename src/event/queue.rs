use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Default number of reports kept per queue.
pub const DEFAULT_REPORT_CAPACITY: usize = 64;

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded last-in-first-out queue of device reports.
///
/// Consumers always get the newest report. When full, the oldest report is
/// dropped to make room. Closing the queue wakes every waiting consumer.
#[derive(Debug)]
pub struct ReportQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> Default for ReportQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_CAPACITY)
    }
}

impl<T> ReportQueue<T> {
    /// Creates an empty queue holding at most `capacity` reports.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a report. Reports pushed after `close` are dropped.
    pub fn push(&self, item: T) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if state.items.len() == self.capacity {
                state.items.pop_front();
            }
            state.items.push_back(item);
        }
        self.notify.notify_waiters();
    }

    /// Removes and returns the newest report without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_back()
    }

    /// Removes and returns the newest report, waiting up to `timeout` for
    /// one to arrive. Returns `None` on timeout or once the queue is closed
    /// and empty.
    pub async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_back() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Closes the queue and releases every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Drops queued reports and reopens the queue.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.closed = false;
    }

    /// Returns true once `close` has been called and not undone by `reset`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns the number of queued reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if no reports are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
