//! Sequence ids and the response correlation table.
//!
//! Every command gets a sequence id; the device echoes it in its `$<id>`
//! response. The receiver stores responses here and waiting callers pick
//! them up by id. Entries expire after a retention window so responses
//! nobody waits for (fire-and-forget commands) cannot pile up.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Default retention of a correlation entry.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10);

/// Default maximum number of entries kept.
pub const DEFAULT_CAPACITY: usize = 256;

/// Returns the id following `id`: wraps from 65535 to 1, never yields 0.
#[must_use]
pub const fn successor(id: u16) -> u16 {
    if id == u16::MAX { 1 } else { id + 1 }
}

/// Monotonic sequence id source.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU16,
}

impl SequenceGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU16::new(0),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u16 {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| Some(successor(id)))
            .unwrap_or_else(|id| id);
        successor(previous)
    }

    /// Restarts the sequence so the next id is 1.
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Entry {
    /// `None` once a caller has taken the fields.
    fields: Option<Vec<String>>,
    received_at: Instant,
}

/// Mapping from sequence id to the response fields received for it.
#[derive(Debug)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<u16, Entry>>,
    notify: Notify,
    retention: Duration,
    capacity: usize,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_CAPACITY)
    }
}

impl CorrelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            retention,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stores the response for `id`. A later response for the same id
    /// overwrites an earlier one.
    pub fn insert(&self, id: u16, fields: Vec<String>) {
        let now = Instant::now();
        {
            let mut entries = self.lock();
            let retention = self.retention;
            entries.retain(|_, entry| now.duration_since(entry.received_at) < retention);

            if entries.len() >= self.capacity && !entries.contains_key(&id) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.received_at)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    tracing::debug!("correlation table full, evicting #{}", oldest);
                    entries.remove(&oldest);
                }
            }

            entries.insert(
                id,
                Entry {
                    fields: Some(fields),
                    received_at: now,
                },
            );
        }
        self.notify.notify_waiters();
    }

    /// Forgets anything stored for `id`. Called before an id is reissued.
    pub fn discard(&self, id: u16) {
        self.lock().remove(&id);
    }

    /// Returns true if a response for `id` arrived, taken or not.
    #[must_use]
    pub fn has_arrived(&self, id: u16) -> bool {
        self.lock().contains_key(&id)
    }

    /// Takes the fields for `id` if they arrived and were not taken yet.
    pub fn take(&self, id: u16) -> Option<Vec<String>> {
        self.lock().get_mut(&id).and_then(|entry| entry.fields.take())
    }

    /// Waits up to `timeout` for the fields of `id` and takes them.
    pub async fn wait_take(&self, id: u16, timeout: Duration) -> Option<Vec<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(fields) = self.take(id) {
                return Some(fields);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.take(id);
            }
        }
    }

    /// Waits up to `timeout` for a response to `id` to arrive, without
    /// taking it. Returns true if it arrived.
    pub async fn wait_arrived(&self, id: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has_arrived(id) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_arrived(id);
            }
        }
    }

    /// Returns the number of entries, including taken ones not yet expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn fields(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_sequence_starts_at_one_and_wraps() {
        let sequence = SequenceGenerator::new();
        assert_eq!(sequence.next_id(), 1);
        assert_eq!(sequence.next_id(), 2);

        sequence.last.store(65534, Ordering::SeqCst);
        assert_eq!(sequence.next_id(), 65535);
        assert_eq!(sequence.next_id(), 1);

        sequence.reset();
        assert_eq!(sequence.next_id(), 1);
    }

    #[test]
    fn test_successor_skips_zero() {
        assert_eq!(successor(0), 1);
        assert_eq!(successor(41), 42);
        assert_eq!(successor(u16::MAX), 1);
    }

    #[test]
    fn test_take_once() {
        let table = CorrelationTable::default();
        table.insert(5, fields(&["OK", "V1"]));

        assert!(table.has_arrived(5));
        assert_eq!(table.take(5), Some(fields(&["OK", "V1"])));
        assert_eq!(table.take(5), None);
        // Taken entries still count as arrived until they expire
        assert!(table.has_arrived(5));

        table.discard(5);
        assert!(!table.has_arrived(5));
    }

    #[test]
    fn test_last_write_wins() {
        let table = CorrelationTable::default();
        table.insert(9, fields(&["FAIL"]));
        table.insert(9, fields(&["OK"]));
        assert_eq!(table.take(9), Some(fields(&["OK"])));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let table = CorrelationTable::new(DEFAULT_RETENTION, 2);
        table.insert(1, fields(&["OK"]));
        std::thread::sleep(Duration::from_millis(2));
        table.insert(2, fields(&["OK"]));
        std::thread::sleep(Duration::from_millis(2));
        table.insert(3, fields(&["OK"]));

        assert_eq!(table.len(), 2);
        assert!(!table.has_arrived(1));
        assert!(table.has_arrived(2));
        assert!(table.has_arrived(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let table = CorrelationTable::new(Duration::from_secs(1), 16);
        table.insert(1, fields(&["OK"]));

        tokio::time::advance(Duration::from_secs(2)).await;
        table.insert(2, fields(&["OK"]));

        assert!(!table.has_arrived(1));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_take_wakes_on_insert() {
        let table = Arc::new(CorrelationTable::default());
        let writer = Arc::clone(&table);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert(7, fields(&["OK", "X1"]));
        });

        let result = table.wait_take(7, Duration::from_secs(2)).await;
        assert_eq!(result, Some(fields(&["OK", "X1"])));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_take_times_out() {
        let table = CorrelationTable::default();
        table.insert(8, fields(&["OK"]));

        let start = Instant::now();
        let result = table.wait_take(3, Duration::from_millis(500)).await;
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_wait_arrived_sees_taken_entry() {
        let table = CorrelationTable::default();
        table.insert(4, fields(&["OK"]));
        table.take(4);
        assert!(table.wait_arrived(4, Duration::from_millis(10)).await);
        assert!(!table.wait_arrived(6, Duration::from_millis(10)).await);
    }
}
