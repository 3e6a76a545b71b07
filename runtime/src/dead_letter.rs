//! Holding area for payloads whose retries ran out.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Alert threshold of [`DeadLetterQueue::default`].
pub const DEFAULT_ALERT_THRESHOLD: usize = 1000;

/// A parked payload and why it was parked.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The payload that could not be processed
    pub payload: T,
    /// Retries spent before parking
    pub retry_count: usize,
    /// Error of the last attempt
    pub error_message: String,
    /// When the payload was parked
    pub failed_at: DateTime<Utc>,
}

/// FIFO of dead letters, shared between clones.
///
/// The queue is unbounded. Every push beyond `alert_threshold` entries is
/// logged at error level and counted in `dlq.over_threshold`, but the entry
/// is kept.
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    entries: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    alert_threshold: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Queue that raises an alert once it holds more than `alert_threshold` entries.
    #[must_use]
    pub fn new(alert_threshold: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            alert_threshold,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<DeadLetter<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park `payload`.
    pub fn push(&self, payload: T, error_message: String, retry_count: usize) {
        let mut entries = self.entries();
        if entries.len() >= self.alert_threshold {
            metrics::counter!("dlq.over_threshold").increment(1);
            tracing::error!(
                size = entries.len() + 1,
                alert_threshold = self.alert_threshold,
                "Dead letter queue above its alert threshold"
            );
        }

        tracing::warn!(retry_count, error = %error_message, "Parked payload in dead letter queue");
        entries.push_back(DeadLetter {
            payload,
            retry_count,
            error_message,
            failed_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dlq.size").set(entries.len() as f64);
    }

    /// Number of parked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Take every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let drained: Vec<_> = self.entries().drain(..).collect();
        metrics::gauge!("dlq.size").set(0.0);
        drained
    }

    /// Copy of the oldest entry.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.entries().front().cloned()
    }

    /// Size above which pushes raise an alert.
    #[must_use]
    pub const fn alert_threshold(&self) -> usize {
        self.alert_threshold
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            alert_threshold: self.alert_threshold,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}
