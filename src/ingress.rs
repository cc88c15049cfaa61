// Event intake: validation, drop counters, and the bounded event queue
// between the HTTP surface and the apply worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::{IngressConfig, OverflowPolicy};
use crate::models::StatusEvent;

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// Queue is full and the overflow policy is reject_new. Retryable.
    #[error("event queue full")]
    QueueFull,
    /// Pipeline is shutting down; the apply worker no longer drains the queue.
    #[error("event pipeline unavailable")]
    Unavailable,
}

/// Checks an event before it enters the queue. Invalid events are dropped and
/// counted by the caller, never applied. Timestamps in the past are fine:
/// agents flush locally queued events after a reconnect.
pub fn validate_event(
    event: &StatusEvent,
    now_ms: u64,
    config: &IngressConfig,
) -> Result<(), &'static str> {
    if event.machine_id.is_empty() {
        return Err("machine id is empty");
    }
    if event.machine_id.len() > config.max_machine_id_len {
        return Err("machine id too long");
    }
    if !event
        .machine_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("machine id has invalid characters");
    }
    if event.timestamp == 0 {
        return Err("timestamp is zero");
    }
    let skew_ms = config.clock_skew_tolerance_secs * 1000;
    if event.timestamp > now_ms.saturating_add(skew_ms) {
        return Err("timestamp beyond clock-skew tolerance");
    }
    Ok(())
}

/// Ingress counters; exposed on GET /api/ingress/stats and in the periodic
/// app-stats log line.
#[derive(Debug, Default)]
pub struct IngressCounters {
    pub accepted: AtomicU64,
    pub rejected_malformed: AtomicU64,
    pub rejected_stale: AtomicU64,
    pub dropped_overflow: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressStats {
    pub accepted: u64,
    pub rejected_malformed: u64,
    pub rejected_stale: u64,
    pub dropped_overflow: u64,
}

impl IngressCounters {
    pub fn stats(&self) -> IngressStats {
        IngressStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            rejected_stale: self.rejected_stale.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
        }
    }
}

struct QueueInner {
    events: VecDeque<StatusEvent>,
    closed: bool,
}

/// Bounded event queue between ingress and the apply worker. Backpressure is
/// policy-driven: drop_oldest evicts the head, reject_new fails the push.
/// The mutex is never held across an await.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Enqueues an event. Returns the evicted event when drop_oldest had to
    /// make room, so the caller can count the drop.
    pub fn push(&self, event: StatusEvent) -> Result<Option<StatusEvent>, IngressError> {
        let displaced = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed {
                return Err(IngressError::Unavailable);
            }
            let displaced = if inner.events.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::RejectNew => return Err(IngressError::QueueFull),
                    OverflowPolicy::DropOldest => inner.events.pop_front(),
                }
            } else {
                None
            };
            inner.events.push_back(event);
            displaced
        };
        self.notify.notify_one();
        Ok(displaced)
    }

    /// Waits for the next event. Returns None once the queue is closed and
    /// fully drained.
    pub async fn pop(&self) -> Option<StatusEvent> {
        loop {
            // Register for wakeup before checking, so a push between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(event) = inner.events.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue: later pushes fail with Unavailable, pop drains the
    /// remainder and then returns None.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
