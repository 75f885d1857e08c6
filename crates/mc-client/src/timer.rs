//! Countdown to a machine's expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::session::SessionContext;

/// Shown once the expiry has passed.
pub const EXPIRED_MARKER: &str = "-";

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(300);

/// One active periodic tick.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    expiry: DateTime<Utc>,
    task: AbortHandle,
}

/// Holds at most one [`TimerHandle`].
#[derive(Debug, Default)]
pub struct TimerSlot {
    active: Mutex<Option<TimerHandle>>,
    next_id: AtomicU64,
}

impl TimerSlot {
    fn lock(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expiry of the armed timer, if any.
    pub fn active_expiry(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().map(|h| h.expiry)
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Id of the armed timer, if any.
    pub fn active_id(&self) -> Option<u64> {
        self.lock().as_ref().map(|h| h.id)
    }

    /// Abort and forget the armed timer. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                handle.task.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the handle only if it is still `id`.
    fn release(&self, id: u64) -> bool {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|h| h.id == id) {
            *active = None;
            true
        } else {
            false
        }
    }
}

/// Whole seconds left until `expiry`.
pub fn remaining_seconds(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    expiry.timestamp() - now.timestamp()
}

/// Render a remaining duration as e.g. `1h 2m 3s`, omitting zero units.
pub fn format_remaining(remaining: i64) -> String {
    if remaining <= 0 {
        return EXPIRED_MARKER.to_string();
    }

    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}

/// Periodic countdown backed by the session's timer slot.
///
/// Owns only the tick/cancel mechanism; the expiry is supplied on each
/// [`arm`](Self::arm).
#[derive(Clone)]
pub struct ExpiryTimer {
    session: SessionContext,
    interval: Duration,
}

impl ExpiryTimer {
    /// A zero `interval` falls back to [`DEFAULT_TICK_INTERVAL`].
    pub fn new(session: SessionContext, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!("zero tick interval, using default");
            DEFAULT_TICK_INTERVAL
        } else {
            interval
        };
        Self { session, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking towards `expiry`, replacing any armed timer.
    ///
    /// Each tick passes the timer's id and the rendered remaining time to
    /// `render`. When the expiry is reached the timer renders [`EXPIRED_MARKER`], disarms
    /// itself and calls `on_expire` once.
    pub fn arm<R, E>(&self, expiry: DateTime<Utc>, render: R, on_expire: E) -> u64
    where
        R: Fn(u64, &str) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let slot = self.session.timer_slot();
        let id = slot.next_id.fetch_add(1, Ordering::Relaxed);
        let session = self.session.clone();
        let interval = self.interval;

        // Held across the spawn so the task cannot release before it is stored.
        let mut active = slot.lock();
        if let Some(previous) = active.take() {
            previous.task.abort();
            tracing::debug!(timer = previous.id, "expiry timer superseded");
        }

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let remaining = remaining_seconds(expiry, session.now());
                render(id, &format_remaining(remaining));
                if remaining <= 0 {
                    if session.timer_slot().release(id) {
                        tracing::info!(timer = id, %expiry, "machine expired");
                        on_expire();
                    }
                    break;
                }
            }
        });

        *active = Some(TimerHandle {
            id,
            expiry,
            task: task.abort_handle(),
        });
        tracing::debug!(timer = id, %expiry, "expiry timer armed");
        id
    }

    /// Idempotent: cancelling with nothing armed is a no-op.
    pub fn cancel(&self) -> bool {
        let cancelled = self.session.timer_slot().cancel();
        if cancelled {
            tracing::debug!("expiry timer cancelled");
        }
        cancelled
    }

    pub fn is_armed(&self) -> bool {
        self.session.timer_slot().is_armed()
    }

    /// Whether `id` is still the armed timer.
    pub fn is_current(&self, id: u64) -> bool {
        self.session.timer_slot().active_id() == Some(id)
    }
}
