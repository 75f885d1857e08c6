use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::timer::TimerSlot;

/// Source of wall-clock time for expiry computations.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// State that outlives any single controller.
///
/// Plays the role of browser session storage: a controller rebuilt within
/// the same session (a page reload) gets the same context and can find and
/// cancel a timer its predecessor left running. A new session starts empty.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    clock: Arc<dyn Clock>,
    timer: TimerSlot,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                clock,
                timer: TimerSlot::default(),
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// The session's single expiry timer slot.
    pub fn timer_slot(&self) -> &TimerSlot {
        &self.inner.timer
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
