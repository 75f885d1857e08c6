//! Client-side lifecycle controller for on-demand challenge machines.
//!
//! A [`MachineController`] drives start, status polling and termination of
//! one challenge's machine through a [`MachineBackend`], paints the result
//! through a [`ui::UiSink`], and keeps a single [`timer::ExpiryTimer`]
//! counting down to the machine's expiry.

pub mod controller;
pub mod platform;
pub mod session;
pub mod submission;
pub mod timer;
pub mod ui;

#[cfg(test)]
mod testing;

use std::fmt;

use async_trait::async_trait;
use machines_api::{AttemptRequest, Reply, StatusCode};

pub use controller::{ControllerSettings, MachineController, Phase, PollOutcome};
pub use session::{Clock, SessionContext, SystemClock};
pub use submission::SubmissionAdapter;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[from] machines_api::Error),

    #[error("backend rejected {action} ({status}): {message}")]
    Rejected {
        action: Action,
        status: StatusCode,
        message: String,
    },

    #[error("{0} is not available right now")]
    Busy(Action),
}

pub type Result<T> = std::result::Result<T, Error>;

/// User-facing machine actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Status,
    Terminate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Status => "status",
            Self::Terminate => "terminate",
        })
    }
}

/// The provisioning service as seen from the client.
///
/// Implementations resolve with a [`Reply`] whenever the service answered,
/// including 4xx/5xx; an `Err` means no usable response was obtained.
#[async_trait]
pub trait MachineBackend: Send + Sync + 'static {
    async fn start_machine(&self, challenge_id: i64) -> machines_api::Result<Reply>;

    async fn machine_status(&self, challenge_id: i64) -> machines_api::Result<Reply>;

    async fn terminate_machine(&self, challenge_id: i64) -> machines_api::Result<Reply>;

    async fn submit_attempt(
        &self,
        attempt: &AttemptRequest,
        preview: bool,
    ) -> machines_api::Result<Reply>;
}
