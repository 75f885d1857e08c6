//! Flag submission, forwarded to the platform's attempt endpoint.

use std::sync::Arc;

use machines_api::{AttemptRequest, Reply, ReplyKind};
use tracing::{debug, info};

use crate::{MachineBackend, Result};

/// Sends attempts without interpreting them.
///
/// Rate-limit (429) and authorization (403) answers come back as ordinary
/// [`Reply`] values so the caller renders them exactly as the platform does.
#[derive(Clone)]
pub struct SubmissionAdapter {
    backend: Arc<dyn MachineBackend>,
}

impl SubmissionAdapter {
    pub fn new(backend: Arc<dyn MachineBackend>) -> Self {
        Self { backend }
    }

    pub async fn submit(&self, challenge_id: i64, submission: &str, preview: bool) -> Result<Reply> {
        let attempt = AttemptRequest {
            challenge_id,
            submission: submission.to_string(),
        };
        let reply = self.backend.submit_attempt(&attempt, preview).await?;

        match reply.kind() {
            ReplyKind::RateLimited => debug!(challenge_id, "attempt rate limited"),
            ReplyKind::Unauthorized => debug!(challenge_id, "attempt not authorized"),
            _ => info!(challenge_id, preview, status = %reply.status, "attempt submitted"),
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::testing::{ScriptedBackend, reply, transport_error};

    use serde_json::json;

    fn adapter() -> (Arc<ScriptedBackend>, SubmissionAdapter) {
        let backend = Arc::new(ScriptedBackend::default());
        (backend.clone(), SubmissionAdapter::new(backend))
    }

    #[tokio::test]
    async fn forwards_attempt_and_preview_flag() {
        let (backend, adapter) = adapter();
        backend.push_attempt(Ok(reply(
            200,
            json!({"success": true, "data": {"status": "correct", "message": "Correct"}}),
        )));

        let result = adapter.submit(7, "flag{abc}", true).await.unwrap();

        assert_eq!(result.kind(), ReplyKind::Accepted);
        assert_eq!(
            *backend.attempt_calls.lock().unwrap(),
            vec![(7, "flag{abc}".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn rate_limit_is_passed_through() {
        let (backend, adapter) = adapter();
        let body = json!({"success": true, "data": {"status": "ratelimited", "message": "You're submitting flags too fast. Slow down."}});
        backend.push_attempt(Ok(reply(429, body.clone())));

        let result = adapter.submit(7, "guess", false).await.unwrap();

        assert_eq!(result.status.as_u16(), 429);
        assert_eq!(result.kind(), ReplyKind::RateLimited);
        assert_eq!(result.body.data, body.get("data").cloned());
    }

    #[tokio::test]
    async fn forbidden_is_passed_through() {
        let (backend, adapter) = adapter();
        backend.push_attempt(Ok(reply(
            403,
            json!({"success": true, "data": {"status": "authentication_required", "message": null}}),
        )));

        let result = adapter.submit(7, "guess", false).await.unwrap();
        assert_eq!(result.kind(), ReplyKind::Unauthorized);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_error() {
        let (backend, adapter) = adapter();
        backend.push_attempt(Err(transport_error()));

        let err = adapter.submit(7, "guess", false).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
