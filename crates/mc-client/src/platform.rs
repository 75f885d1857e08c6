use async_trait::async_trait;
use machines_api::{AttemptRequest, MachinesClient, Reply};

use crate::MachineBackend;

/// The platform's HTTP API.
///
/// Delegates to `machines_api::MachinesClient` for all HTTP calls.
#[async_trait]
impl MachineBackend for MachinesClient {
    async fn start_machine(&self, challenge_id: i64) -> machines_api::Result<Reply> {
        MachinesClient::start_machine(self, challenge_id).await
    }

    async fn machine_status(&self, challenge_id: i64) -> machines_api::Result<Reply> {
        MachinesClient::machine_status(self, challenge_id).await
    }

    async fn terminate_machine(&self, challenge_id: i64) -> machines_api::Result<Reply> {
        MachinesClient::terminate_machine(self, challenge_id).await
    }

    async fn submit_attempt(
        &self,
        attempt: &AttemptRequest,
        preview: bool,
    ) -> machines_api::Result<Reply> {
        MachinesClient::submit_attempt(self, attempt, preview).await
    }
}
