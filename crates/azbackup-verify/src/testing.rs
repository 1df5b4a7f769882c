//! Clients wired to a mock server with millisecond waits.

use std::sync::Arc;
use std::time::Duration;

use azbackup_arm::{ArmClient, BaseUrls, PollConfig, RetryPolicy, StaticToken};
use wiremock::MockServer;

pub(crate) fn client_for(base: &str) -> ArmClient {
    ArmClient::with_base(
        Arc::new(StaticToken("fake-token".into())),
        BaseUrls { management: base.to_string() },
    )
    .with_retry(RetryPolicy {
        max_attempts:    2,
        initial_backoff: Duration::from_millis(5),
        max_backoff:     Duration::from_millis(10),
    })
    .with_poll_config(PollConfig {
        interval: Duration::from_millis(5),
        deadline: Duration::from_secs(5),
    })
}

pub(crate) fn client(server: &MockServer) -> ArmClient {
    client_for(&server.uri())
}

/// Echoes a PUT back as the created resource, with its id taken from the path.
pub(crate) struct EchoResource;

impl wiremock::Respond for EchoResource {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let path = request.url.path().to_string();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": path,
            "name": name,
            "location": "uksouth",
            "properties": { "provisioningState": "Succeeded" }
        }))
    }
}
