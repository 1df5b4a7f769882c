use azbackup_domain::DiagnosticSettingsResource;

use crate::client::ArmClient;
use crate::error::ArmError;

const API_VERSION: &str = "2021-05-01-preview";

pub struct DiagnosticSettings {
    client: ArmClient,
}

impl DiagnosticSettings {
    pub fn new(client: &ArmClient) -> Self {
        Self { client: client.clone() }
    }

    /// Every diagnostic setting attached to `resource_id`.
    pub async fn list(&self, resource_id: &str) -> Result<Vec<DiagnosticSettingsResource>, ArmError> {
        let url = self.client.url(
            &format!("{}/providers/Microsoft.Insights/diagnosticSettings", resource_id),
            API_VERSION,
        );
        self.client.pager(url).collect_all().await
    }
}
