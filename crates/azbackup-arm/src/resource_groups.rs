use std::collections::BTreeMap;

use azbackup_domain::ResourceGroup;
use serde_json::json;
use tracing::info;

use crate::client::{decode, ArmClient};
use crate::error::ArmError;

const API_VERSION: &str = "2021-04-01";

pub struct ResourceGroups {
    client: ArmClient,
    subscription_id: String,
}

impl ResourceGroups {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    fn url(&self, name: &str) -> String {
        self.client.url(
            &format!("/subscriptions/{}/resourcegroups/{}", self.subscription_id, name),
            API_VERSION,
        )
    }

    pub async fn get(&self, name: &str) -> Result<ResourceGroup, ArmError> {
        self.client.get(&self.url(name)).await
    }

    pub async fn find(&self, name: &str) -> Result<Option<ResourceGroup>, ArmError> {
        self.client.get_optional(&self.url(name)).await
    }

    /// Create or update a resource group.
    pub async fn create(
        &self,
        name: &str,
        location: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroup, ArmError> {
        info!(name, location, "creating resource group");
        let url = self.url(name);
        let body = self
            .client
            .put_and_wait(&url, &json!({ "location": location, "tags": tags }))
            .await?;
        decode(&url, body)
    }

    /// Delete a resource group and everything in it. Missing groups are ignored.
    pub async fn delete(&self, name: &str) -> Result<(), ArmError> {
        info!(name, "deleting resource group");
        self.client.delete_and_wait(&self.url(name)).await
    }
}
