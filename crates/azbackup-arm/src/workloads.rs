//! Workload resources created only so there is something to back up: storage
//! accounts and containers, managed disks, PostgreSQL flexible servers and
//! Log Analytics workspaces.

use azbackup_domain::ArmResource;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{decode, ArmClient};
use crate::error::ArmError;
use crate::token::STORAGE_SCOPE;

const STORAGE_API_VERSION: &str = "2023-01-01";
const DISKS_API_VERSION: &str = "2023-04-02";
const POSTGRES_API_VERSION: &str = "2022-12-01";
const WORKSPACES_API_VERSION: &str = "2022-10-01";
const BLOB_SERVICE_VERSION: &str = "2023-11-03";

fn resource_group_path(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{}/resourceGroups/{}", subscription_id, resource_group)
}

/// Creates workload resources in one subscription.
pub struct Workloads {
    client: ArmClient,
    subscription_id: String,
}

impl Workloads {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    async fn put(&self, path: &str, api_version: &str, body: Value) -> Result<ArmResource, ArmError> {
        let url = self.client.url(path, api_version);
        let created = self.client.put_and_wait(&url, &body).await?;
        // Location-mode creates may finish with an empty body.
        if created.is_null() {
            return self.client.get(&url).await;
        }
        decode(&url, created)
    }

    // ── Storage ───────────────────────────────────────────────────────────────

    /// StorageV2 account with Standard_LRS replication.
    pub async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ArmResource, ArmError> {
        info!(name, location, "creating storage account");
        let path = format!(
            "{}/providers/Microsoft.Storage/storageAccounts/{}",
            resource_group_path(&self.subscription_id, resource_group),
            name
        );
        self.put(
            &path,
            STORAGE_API_VERSION,
            json!({
                "location": location,
                "kind": "StorageV2",
                "sku": { "name": "Standard_LRS" }
            }),
        )
        .await
    }

    pub async fn create_blob_container(
        &self,
        resource_group: &str,
        account: &str,
        container: &str,
    ) -> Result<ArmResource, ArmError> {
        info!(account, container, "creating blob container");
        let path = format!(
            "{}/providers/Microsoft.Storage/storageAccounts/{}/blobServices/default/containers/{}",
            resource_group_path(&self.subscription_id, resource_group),
            account,
            container
        );
        self.put(&path, STORAGE_API_VERSION, json!({ "properties": {} })).await
    }

    /// Upload `content` as a block blob through the data plane, authenticated
    /// with a storage-scoped token.
    pub async fn upload_blob(
        &self,
        blob_endpoint: &str,
        container: &str,
        blob_name: &str,
        content: Vec<u8>,
    ) -> Result<(), ArmError> {
        let url = format!("{}/{}/{}", blob_endpoint.trim_end_matches('/'), container, blob_name);
        let token = self.client.bearer(STORAGE_SCOPE).await?;
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        debug!(url = %url, bytes = content.len(), "uploading blob");

        let resp = self
            .client
            .http()
            .put(&url)
            .bearer_auth(&token)
            .header("x-ms-version", BLOB_SERVICE_VERSION)
            .header("x-ms-date", date)
            .header("x-ms-blob-type", "BlockBlob")
            .body(content)
            .send()
            .await
            .map_err(|e| ArmError::Request {
                method: "PUT".into(),
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            info!(container, blob_name, "blob uploaded");
            return Ok(());
        }
        let code = resp
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();
        let message = resp.text().await.unwrap_or_default();
        Err(ArmError::Status {
            method: "PUT".into(),
            url,
            status,
            code,
            message,
        })
    }

    // ── Compute ───────────────────────────────────────────────────────────────

    /// Empty Standard_LRS managed disk of `size_gb`.
    pub async fn create_managed_disk(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        size_gb: u32,
    ) -> Result<ArmResource, ArmError> {
        info!(name, location, size_gb, "creating managed disk");
        let path = format!(
            "{}/providers/Microsoft.Compute/disks/{}",
            resource_group_path(&self.subscription_id, resource_group),
            name
        );
        self.put(
            &path,
            DISKS_API_VERSION,
            json!({
                "location": location,
                "sku": { "name": "Standard_LRS" },
                "properties": {
                    "diskSizeGB": size_gb,
                    "creationData": { "createOption": "Empty" }
                }
            }),
        )
        .await
    }

    // ── PostgreSQL ────────────────────────────────────────────────────────────

    /// Burstable Standard_B1ms flexible server running PostgreSQL 14.
    pub async fn create_postgresql_flexible_server(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        storage_size_gb: u32,
        admin_login: &str,
        admin_password: &str,
    ) -> Result<ArmResource, ArmError> {
        info!(name, location, "creating postgresql flexible server");
        let path = format!(
            "{}/providers/Microsoft.DBforPostgreSQL/flexibleServers/{}",
            resource_group_path(&self.subscription_id, resource_group),
            name
        );
        self.put(
            &path,
            POSTGRES_API_VERSION,
            json!({
                "location": location,
                "sku": { "name": "Standard_B1ms", "tier": "Burstable" },
                "properties": {
                    "administratorLogin": admin_login,
                    "administratorLoginPassword": admin_password,
                    "version": "14",
                    "storage": { "storageSizeGB": storage_size_gb }
                }
            }),
        )
        .await
    }

    // ── Log Analytics ─────────────────────────────────────────────────────────

    pub async fn create_log_analytics_workspace(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ArmResource, ArmError> {
        info!(name, location, "creating log analytics workspace");
        let path = format!(
            "{}/providers/Microsoft.OperationalInsights/workspaces/{}",
            resource_group_path(&self.subscription_id, resource_group),
            name
        );
        self.put(&path, WORKSPACES_API_VERSION, json!({ "location": location })).await
    }
}

/// The account's blob endpoint, falling back to the public-cloud hostname.
pub fn blob_endpoint(account: &ArmResource) -> String {
    account
        .properties
        .pointer("/primaryEndpoints/blob")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://{}.blob.core.windows.net/", account.name))
}
