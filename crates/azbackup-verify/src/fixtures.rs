//! Workload resources a scenario backs up, created before the module is
//! applied and removed by deleting their resource group afterwards.

use std::collections::BTreeMap;

use azbackup_arm::{blob_endpoint, ArmClient, ResourceGroups, Workloads};
use azbackup_config::Scenario;
use azbackup_domain::naming::{
    external_resource_group_name, log_analytics_workspace_name, managed_disk_name, postgresql_server_name,
    storage_account_name,
};
use azbackup_domain::{ArmResource, BackupKind, BackupSpec, BackupTarget, ResourceGroup, ResourceGroupRef, UniqueId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::VerifyError;

/// Container created in every fixture storage account.
pub const TEST_CONTAINER: &str = "test-container";

const DISK_SIZE_GB: u32 = 1;
const POSTGRES_STORAGE_GB: u32 = 32;
const POSTGRES_ADMIN_LOGIN: &str = "psqladmin";

#[derive(Debug, Clone)]
pub struct StorageAccountFixture {
    pub account: ArmResource,
    pub containers: Vec<String>,
    pub blob_endpoint: String,
}

/// Everything [`FixtureBuilder::build`] created, plus the backups that point
/// at it.
#[derive(Debug, Clone)]
pub struct ExternalResources {
    pub resource_group: ResourceGroup,
    pub storage_accounts: Vec<StorageAccountFixture>,
    pub managed_disks: Vec<ArmResource>,
    pub postgresql_servers: Vec<ArmResource>,
    pub log_analytics_workspace: Option<ArmResource>,
    pub backups: Vec<BackupSpec>,
}

impl ExternalResources {
    pub fn backups_of(&self, kind: BackupKind) -> Vec<BackupSpec> {
        self.backups.iter().filter(|b| b.kind() == kind).cloned().collect()
    }

    pub fn storage_account(&self, id: &str) -> Option<&StorageAccountFixture> {
        self.storage_accounts
            .iter()
            .find(|s| s.account.id.eq_ignore_ascii_case(id))
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.log_analytics_workspace.as_ref().map(|w| w.id.as_str())
    }
}

pub struct FixtureBuilder {
    resource_groups: ResourceGroups,
    workloads: Workloads,
    id: UniqueId,
    location: String,
    created: Vec<String>,
}

impl FixtureBuilder {
    pub fn new(client: &ArmClient, subscription_id: &str, id: UniqueId, location: impl Into<String>) -> Self {
        Self {
            resource_groups: ResourceGroups::new(client, subscription_id),
            workloads: Workloads::new(client, subscription_id),
            id,
            location: location.into(),
            created: Vec::new(),
        }
    }

    /// Same created set, issuing requests through `client`.
    pub fn with_client(&self, client: &ArmClient, subscription_id: &str) -> Self {
        Self {
            resource_groups: ResourceGroups::new(client, subscription_id),
            workloads: Workloads::new(client, subscription_id),
            id: self.id.clone(),
            location: self.location.clone(),
            created: self.created.clone(),
        }
    }

    /// Resource groups this builder created, in creation order.
    pub fn created_resource_groups(&self) -> &[String] {
        &self.created
    }

    /// Create a resource group and remember it for [`FixtureBuilder::teardown`].
    pub async fn resource_group(
        &mut self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroup, VerifyError> {
        // Recorded up front: a create that fails mid-operation can still
        // leave the group behind.
        if !self.created.iter().any(|c| c == name) {
            self.created.push(name.to_string());
        }
        Ok(self.resource_groups.create(name, &self.location, tags).await?)
    }

    pub async fn storage_account(
        &self,
        resource_group: &str,
        suffix: &str,
        containers: &[&str],
    ) -> Result<StorageAccountFixture, VerifyError> {
        let name = storage_account_name(&self.id, suffix);
        let account = self
            .workloads
            .create_storage_account(resource_group, &name, &self.location)
            .await?;
        for container in containers {
            self.workloads
                .create_blob_container(resource_group, &name, container)
                .await?;
        }
        Ok(StorageAccountFixture {
            blob_endpoint: blob_endpoint(&account),
            account,
            containers: containers.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub async fn managed_disk(&self, resource_group: &str, index: usize) -> Result<ArmResource, VerifyError> {
        let name = managed_disk_name(&self.id, index);
        Ok(self
            .workloads
            .create_managed_disk(resource_group, &name, &self.location, DISK_SIZE_GB)
            .await?)
    }

    pub async fn postgresql_server(&self, resource_group: &str, index: usize) -> Result<ArmResource, VerifyError> {
        let name = postgresql_server_name(&self.id, index);
        // Upper, lower, digit and symbol classes are all required.
        let password = format!("{}Aa1!", Uuid::new_v4().simple());
        Ok(self
            .workloads
            .create_postgresql_flexible_server(
                resource_group,
                &name,
                &self.location,
                POSTGRES_STORAGE_GB,
                POSTGRES_ADMIN_LOGIN,
                &password,
            )
            .await?)
    }

    pub async fn log_analytics_workspace(&self, resource_group: &str) -> Result<ArmResource, VerifyError> {
        let name = log_analytics_workspace_name(&self.id);
        Ok(self
            .workloads
            .create_log_analytics_workspace(resource_group, &name, &self.location)
            .await?)
    }

    /// Create what `scenario` needs. With `create_resource_group` off, the
    /// module's own resource group is created here too.
    pub async fn build(
        &mut self,
        scenario: &Scenario,
        resource_group_name: &str,
    ) -> Result<ExternalResources, VerifyError> {
        if !scenario.create_resource_group {
            self.resource_group(resource_group_name, &BTreeMap::new()).await?;
        }

        let external_name = external_resource_group_name(resource_group_name);
        let resource_group = self.resource_group(&external_name, &BTreeMap::new()).await?;
        let external_ref = ResourceGroupRef {
            id: resource_group.id.clone(),
            name: resource_group.name.clone(),
        };

        let mut resources = ExternalResources {
            resource_group,
            storage_accounts: Vec::new(),
            managed_disks: Vec::new(),
            postgresql_servers: Vec::new(),
            log_analytics_workspace: None,
            backups: Vec::new(),
        };

        for kind in [
            BackupKind::BlobStorage,
            BackupKind::ManagedDisk,
            BackupKind::PostgresqlFlexibleServer,
        ] {
            for (i, template) in scenario.backups_of(kind).enumerate() {
                let index = i + 1;
                let target = match kind {
                    BackupKind::BlobStorage => {
                        let sa = self
                            .storage_account(&external_name, &format!("external{}", index), &[TEST_CONTAINER])
                            .await?;
                        let target = BackupTarget::BlobStorage {
                            storage_account_id: sa.account.id.clone(),
                            containers: sa.containers.clone(),
                        };
                        resources.storage_accounts.push(sa);
                        target
                    }
                    BackupKind::ManagedDisk => {
                        let disk = self.managed_disk(&external_name, index).await?;
                        let target = BackupTarget::ManagedDisk {
                            disk_id: disk.id.clone(),
                            snapshot_resource_group: external_ref.clone(),
                        };
                        resources.managed_disks.push(disk);
                        target
                    }
                    BackupKind::PostgresqlFlexibleServer => {
                        let server = self.postgresql_server(&external_name, index).await?;
                        let target = BackupTarget::PostgresqlFlexibleServer {
                            server_id: server.id.clone(),
                            server_resource_group_id: external_ref.id.clone(),
                        };
                        resources.postgresql_servers.push(server);
                        target
                    }
                };
                resources.backups.push(BackupSpec {
                    key: format!("backup{}", index),
                    backup_name: template.name.clone(),
                    retention_period: template.retention_period.clone(),
                    backup_intervals: template.backup_intervals.clone(),
                    target,
                });
            }
        }

        if scenario.diagnostics {
            resources.log_analytics_workspace = Some(self.log_analytics_workspace(&external_name).await?);
        }

        info!(
            scenario = %scenario.name,
            resource_group = %external_name,
            backups = resources.backups.len(),
            "external resources ready"
        );
        Ok(resources)
    }

    /// Delete every resource group this builder created, newest first. Each
    /// deletion is attempted; the first failure is returned.
    pub async fn teardown(&self) -> Result<(), VerifyError> {
        let mut first_err = None;
        for name in self.created.iter().rev() {
            if let Err(e) = self.resource_groups.delete(name).await {
                warn!(resource_group = %name, error = %e, "failed to delete resource group");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{client, EchoResource};
    use azbackup_config::builtin_scenarios;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path, path_regex},
        Mock, MockServer, ResponseTemplate,
    };

    const SUB: &str = "sub-1";

    fn scenario(name: &str) -> Scenario {
        builtin_scenarios().into_iter().find(|s| s.name == name).unwrap()
    }

    async fn echo_all_puts(server: &MockServer) {
        Mock::given(method("PUT"))
            .respond_with(EchoResource)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn blob_scenario_creates_accounts_with_containers() {
        let server = MockServer::start().await;
        echo_all_puts(&server).await;

        let mut builder = FixtureBuilder::new(&client(&server), SUB, UniqueId::new("AbC123"), "uksouth");
        let res = builder
            .build(&scenario("blob-storage-backup"), "rg-nhsbackup-AbC123")
            .await
            .unwrap();

        assert_eq!(builder.created_resource_groups(), ["rg-nhsbackup-AbC123-external"]);
        assert_eq!(res.storage_accounts.len(), 2);
        assert_eq!(res.storage_accounts[0].account.name, "saabc123external1");
        assert_eq!(res.storage_accounts[0].containers, vec![TEST_CONTAINER]);
        assert_eq!(
            res.storage_accounts[1].blob_endpoint,
            "https://saabc123external2.blob.core.windows.net/"
        );

        let backups = res.backups_of(BackupKind::BlobStorage);
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].key, "backup1");
        assert_eq!(backups[0].backup_name, "blob1");
        assert_eq!(backups[1].retention_period, "P30D");
        assert_eq!(backups[0].target.source_id(), res.storage_accounts[0].account.id);
        assert!(res.storage_account(backups[1].target.source_id()).is_some());
        assert!(res.workspace_id().is_none());
    }

    #[tokio::test]
    async fn disk_and_postgres_targets_use_external_group() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"/providers/Microsoft.DBforPostgreSQL/flexibleServers/"))
            .and(body_partial_json(json!({
                "sku": { "name": "Standard_B1ms", "tier": "Burstable" },
                "properties": { "version": "14", "administratorLogin": POSTGRES_ADMIN_LOGIN }
            })))
            .respond_with(EchoResource)
            .expect(2)
            .mount(&server)
            .await;
        echo_all_puts(&server).await;

        let c = client(&server);
        let mut disks = FixtureBuilder::new(&c, SUB, UniqueId::new("xyz789"), "uksouth");
        let res = disks
            .build(&scenario("managed-disk-backup"), "rg-nhsbackup-xyz789")
            .await
            .unwrap();
        assert_eq!(res.managed_disks[1].name, "disk-xyz789-external-2");
        match &res.backups[0].target {
            BackupTarget::ManagedDisk { snapshot_resource_group, .. } => {
                assert_eq!(snapshot_resource_group.name, "rg-nhsbackup-xyz789-external");
                assert_eq!(snapshot_resource_group.id, res.resource_group.id);
            }
            other => panic!("unexpected target {:?}", other),
        }

        let mut servers = FixtureBuilder::new(&c, SUB, UniqueId::new("xyz789"), "uksouth");
        let res = servers
            .build(&scenario("postgresql-flexible-server-backup"), "rg-nhsbackup-xyz789")
            .await
            .unwrap();
        assert_eq!(res.postgresql_servers[0].name, "pgflexserver-xyz789-external-1");
        assert_eq!(
            res.backups[1].target.scope(azbackup_domain::RoleScope::SourceResourceGroup),
            res.resource_group.id
        );
    }

    #[tokio::test]
    async fn existing_group_scenario_precreates_module_group_and_workspace() {
        let server = MockServer::start().await;
        echo_all_puts(&server).await;

        let mut builder = FixtureBuilder::new(&client(&server), SUB, UniqueId::new("q1w2e3"), "uksouth");
        let res = builder
            .build(&scenario("existing-resource-group"), "rg-nhsbackup-q1w2e3")
            .await
            .unwrap();

        assert_eq!(
            builder.created_resource_groups(),
            ["rg-nhsbackup-q1w2e3", "rg-nhsbackup-q1w2e3-external"]
        );
        assert_eq!(res.log_analytics_workspace.as_ref().unwrap().name, "law-q1w2e3-external");
        assert!(res.backups.is_empty());
    }

    #[tokio::test]
    async fn teardown_deletes_groups_newest_first_and_reports_failure() {
        let server = MockServer::start().await;
        echo_all_puts(&server).await;
        Mock::given(method("DELETE"))
            .and(path(format!("/subscriptions/{}/resourcegroups/rg-a-external", SUB)))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": "InternalServerError", "message": "boom" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("/subscriptions/{}/resourcegroups/rg-a", SUB)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut builder = FixtureBuilder::new(&client(&server), SUB, UniqueId::new("a"), "uksouth");
        builder.resource_group("rg-a", &BTreeMap::new()).await.unwrap();
        builder.resource_group("rg-a-external", &BTreeMap::new()).await.unwrap();
        builder.resource_group("rg-a", &BTreeMap::new()).await.unwrap();
        assert_eq!(builder.created_resource_groups().len(), 2);

        let err = builder.teardown().await.unwrap_err();
        assert!(matches!(err, VerifyError::Arm(_)));
    }

    #[tokio::test]
    async fn group_whose_create_fails_is_still_torn_down() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/subscriptions/{}/resourcegroups/rg-b", SUB)))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", format!("{}/operations/rg-b", server.uri()).as_str())
                    .set_body_json(json!({ "name": "rg-b", "properties": { "provisioningState": "Accepted" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/rg-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": { "code": "InternalError", "message": "create failed" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("/subscriptions/{}/resourcegroups/rg-b", SUB)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut builder = FixtureBuilder::new(&client(&server), SUB, UniqueId::new("b"), "uksouth");
        let err = builder.resource_group("rg-b", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, VerifyError::Arm(_)));
        assert_eq!(builder.created_resource_groups(), ["rg-b".to_string()]);

        builder.teardown().await.unwrap();
    }
}
