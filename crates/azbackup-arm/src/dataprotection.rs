//! Microsoft.DataProtection: backup vaults, policies, instances and jobs.

use std::time::Instant;

use azbackup_domain::{
    resource_name_from_id, BackupInstanceResource, BackupJobResource, BackupPolicyResource,
    BackupVaultResource, ImmutabilityState, OperationJobExtendedInfo,
};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info};

use crate::client::{decode, ArmClient};
use crate::error::ArmError;
use crate::pager::Pager;
use crate::poller::{bounded, Operation};

const API_VERSION: &str = "2024-04-01";

/// Job states that mean the job is still running.
const RUNNING_JOB_STATES: &[&str] = &["InProgress", "Started", "Queued", "Cancelling"];

fn vault_path(subscription_id: &str, resource_group: &str, vault: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DataProtection/backupVaults/{}",
        subscription_id, resource_group, vault
    )
}

// ── Vaults ────────────────────────────────────────────────────────────────────

pub struct BackupVaults {
    client: ArmClient,
    subscription_id: String,
}

impl BackupVaults {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    fn url(&self, resource_group: &str, vault: &str) -> String {
        self.client
            .url(&vault_path(&self.subscription_id, resource_group, vault), API_VERSION)
    }

    pub async fn get(&self, resource_group: &str, vault: &str) -> Result<BackupVaultResource, ArmError> {
        self.client.get(&self.url(resource_group, vault)).await
    }

    /// PATCH the vault's immutability state and wait for the update to land.
    pub async fn set_immutability(
        &self,
        resource_group: &str,
        vault: &str,
        state: ImmutabilityState,
    ) -> Result<BackupVaultResource, ArmError> {
        info!(vault, %state, "updating backup vault immutability");
        let url = self.url(resource_group, vault);
        let body = json!({
            "properties": {
                "securitySettings": {
                    "immutabilitySettings": { "state": state.to_string() }
                }
            }
        });
        let updated = self.client.patch_and_wait(&url, &body).await?;
        decode(&url, updated)
    }
}

// ── Policies ──────────────────────────────────────────────────────────────────

pub struct BackupPolicies {
    client: ArmClient,
    subscription_id: String,
}

impl BackupPolicies {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    pub fn list(&self, resource_group: &str, vault: &str) -> Pager<BackupPolicyResource> {
        let path = format!(
            "{}/backupPolicies",
            vault_path(&self.subscription_id, resource_group, vault)
        );
        self.client.pager(self.client.url(&path, API_VERSION))
    }
}

// ── Instances ─────────────────────────────────────────────────────────────────

pub struct BackupInstances {
    client: ArmClient,
    subscription_id: String,
}

impl BackupInstances {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    fn path(&self, resource_group: &str, vault: &str) -> String {
        format!(
            "{}/backupInstances",
            vault_path(&self.subscription_id, resource_group, vault)
        )
    }

    fn instance_url(&self, resource_group: &str, vault: &str, instance: &str) -> String {
        self.client.url(
            &format!("{}/{}", self.path(resource_group, vault), instance),
            API_VERSION,
        )
    }

    pub fn list(&self, resource_group: &str, vault: &str) -> Pager<BackupInstanceResource> {
        self.client
            .pager(self.client.url(&self.path(resource_group, vault), API_VERSION))
    }

    /// Start deleting an instance. An immutable vault rejects the delete either
    /// here or when the returned operation is polled.
    pub async fn begin_delete(&self, resource_group: &str, vault: &str, instance: &str) -> Result<Operation, ArmError> {
        let url = self.instance_url(resource_group, vault, instance);
        self.client.begin(Method::DELETE, &url, None).await
    }

    pub async fn delete(&self, resource_group: &str, vault: &str, instance: &str) -> Result<(), ArmError> {
        info!(vault, instance, "deleting backup instance");
        let op = self.begin_delete(resource_group, vault, instance).await?;
        self.client.wait(op).await?;
        Ok(())
    }

    /// Trigger an on-demand backup against `rule_name` and return the job it
    /// started.
    pub async fn adhoc_backup(
        &self,
        resource_group: &str,
        vault: &str,
        instance: &str,
        rule_name: &str,
    ) -> Result<OperationJobExtendedInfo, ArmError> {
        info!(vault, instance, rule_name, "triggering ad-hoc backup");
        let url = self.client.url(
            &format!("{}/{}/backup", self.path(resource_group, vault), instance),
            API_VERSION,
        );
        let body = json!({
            "backupRuleOptions": {
                "ruleName": rule_name,
                "triggerOption": {}
            }
        });
        let result = self.client.post_and_wait(&url, &body).await?;
        decode(&url, result)
    }
}

// ── Jobs ──────────────────────────────────────────────────────────────────────

pub struct BackupJobs {
    client: ArmClient,
    subscription_id: String,
}

impl BackupJobs {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    /// `job_id` may be the bare id or the full ARM id returned by an ad-hoc backup.
    pub async fn get(&self, resource_group: &str, vault: &str, job_id: &str) -> Result<BackupJobResource, ArmError> {
        let url = self.client.url(
            &format!(
                "{}/backupJobs/{}",
                vault_path(&self.subscription_id, resource_group, vault),
                resource_name_from_id(job_id)
            ),
            API_VERSION,
        );
        self.client.get(&url).await
    }

    /// Poll a job at the client's interval until it leaves the running states.
    /// The finished job is returned whatever its outcome; callers check
    /// `status` themselves.
    pub async fn wait_for_completion(
        &self,
        resource_group: &str,
        vault: &str,
        job_id: &str,
    ) -> Result<BackupJobResource, ArmError> {
        let config = self.client.poll_config().clone();
        let started = Instant::now();
        let what = format!("backup job {}", resource_name_from_id(job_id));
        loop {
            let job = bounded(
                &what,
                started,
                config.deadline,
                self.client.cancellation(),
                self.get(resource_group, vault, job_id),
            )
            .await?;
            let status = job.properties.status.as_str();
            if !RUNNING_JOB_STATES.iter().any(|s| s.eq_ignore_ascii_case(status)) {
                info!(job = %what, status, "backup job finished");
                return Ok(job);
            }
            if started.elapsed() + config.interval > config.deadline {
                return Err(ArmError::Timeout {
                    operation: what,
                    after: started.elapsed(),
                });
            }
            debug!(job = %what, status, "backup job still running");
            self.client.sleep(config.interval, &what).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::client;
    use serde_json::Value;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const VAULT: &str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.DataProtection/backupVaults/bvault-1";

    #[tokio::test]
    async fn list_policies_decodes_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/backupPolicies", VAULT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": format!("{}/backupPolicies/p1", VAULT),
                    "name": "p1",
                    "properties": {
                        "objectType": "BackupPolicy",
                        "datasourceTypes": ["Microsoft.Compute/disks"],
                        "policyRules": []
                    }
                }]
            })))
            .mount(&server)
            .await;

        let policies = BackupPolicies::new(&client(&server), "sub-1")
            .list("rg-1", "bvault-1")
            .collect_all()
            .await
            .unwrap();
        assert_eq!(policies.len(), 1);
        assert!(policies[0].policy().is_ok());
    }

    #[tokio::test]
    async fn set_immutability_patches_security_settings() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(VAULT))
            .and(body_partial_json(json!({
                "properties": { "securitySettings": { "immutabilitySettings": { "state": "Disabled" } } }
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Azure-AsyncOperation", format!("{}/ops/patch-1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/patch-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(VAULT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": VAULT,
                "name": "bvault-1",
                "location": "uksouth",
                "properties": { "securitySettings": { "immutabilitySettings": { "state": "Disabled" } } }
            })))
            .mount(&server)
            .await;

        let vault = BackupVaults::new(&client(&server), "sub-1")
            .set_immutability("rg-1", "bvault-1", ImmutabilityState::Disabled)
            .await
            .unwrap();
        assert_eq!(vault.immutability(), Some(ImmutabilityState::Disabled));
    }

    #[tokio::test]
    async fn adhoc_backup_returns_job_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/backupInstances/inst-1/backup", VAULT)))
            .and(body_partial_json(json!({ "backupRuleOptions": { "ruleName": "BackupIntervals" } })))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Azure-AsyncOperation", format!("{}/ops/adhoc-1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/adhoc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Succeeded",
                "properties": { "objectType": "OperationJobExtendedInfo", "jobId": format!("{}/backupJobs/job-9", VAULT) }
            })))
            .mount(&server)
            .await;

        let info = BackupInstances::new(&client(&server), "sub-1")
            .adhoc_backup("rg-1", "bvault-1", "inst-1", "BackupIntervals")
            .await
            .unwrap();
        assert!(info.job_id.unwrap().ends_with("/job-9"));
    }

    #[tokio::test]
    async fn rejected_delete_surfaces_arm_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/backupInstances/inst-1", VAULT)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": "UserErrorOperationNotAllowedOnImmutableVault", "message": "immutable" }
            })))
            .mount(&server)
            .await;

        let err = BackupInstances::new(&client(&server), "sub-1")
            .delete("rg-1", "bvault-1", "inst-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("UserErrorOperationNotAllowedOnImmutableVault"));
    }

    #[tokio::test]
    async fn job_wait_polls_until_not_in_progress() {
        let server = MockServer::start().await;
        let job = |status: &str| -> Value {
            json!({ "id": "j", "name": "job-9", "properties": { "status": status, "operation": "OnDemandBackup" } })
        };
        Mock::given(method("GET"))
            .and(path(format!("{}/backupJobs/job-9", VAULT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(job("InProgress")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/backupJobs/job-9", VAULT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(job("Completed")))
            .mount(&server)
            .await;

        let finished = BackupJobs::new(&client(&server), "sub-1")
            .wait_for_completion("rg-1", "bvault-1", &format!("{}/backupJobs/job-9", VAULT))
            .await
            .unwrap();
        assert_eq!(finished.properties.status, "Completed");
    }

    #[tokio::test]
    async fn job_wait_gives_up_on_a_stalled_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/backupJobs/job-5", VAULT)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "j", "name": "job-5", "properties": { "status": "Completed" } }))
                    .set_delay(std::time::Duration::from_secs(8)),
            )
            .mount(&server)
            .await;

        let c = client(&server).with_poll_config(crate::poller::PollConfig {
            interval: std::time::Duration::from_millis(20),
            deadline: std::time::Duration::from_millis(200),
        });
        let started = Instant::now();
        let err = BackupJobs::new(&c, "sub-1")
            .wait_for_completion("rg-1", "bvault-1", "job-5")
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Timeout { .. }), "got {:?}", err);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
