//! Delete-while-immutable ordering: a protected instance cannot be removed
//! until the vault's immutability is disabled.

use azbackup_arm::{ArmClient, BackupInstances, BackupJobs, BackupVaults, Workloads};
use azbackup_domain::{ImmutabilityState, BACKUP_INTERVALS_RULE};
use tracing::{info, warn};

use crate::error::VerifyError;
use crate::fixtures::StorageAccountFixture;
use crate::verifier::Verifier;

pub const TEST_BLOB_NAME: &str = "immutability-test.txt";
const TEST_BLOB_CONTENT: &[u8] = b"This is a test file for the vault immutability workflow.\n";

pub struct ImmutabilityWorkflow {
    vaults: BackupVaults,
    instances: BackupInstances,
    jobs: BackupJobs,
    workloads: Workloads,
}

impl ImmutabilityWorkflow {
    pub fn new(client: &ArmClient, subscription_id: &str) -> Self {
        Self {
            vaults: BackupVaults::new(client, subscription_id),
            instances: BackupInstances::new(client, subscription_id),
            jobs: BackupJobs::new(client, subscription_id),
            workloads: Workloads::new(client, subscription_id),
        }
    }

    /// Put data in the source container, take a backup of it, then check that
    /// the instance survives a delete until immutability is disabled.
    pub async fn run(
        &self,
        verifier: &mut Verifier,
        resource_group: &str,
        vault: &str,
        instance: &str,
        source: &StorageAccountFixture,
    ) -> Result<(), VerifyError> {
        let container = source
            .containers
            .first()
            .ok_or_else(|| VerifyError::Setup(format!("storage account {} has no container", source.account.name)))?;
        self.workloads
            .upload_blob(&source.blob_endpoint, container, TEST_BLOB_NAME, TEST_BLOB_CONTENT.to_vec())
            .await?;

        let started = self
            .instances
            .adhoc_backup(resource_group, vault, instance, BACKUP_INTERVALS_RULE)
            .await?;
        match started.job_id.as_deref() {
            Some(job_id) => {
                let job = self.jobs.wait_for_completion(resource_group, vault, job_id).await?;
                verifier.expect_eq(
                    format!("ad-hoc backup job for '{}'", instance),
                    "Completed",
                    job.properties.status.as_str(),
                );
            }
            None => verifier.mismatch(format!("ad-hoc backup job for '{}'", instance), "a job id", "none"),
        }

        let first = self.instances.delete(resource_group, vault, instance).await;
        if let Err(e) = &first {
            info!(instance, error = %e, "delete rejected while vault is immutable");
        }
        verifier.expect(
            format!("delete of '{}' while immutable", instance),
            first.is_err(),
            "rejected",
            "deleted",
        );

        self.vaults
            .set_immutability(resource_group, vault, ImmutabilityState::Disabled)
            .await?;

        let second = self.instances.delete(resource_group, vault, instance).await;
        if let Err(e) = &second {
            warn!(instance, error = %e, "delete failed after immutability was disabled");
        }
        verifier.expect(
            format!("delete of '{}' after disabling immutability", instance),
            second.is_ok(),
            "deleted",
            second.as_ref().err().map(ToString::to_string).unwrap_or_default(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::client;
    use azbackup_domain::ArmResource;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const SUB: &str = "sub-1";
    const RG: &str = "rg-nhsbackup-abc123";
    const VAULT: &str = "bvault-nhsbackup-abc123";
    const INSTANCE: &str = "bkinst-bvault-nhsbackup-abc123-blobstorage-blob1";

    fn vault_path() -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DataProtection/backupVaults/{}",
            SUB, RG, VAULT
        )
    }

    fn source(server: &MockServer) -> StorageAccountFixture {
        StorageAccountFixture {
            account: ArmResource {
                id: "/sa".into(),
                name: "saabc123external1".into(),
                ..Default::default()
            },
            containers: vec!["test-container".into()],
            blob_endpoint: format!("{}/", server.uri()),
        }
    }

    async fn mount_backup(server: &MockServer, job_status: &str) {
        Mock::given(method("PUT"))
            .and(path(format!("/test-container/{}", TEST_BLOB_NAME)))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/backupInstances/{}/backup", vault_path(), INSTANCE)))
            .and(body_partial_json(json!({ "backupRuleOptions": { "ruleName": "BackupIntervals" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobId": format!("{}/backupJobs/job-1", vault_path())
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/backupJobs/job-1", vault_path())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "job-1", "name": "job-1", "properties": { "status": job_status }
            })))
            .mount(server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(vault_path()))
            .and(body_partial_json(json!({
                "properties": { "securitySettings": { "immutabilitySettings": { "state": "Disabled" } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": vault_path(), "name": VAULT, "location": "uksouth",
                "properties": { "securitySettings": { "immutabilitySettings": { "state": "Disabled" } } }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn delete_fails_then_succeeds_after_disabling() {
        let server = MockServer::start().await;
        mount_backup(&server, "Completed").await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/backupInstances/{}", vault_path(), INSTANCE)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": "UserErrorImmutableVault", "message": "vault is immutable" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/backupInstances/{}", vault_path(), INSTANCE)))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let c = client(&server);
        let mut v = Verifier::new(&c, SUB);
        ImmutabilityWorkflow::new(&c, SUB)
            .run(&mut v, RG, VAULT, INSTANCE, &source(&server))
            .await
            .unwrap();
        assert!(v.mismatches().is_empty(), "{:?}", v.mismatches());
        assert_eq!(v.checks(), 3);
    }

    #[tokio::test]
    async fn delete_succeeding_while_immutable_is_recorded() {
        let server = MockServer::start().await;
        mount_backup(&server, "Failed").await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/backupInstances/{}", vault_path(), INSTANCE)))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let c = client(&server);
        let mut v = Verifier::new(&c, SUB);
        ImmutabilityWorkflow::new(&c, SUB)
            .run(&mut v, RG, VAULT, INSTANCE, &source(&server))
            .await
            .unwrap();

        let failed: Vec<&str> = v.mismatches().iter().map(|m| m.check.as_str()).collect();
        assert_eq!(
            failed,
            vec![
                format!("ad-hoc backup job for '{}'", INSTANCE),
                format!("delete of '{}' while immutable", INSTANCE),
            ]
        );
    }
}
