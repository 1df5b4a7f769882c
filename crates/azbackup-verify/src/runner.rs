//! Drives one scenario through setup, validate and teardown.
//!
//! Teardown always runs: setup and validation are awaited inside
//! `catch_unwind`, so a panicking check still leaves the subscription clean.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use azbackup_arm::ArmClient;
use azbackup_config::{Environment, Scenario, VaultNaming};
use azbackup_domain::naming::{
    backup_instance_name, backup_vault_name, legacy_backup_vault_name, resource_group_name, state_key,
};
use azbackup_domain::{backups_variable, BackupKind, UniqueId};
use azbackup_terraform::{copy_module_to_temp, BackendConfig, PlanOutcome, Terraform, TerraformOptions};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::VerifyError;
use crate::fixtures::{ExternalResources, FixtureBuilder};
use crate::immutability::ImmutabilityWorkflow;
use crate::report::{ScenarioReport, Stage, VerificationReport};
use crate::verifier::Verifier;

const KINDS: [BackupKind; 3] = [
    BackupKind::BlobStorage,
    BackupKind::ManagedDisk,
    BackupKind::PostgresqlFlexibleServer,
];

/// Names derived from a scenario's unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioNames {
    pub unique_id: UniqueId,
    pub resource_group: String,
    pub backup_vault: String,
    /// Middle segment of policy and instance names.
    pub scope: String,
}

impl ScenarioNames {
    pub fn new(unique_id: UniqueId, naming: VaultNaming) -> Self {
        let resource_group = resource_group_name(&unique_id);
        let (backup_vault, scope) = match naming {
            VaultNaming::Standard => {
                let vault = backup_vault_name(&unique_id);
                (vault.clone(), vault)
            }
            VaultNaming::Legacy => (legacy_backup_vault_name(&unique_id), unique_id.to_string()),
        };
        Self {
            unique_id,
            resource_group,
            backup_vault,
            scope,
        }
    }
}

/// The module's input variables for one scenario.
pub fn terraform_vars(scenario: &Scenario, names: &ScenarioNames, external: &ExternalResources) -> Map<String, Value> {
    let mut vars = Map::new();
    match scenario.naming {
        VaultNaming::Standard => {
            vars.insert("resource_group_name".into(), json!(names.resource_group));
            vars.insert("resource_group_location".into(), json!(scenario.location));
            vars.insert("backup_vault_name".into(), json!(names.backup_vault));
            vars.insert("backup_vault_redundancy".into(), json!(scenario.redundancy.to_string()));
        }
        VaultNaming::Legacy => {
            vars.insert("vault_name".into(), json!(names.unique_id.as_str()));
            vars.insert("vault_location".into(), json!(scenario.location));
            vars.insert("vault_redundancy".into(), json!(scenario.redundancy.to_string()));
        }
    }
    if !scenario.create_resource_group {
        vars.insert("create_resource_group".into(), json!(false));
    }
    if !scenario.tags.is_empty() {
        vars.insert("tags".into(), json!(scenario.tags));
    }
    if let Some(state) = scenario.immutability {
        vars.insert("backup_vault_immutability".into(), json!(state.to_string()));
    }
    if let Some(workspace) = external.workspace_id() {
        vars.insert("log_analytics_workspace_id".into(), json!(workspace));
    }
    for kind in KINDS {
        let backups = external.backups_of(kind);
        if !backups.is_empty() {
            vars.insert(kind.tf_variable().into(), backups_variable(&backups));
        }
    }
    vars
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

type StageResult = Result<(), (Stage, VerifyError)>;

fn at<T>(stage: Stage) -> impl Fn(T) -> (Stage, VerifyError)
where
    T: Into<VerifyError>,
{
    move |e| (stage, e.into())
}

pub struct ScenarioRunner {
    env: Environment,
    client: ArmClient,
    terraform_binary: String,
}

impl ScenarioRunner {
    /// `client` carries the run's cancellation token; setup and validation
    /// stop when it fires, teardown does not.
    pub fn new(env: Environment, client: ArmClient) -> Self {
        Self {
            env,
            client,
            terraform_binary: "terraform".into(),
        }
    }

    pub fn with_terraform_binary(mut self, binary: impl Into<String>) -> Self {
        self.terraform_binary = binary.into();
        self
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        self.run_with_id(scenario, UniqueId::generate()).await
    }

    pub async fn run_with_id(&self, scenario: &Scenario, id: UniqueId) -> ScenarioReport {
        let names = ScenarioNames::new(id.clone(), scenario.naming);
        let mut report = ScenarioReport::new(&scenario.name, id.as_str());
        info!(
            scenario = %scenario.name,
            resource_group = %names.resource_group,
            backup_vault = %names.backup_vault,
            "starting scenario"
        );

        let mut fixtures = FixtureBuilder::new(&self.client, &self.env.subscription_id, id, &scenario.location);
        let mut workdir: Option<TempDir> = None;
        let mut verifier = Verifier::new(&self.client, &self.env.subscription_id);

        let outcome = AssertUnwindSafe(self.setup_and_validate(
            scenario,
            &names,
            &mut fixtures,
            &mut workdir,
            &mut verifier,
        ))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err((stage, e))) => {
                error!(scenario = %scenario.name, %stage, error = %e, "scenario stage failed");
                report.error(stage, e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(scenario = %scenario.name, panic = %message, "scenario panicked");
                report.error(Stage::Validate, format!("panicked: {}", message));
            }
        }
        let (checks, mismatches) = verifier.finish();
        report.checks = checks;
        report.mismatches = mismatches;

        self.teardown(&fixtures, workdir.as_ref(), &mut report).await;
        report.finish();
        info!(
            scenario = %scenario.name,
            passed = report.passed(),
            checks = report.checks,
            mismatches = report.mismatches.len(),
            "scenario finished"
        );
        report
    }

    /// Run scenarios on separate tasks, at most `parallelism` at a time.
    /// Reports come back in input order.
    pub async fn run_all(self: Arc<Self>, scenarios: Vec<Scenario>, parallelism: usize) -> VerificationReport {
        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let mut handles = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let runner = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let name = scenario.name.clone();
            let span = info_span!("scenario", scenario = %name);
            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    runner.run(&scenario).await
                }
                .instrument(span),
            );
            handles.push((name, handle));
        }

        let mut report = VerificationReport::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(r) => report.scenarios.push(r),
                Err(e) => {
                    let mut r = ScenarioReport::new(name, "");
                    r.error(Stage::Setup, format!("scenario task failed: {}", e));
                    r.finish();
                    report.scenarios.push(r);
                }
            }
        }
        report
    }

    // ── Stages ────────────────────────────────────────────────────────────────

    async fn setup_and_validate(
        &self,
        scenario: &Scenario,
        names: &ScenarioNames,
        fixtures: &mut FixtureBuilder,
        workdir: &mut Option<TempDir>,
        verifier: &mut Verifier,
    ) -> StageResult {
        let external = fixtures
            .build(scenario, &names.resource_group)
            .await
            .map_err(at(Stage::Setup))?;

        let dir = copy_module_to_temp(&self.env.terraform_dir).map_err(at(Stage::Setup))?;
        let mut options = TerraformOptions::new(dir.path())
            .with_binary(self.terraform_binary.clone())
            .with_backend(BackendConfig {
                resource_group_name: self.env.state.resource_group.clone(),
                storage_account_name: self.env.state.storage_account.clone(),
                container_name: self.env.state.container.clone(),
                key: state_key(&names.backup_vault),
            })
            .with_env(self.env.arm_env());
        options.vars = terraform_vars(scenario, names, &external);
        options.save(dir.path()).map_err(at(Stage::Setup))?;
        *workdir = Some(dir);

        let terraform = Terraform::new(options).with_cancellation(self.client.cancellation().clone());
        terraform.init_and_apply().await.map_err(at(Stage::Setup))?;

        self.validate(scenario, names, &external, &terraform, verifier)
            .await
            .map_err(at(Stage::Validate))
    }

    async fn validate(
        &self,
        scenario: &Scenario,
        names: &ScenarioNames,
        external: &ExternalResources,
        terraform: &Terraform,
        v: &mut Verifier,
    ) -> Result<(), VerifyError> {
        let rg = v
            .verify_resource_group(&names.resource_group, &scenario.location)
            .await?;
        if let Some(rg) = &rg {
            if scenario.create_resource_group && !scenario.tags.is_empty() {
                v.verify_tags("resource group", &scenario.tags, &rg.tags());
            }
        }

        let Some(vault) = v
            .verify_backup_vault(
                &names.resource_group,
                &names.backup_vault,
                &scenario.location,
                scenario.redundancy,
            )
            .await?
        else {
            return Ok(());
        };
        if !scenario.tags.is_empty() {
            v.verify_tags("backup vault", &scenario.tags, &vault.tags());
        }
        if let Some(expected) = scenario.immutability {
            let actual = vault
                .immutability()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "<missing>".into());
            v.expect_eq("backup vault immutability", expected.to_string(), actual);
        }

        for kind in KINDS {
            let backups = external.backups_of(kind);
            if !backups.is_empty() {
                v.verify_backups(&names.resource_group, &vault, &names.scope, kind, &backups)
                    .await?;
            }
        }

        if scenario.diagnostics {
            v.verify_diagnostic_settings(&vault.id, external.workspace_id()).await?;
        }

        if scenario.verify_outputs {
            let outputs = match scenario.naming {
                VaultNaming::Standard => terraform.output_map("backup_vault").await?,
                VaultNaming::Legacy => {
                    let mut flat = BTreeMap::new();
                    for (key, output) in [
                        ("name", "vault_name"),
                        ("location", "vault_location"),
                        ("redundancy", "vault_redundancy"),
                    ] {
                        flat.insert(key.to_string(), terraform.output(output).await?);
                    }
                    flat
                }
            };
            v.verify_outputs(&outputs, &names.backup_vault, &scenario.location, scenario.redundancy);
        }

        if scenario.check_idempotence {
            let plan = terraform.plan().await?;
            v.expect(
                "terraform plan after apply",
                plan == PlanOutcome::NoChanges,
                "no changes",
                "changes pending",
            );
        }

        if scenario.immutability_workflow {
            let backup = external
                .backups_of(BackupKind::BlobStorage)
                .into_iter()
                .next()
                .ok_or_else(|| VerifyError::Setup("immutability workflow needs a blob storage backup".into()))?;
            let source = external
                .storage_account(backup.target.source_id())
                .ok_or_else(|| VerifyError::Setup(format!("no fixture for {}", backup.target.source_id())))?;
            let instance = backup_instance_name(&names.scope, BackupKind::BlobStorage, &backup.backup_name);
            ImmutabilityWorkflow::new(&self.client, &self.env.subscription_id)
                .run(v, &names.resource_group, &names.backup_vault, &instance, source)
                .await?;
        }
        Ok(())
    }

    async fn teardown(&self, fixtures: &FixtureBuilder, workdir: Option<&TempDir>, report: &mut ScenarioReport) {
        if let Some(dir) = workdir {
            match TerraformOptions::load(dir.path()) {
                Ok(mut options) => {
                    options.env = self.env.arm_env();
                    if let Err(e) = Terraform::new(options).destroy().await {
                        warn!(error = %e, "terraform destroy failed");
                        report.error(Stage::Teardown, e.to_string());
                    }
                }
                Err(e) => report.error(Stage::Teardown, e.to_string()),
            }
        }

        // A fresh client so a cancelled run still cleans up.
        let client = self.client.clone().with_cancellation(CancellationToken::new());
        let cleanup = fixtures.with_client(&client, &self.env.subscription_id);
        if let Err(e) = cleanup.teardown().await {
            report.error(Stage::Teardown, e.to_string());
        }
    }
}
