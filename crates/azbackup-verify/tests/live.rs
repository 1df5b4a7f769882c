//! Runs the built-in scenarios against a real subscription.
//!
//! Requires ARM_TENANT_ID, ARM_SUBSCRIPTION_ID, ARM_CLIENT_ID, ARM_CLIENT_SECRET
//! and the TF_STATE_* variables. Run with `cargo test -- --ignored`.

use azbackup_arm::{token_provider, ArmClient, PollConfig};
use azbackup_config::{builtin_scenarios, Environment};
use azbackup_verify::ScenarioRunner;

async fn run_builtin(name: &str) {
    let env = Environment::from_env().expect("ARM_* and TF_STATE_* must be set");
    let token = token_provider(&env.tenant_id, Some(&env.client_id), Some(&env.client_secret));
    let client = ArmClient::new(token).with_poll_config(PollConfig {
        interval: env.poll_interval,
        deadline: env.operation_timeout,
    });
    let scenario = builtin_scenarios()
        .into_iter()
        .find(|s| s.name == name)
        .expect("unknown scenario");

    let report = ScenarioRunner::new(env, client).run(&scenario).await;
    for m in &report.mismatches {
        eprintln!("{}: {}", report.scenario, m);
    }
    for e in &report.errors {
        eprintln!("{}: {} error: {}", report.scenario, e.stage, e.message);
    }
    assert!(report.passed(), "scenario {} failed", name);
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn basic_deployment() {
    run_builtin("basic-deployment").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn existing_resource_group() {
    run_builtin("existing-resource-group").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn diagnostic_settings() {
    run_builtin("diagnostic-settings").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn terraform_outputs() {
    run_builtin("terraform-outputs").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn blob_storage_backup() {
    run_builtin("blob-storage-backup").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn managed_disk_backup() {
    run_builtin("managed-disk-backup").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn postgresql_flexible_server_backup() {
    run_builtin("postgresql-flexible-server-backup").await;
}

#[tokio::test]
#[ignore = "requires Azure credentials"]
async fn vault_immutability() {
    run_builtin("vault-immutability").await;
}
