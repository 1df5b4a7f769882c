use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use azbackup_arm::{token_provider, ArmClient, PollConfig, ResourceGroups, TokenProvider, MANAGEMENT_SCOPE};
use azbackup_config::{builtin_scenarios, load_scenarios, Environment, Scenario};
use azbackup_verify::ScenarioRunner;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ReportOutput;
use crate::output;

// ── Run ───────────────────────────────────────────────────────────────────────

pub async fn run(file: Option<PathBuf>, only: Vec<String>, parallel: usize, format: ReportOutput) -> Result<()> {
    let scenarios = select(scenarios(file.as_deref())?, &only)?;
    let env = Environment::from_env().context("Failed to resolve environment")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling waits and tearing down");
                cancel.cancel();
            }
        });
    }

    let client = client(&env).with_cancellation(cancel);
    info!(scenarios = scenarios.len(), parallel, "starting verification run");
    let runner = Arc::new(ScenarioRunner::new(env, client));
    let report = runner.run_all(scenarios, parallel).await;

    match format {
        ReportOutput::Text => print!("{}", output::render_report(&report)),
        ReportOutput::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{} scenario(s) failed", failed);
    }
    Ok(())
}

// ── List ──────────────────────────────────────────────────────────────────────

pub fn list(file: Option<PathBuf>) -> Result<()> {
    print!("{}", output::render_scenarios(&scenarios(file.as_deref())?));
    Ok(())
}

// ── CheckEnv ──────────────────────────────────────────────────────────────────

pub async fn check_env() -> Result<()> {
    let env = Environment::from_env().context("Failed to resolve environment")?;
    println!("subscription:   {}", env.subscription_id);
    println!("tenant:         {}", env.tenant_id);
    println!("client:         {}", env.client_id);
    println!(
        "state backend:  {}/{}/{}",
        env.state.resource_group, env.state.storage_account, env.state.container
    );
    println!("terraform dir:  {}", env.terraform_dir.display());

    anyhow::ensure!(
        env.terraform_dir.is_dir(),
        "Terraform module directory {} does not exist",
        env.terraform_dir.display()
    );

    provider(&env)
        .token(MANAGEMENT_SCOPE)
        .await
        .context("Failed to acquire a management token")?;
    println!("token:          ok");

    let state_rg = ResourceGroups::new(&client(&env), &env.subscription_id)
        .find(&env.state.resource_group)
        .await
        .context("Failed to look up the state resource group")?;
    match state_rg {
        Some(rg) => println!("state group:    {} ({})", rg.name, rg.location),
        None => anyhow::bail!("state resource group {} does not exist", env.state.resource_group),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn provider(env: &Environment) -> Arc<dyn TokenProvider> {
    token_provider(&env.tenant_id, Some(&env.client_id), Some(&env.client_secret))
}

fn client(env: &Environment) -> ArmClient {
    ArmClient::new(provider(env)).with_poll_config(PollConfig {
        interval: env.poll_interval,
        deadline: env.operation_timeout,
    })
}

/// The scenario table: `file` when given, otherwise the built-in set.
fn scenarios(file: Option<&Path>) -> Result<Vec<Scenario>> {
    match file {
        Some(path) => load_scenarios(path).with_context(|| format!("Failed to load scenarios from {}", path.display())),
        None => Ok(builtin_scenarios()),
    }
}

/// Keep the scenarios named in `only`, in table order. Empty keeps all.
fn select(scenarios: Vec<Scenario>, only: &[String]) -> Result<Vec<Scenario>> {
    if only.is_empty() {
        return Ok(scenarios);
    }
    if let Some(unknown) = only.iter().find(|n| !scenarios.iter().any(|s| &s.name == *n)) {
        anyhow::bail!("unknown scenario '{}'", unknown);
    }
    Ok(scenarios.into_iter().filter(|s| only.contains(&s.name)).collect())
}
