use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;

const DEFAULT_TERRAFORM_DIR: &str = "infrastructure";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 3600;

/// Where Terraform keeps remote state. The per-scenario key is added later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLocation {
    pub resource_group: String,
    pub storage_account: String,
    pub container: String,
}

/// Credentials and identifiers a run needs, resolved once from the process
/// environment.
#[derive(Clone)]
pub struct Environment {
    pub tenant_id: String,
    pub subscription_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub state: StateLocation,
    /// Terraform module copied into a private working directory per scenario.
    pub terraform_dir: PathBuf,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("state", &self.state)
            .field("terraform_dir", &self.terraform_dir)
            .field("poll_interval", &self.poll_interval)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl Environment {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve through an arbitrary lookup. An absent or empty required
    /// variable is an error; nothing is retried.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            match lookup(name) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::MissingVariable(name)),
            }
        };
        let seconds = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match lookup(name) {
                Some(v) if !v.trim().is_empty() => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidVariable {
                        name,
                        expected: "number of seconds",
                        value: v,
                    }),
                _ => Ok(Duration::from_secs(default)),
            }
        };

        let env = Environment {
            tenant_id: required("ARM_TENANT_ID")?,
            subscription_id: required("ARM_SUBSCRIPTION_ID")?,
            client_id: required("ARM_CLIENT_ID")?,
            client_secret: required("ARM_CLIENT_SECRET")?,
            state: StateLocation {
                resource_group: required("TF_STATE_RESOURCE_GROUP")?,
                storage_account: required("TF_STATE_STORAGE_ACCOUNT")?,
                container: required("TF_STATE_STORAGE_CONTAINER")?,
            },
            terraform_dir: lookup("AZBACKUP_TERRAFORM_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TERRAFORM_DIR)),
            poll_interval: seconds("AZBACKUP_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            operation_timeout: seconds(
                "AZBACKUP_OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?,
        };
        debug!(subscription_id = %env.subscription_id, terraform_dir = %env.terraform_dir.display(), "resolved environment");
        Ok(env)
    }

    /// Variables handed to the Terraform azurerm provider.
    pub fn arm_env(&self) -> Vec<(String, String)> {
        vec![
            ("ARM_TENANT_ID".into(), self.tenant_id.clone()),
            ("ARM_SUBSCRIPTION_ID".into(), self.subscription_id.clone()),
            ("ARM_CLIENT_ID".into(), self.client_id.clone()),
            ("ARM_CLIENT_SECRET".into(), self.client_secret.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full() -> HashMap<&'static str, String> {
        [
            ("ARM_TENANT_ID", "tenant"),
            ("ARM_SUBSCRIPTION_ID", "sub"),
            ("ARM_CLIENT_ID", "client"),
            ("ARM_CLIENT_SECRET", "secret"),
            ("TF_STATE_RESOURCE_GROUP", "rg-state"),
            ("TF_STATE_STORAGE_ACCOUNT", "sastate"),
            ("TF_STATE_STORAGE_CONTAINER", "tfstate"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn resolve(vars: &HashMap<&'static str, String>) -> Result<Environment, ConfigError> {
        Environment::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn resolves_all_required_values_with_defaults() {
        let env = resolve(&full()).unwrap();
        assert_eq!(env.subscription_id, "sub");
        assert_eq!(env.state.container, "tfstate");
        assert_eq!(env.terraform_dir, PathBuf::from("infrastructure"));
        assert_eq!(env.poll_interval, Duration::from_secs(10));
        assert_eq!(env.operation_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn each_required_variable_is_checked() {
        for name in [
            "ARM_TENANT_ID",
            "ARM_SUBSCRIPTION_ID",
            "ARM_CLIENT_ID",
            "ARM_CLIENT_SECRET",
            "TF_STATE_RESOURCE_GROUP",
            "TF_STATE_STORAGE_ACCOUNT",
            "TF_STATE_STORAGE_CONTAINER",
        ] {
            let mut vars = full();
            vars.remove(name);
            match resolve(&vars) {
                Err(ConfigError::MissingVariable(missing)) => assert_eq!(missing, name),
                other => panic!("expected {} to be reported missing, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut vars = full();
        vars.insert("ARM_CLIENT_SECRET", "  ".into());
        assert!(matches!(resolve(&vars), Err(ConfigError::MissingVariable("ARM_CLIENT_SECRET"))));
    }

    #[test]
    fn tuning_overrides_are_parsed() {
        let mut vars = full();
        vars.insert("AZBACKUP_POLL_INTERVAL_SECS", "2".into());
        vars.insert("AZBACKUP_TERRAFORM_DIR", "../../infrastructure".into());
        let env = resolve(&vars).unwrap();
        assert_eq!(env.poll_interval, Duration::from_secs(2));
        assert_eq!(env.terraform_dir, PathBuf::from("../../infrastructure"));

        vars.insert("AZBACKUP_OPERATION_TIMEOUT_SECS", "soon".into());
        assert!(matches!(resolve(&vars), Err(ConfigError::InvalidVariable { .. })));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let env = resolve(&full()).unwrap();
        let dbg = format!("{:?}", env);
        assert!(!dbg.contains("secret\""), "got {}", dbg);
        assert!(dbg.contains("<redacted>"));
    }
}
