use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TerraformError;

/// Options file written into a module working copy between stages.
pub const OPTIONS_FILE: &str = ".azbackup-options.json";
/// Variable file picked up automatically by `terraform plan`/`apply`.
pub const VARS_FILE: &str = "azbackup.auto.tfvars.json";

fn default_binary() -> String {
    "terraform".into()
}

fn default_timeout_secs() -> u64 {
    1800
}

/// azurerm state backend reference passed to `terraform init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub container_name: String,
    pub key: String,
}

impl BackendConfig {
    /// One `-backend-config=k=v` argument per field.
    pub fn args(&self) -> Vec<String> {
        [
            ("resource_group_name", &self.resource_group_name),
            ("storage_account_name", &self.storage_account_name),
            ("container_name", &self.container_name),
            ("key", &self.key),
        ]
        .iter()
        .map(|(k, v)| format!("-backend-config={}={}", k, v))
        .collect()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TerraformOptions {
    pub terraform_dir: PathBuf,
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Extra process environment (credentials). Never written to disk.
    #[serde(skip)]
    pub env: Vec<(String, String)>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TerraformOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TerraformOptions")
            .field("terraform_dir", &self.terraform_dir)
            .field("binary", &self.binary)
            .field("vars", &self.vars)
            .field("backend", &self.backend)
            .field("env", &env_keys)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TerraformOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            binary: default_binary(),
            vars: Map::new(),
            backend: BackendConfig::default(),
            env: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn var(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }

    /// Persist the options into `dir` so a later stage can pick them up.
    pub fn save(&self, dir: &Path) -> Result<(), TerraformError> {
        let path = dir.join(OPTIONS_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| TerraformError::Json {
            context: format!("serialize {}", path.display()),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| TerraformError::io(&path, e))
    }

    /// Load options saved by [`TerraformOptions::save`]. The environment is
    /// not persisted and comes back empty.
    pub fn load(dir: &Path) -> Result<Self, TerraformError> {
        let path = dir.join(OPTIONS_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| TerraformError::io(&path, e))?;
        serde_json::from_str(&raw).map_err(|e| TerraformError::Json {
            context: format!("parse {}", path.display()),
            source: e,
        })
    }

    pub(crate) fn write_vars(&self) -> Result<PathBuf, TerraformError> {
        let path = self.terraform_dir.join(VARS_FILE);
        let json = serde_json::to_string_pretty(&self.vars).map_err(|e| TerraformError::Json {
            context: format!("serialize {}", path.display()),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| TerraformError::io(&path, e))?;
        Ok(path)
    }
}
