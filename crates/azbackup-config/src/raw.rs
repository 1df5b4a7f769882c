//! Serde structs mirroring the YAML scenario file, before validation.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawScenarioFile {
    #[serde(default)]
    pub scenarios: Vec<RawScenario>,
}

#[derive(Debug, Deserialize)]
pub struct RawScenario {
    pub name: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_redundancy")]
    pub redundancy: String,
    #[serde(default)]
    pub naming: Option<String>,
    #[serde(default = "default_true")]
    pub create_resource_group: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub immutability: Option<String>,
    #[serde(default)]
    pub diagnostics: bool,
    #[serde(default)]
    pub verify_outputs: bool,
    #[serde(default)]
    pub check_idempotence: bool,
    #[serde(default)]
    pub immutability_workflow: bool,
    #[serde(default)]
    pub backups: Vec<RawBackup>,
}

#[derive(Debug, Deserialize)]
pub struct RawBackup {
    pub kind: String,
    pub name: String,
    pub retention_period: String,
    #[serde(default)]
    pub backup_intervals: Vec<String>,
}

fn default_location() -> String {
    "uksouth".into()
}

fn default_redundancy() -> String {
    "LocallyRedundant".into()
}

fn default_true() -> bool {
    true
}
