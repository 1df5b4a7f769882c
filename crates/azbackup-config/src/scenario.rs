use std::collections::BTreeMap;

use azbackup_domain::{BackupKind, ImmutabilityState, Redundancy};
use serde::{Deserialize, Serialize};

/// Which variable names the module is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultNaming {
    /// `resource_group_name`, `backup_vault_name`, ... → `bvault-nhsbackup-<id>`.
    Standard,
    /// Flat `vault_name`, `vault_location`, ... → `bvault-<id>`.
    Legacy,
}

/// A backup to configure once its source resource exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTemplate {
    pub kind: BackupKind,
    pub name: String,
    pub retention_period: String,
    pub backup_intervals: Vec<String>,
}

/// One row of the scenario table: what to deploy and which checks to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub location: String,
    pub redundancy: Redundancy,
    pub naming: VaultNaming,
    /// `false` pre-creates the resource group and tells the module not to.
    pub create_resource_group: bool,
    pub tags: BTreeMap<String, String>,
    pub immutability: Option<ImmutabilityState>,
    /// Create a Log Analytics workspace and verify the vault's diagnostic settings.
    pub diagnostics: bool,
    /// Check the `backup_vault` output map.
    pub verify_outputs: bool,
    /// Run `plan -detailed-exitcode` after apply and expect no changes.
    pub check_idempotence: bool,
    /// Exercise delete-while-immutable against the first blob backup.
    pub immutability_workflow: bool,
    pub backups: Vec<BackupTemplate>,
}

impl Scenario {
    pub fn backups_of(&self, kind: BackupKind) -> impl Iterator<Item = &BackupTemplate> {
        self.backups.iter().filter(move |b| b.kind == kind)
    }
}
