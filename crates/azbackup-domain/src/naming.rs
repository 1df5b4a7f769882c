//! Resource naming conventions shared by the Terraform module and the verifier.
//!
//! Lookups against ARM only succeed when both sides derive names the same way.

use crate::types::{BackupKind, UniqueId};

/// `rg-nhsbackup-<id>`
pub fn resource_group_name(id: &UniqueId) -> String {
    format!("rg-nhsbackup-{}", id)
}

/// Resource group holding the workload resources a scenario protects.
pub fn external_resource_group_name(resource_group_name: &str) -> String {
    format!("{}-external", resource_group_name)
}

/// `bvault-nhsbackup-<id>`
pub fn backup_vault_name(id: &UniqueId) -> String {
    format!("bvault-nhsbackup-{}", id)
}

/// `bvault-<id>`, the name the module derives from the flat `vault_name` variable.
pub fn legacy_backup_vault_name(id: &UniqueId) -> String {
    format!("bvault-{}", id)
}

/// `bkpol-<scope>-<kind>-<name>`
pub fn backup_policy_name(scope: &str, kind: BackupKind, backup_name: &str) -> String {
    format!("bkpol-{}-{}-{}", scope, kind.slug(), backup_name)
}

/// `bkinst-<scope>-<kind>-<name>`
pub fn backup_instance_name(scope: &str, kind: BackupKind, backup_name: &str) -> String {
    format!("bkinst-{}-{}-{}", scope, kind.slug(), backup_name)
}

/// Remote state key. Unique per scenario, so parallel runs never share state.
pub fn state_key(backup_vault_name: &str) -> String {
    format!("{}.tfstate", backup_vault_name)
}

/// Storage account names are 3–24 lowercase alphanumerics.
pub fn storage_account_name(id: &UniqueId, suffix: &str) -> String {
    let raw = format!("sa{}{}", id, suffix);
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(24)
        .collect()
}

pub fn managed_disk_name(id: &UniqueId, index: usize) -> String {
    format!("disk-{}-external-{}", id.as_str().to_lowercase(), index)
}

pub fn postgresql_server_name(id: &UniqueId, index: usize) -> String {
    format!("pgflexserver-{}-external-{}", id.as_str().to_lowercase(), index)
}

pub fn log_analytics_workspace_name(id: &UniqueId) -> String {
    format!("law-{}-external", id.as_str().to_lowercase())
}
