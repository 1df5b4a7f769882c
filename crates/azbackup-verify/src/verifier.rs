//! Checks against deployed resources.
//!
//! Every failed expectation is recorded as a [`Mismatch`] and checking
//! continues. Only control-plane failures abort a check with an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use azbackup_arm::{
    ArmClient, ArmError, BackupInstances, BackupPolicies, BackupVaults, DiagnosticSettings, ResourceGroups,
    RoleAssignments, RoleDefinitions,
};
use azbackup_domain::naming::{backup_instance_name, backup_policy_name};
use azbackup_domain::{
    BackupInstanceResource, BackupKind, BackupPolicyResource, BackupSpec, BackupVaultResource, Redundancy,
    ResourceGroup, RoleDefinition, BACKUP_INTERVALS_RULE, DEFAULT_RETENTION_RULE,
};
use tracing::{debug, warn};

use crate::error::VerifyError;
use crate::report::Mismatch;

/// Log categories the module enables on the vault.
pub const EXPECTED_LOG_CATEGORIES: &[&str] = &[
    "AddonAzureBackupJobs",
    "AddonAzureBackupPolicy",
    "AddonAzureBackupProtectedInstance",
    "CoreAzureBackup",
];
/// Metric categories the module enables on the vault.
pub const EXPECTED_METRIC_CATEGORIES: &[&str] = &["Health"];

const MISSING: &str = "<missing>";

pub struct Verifier {
    client: ArmClient,
    subscription_id: String,
    checks: usize,
    mismatches: Vec<Mismatch>,
    role_definitions: HashMap<String, RoleDefinition>,
}

impl Verifier {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
            checks: 0,
            mismatches: Vec::new(),
            role_definitions: HashMap::new(),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    /// Hand back `(checks run, mismatches)`.
    pub fn finish(self) -> (usize, Vec<Mismatch>) {
        (self.checks, self.mismatches)
    }

    // ── Recording ─────────────────────────────────────────────────────────────

    /// Record `check` as failed unless `ok`.
    pub fn expect(&mut self, check: impl Into<String>, ok: bool, expected: impl ToString, actual: impl ToString) -> bool {
        self.checks += 1;
        if !ok {
            let mismatch = Mismatch {
                check: check.into(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            };
            warn!(%mismatch, "check failed");
            self.mismatches.push(mismatch);
        }
        ok
    }

    pub fn expect_eq<T>(&mut self, check: impl Into<String>, expected: T, actual: T) -> bool
    where
        T: PartialEq + std::fmt::Display,
    {
        let ok = expected == actual;
        self.expect(check, ok, expected, actual)
    }

    pub fn mismatch(&mut self, check: impl Into<String>, expected: impl ToString, actual: impl ToString) {
        self.expect(check, false, expected, actual);
    }

    // ── Resource group ────────────────────────────────────────────────────────

    pub async fn verify_resource_group(
        &mut self,
        name: &str,
        location: &str,
    ) -> Result<Option<ResourceGroup>, VerifyError> {
        let found = ResourceGroups::new(&self.client, &self.subscription_id).find(name).await?;
        let Some(rg) = found else {
            self.mismatch(format!("resource group '{}' exists", name), "present", MISSING);
            return Ok(None);
        };
        self.expect_eq("resource group name", name, rg.name.as_str());
        self.expect_eq("resource group location", location, rg.location.as_str());
        Ok(Some(rg))
    }

    // ── Backup vault ──────────────────────────────────────────────────────────

    pub async fn verify_backup_vault(
        &mut self,
        resource_group: &str,
        name: &str,
        location: &str,
        redundancy: Redundancy,
    ) -> Result<Option<BackupVaultResource>, VerifyError> {
        let vault = match BackupVaults::new(&self.client, &self.subscription_id)
            .get(resource_group, name)
            .await
        {
            Ok(v) => v,
            Err(e) if e.is_not_found() => {
                self.mismatch(format!("backup vault '{}' exists", name), "present", MISSING);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.expect_eq("backup vault name", name, vault.name.as_str());
        self.expect_eq("backup vault location", location, vault.location.as_str());

        let identity_type = vault.identity.as_ref().and_then(|i| i.kind.as_deref()).unwrap_or(MISSING);
        self.expect_eq("backup vault identity type", "SystemAssigned", identity_type);
        self.expect(
            "backup vault identity principal id",
            vault.principal_id().is_some(),
            "non-empty",
            vault.principal_id().unwrap_or(MISSING),
        );

        match vault.properties.storage_settings.first() {
            Some(setting) => {
                self.expect_eq(
                    "backup vault redundancy",
                    redundancy.storage_setting_type(),
                    setting.kind.as_deref().unwrap_or(MISSING),
                );
                self.expect_eq(
                    "backup vault datastore type",
                    "VaultStore",
                    setting.datastore_type.as_deref().unwrap_or(MISSING),
                );
            }
            None => self.mismatch("backup vault storage settings", "one storage setting", "none"),
        }
        Ok(Some(vault))
    }

    // ── Tags ──────────────────────────────────────────────────────────────────

    /// Counts must match and every expected pair must be present verbatim.
    pub fn verify_tags(&mut self, what: &str, expected: &BTreeMap<String, String>, actual: &HashMap<String, String>) {
        self.expect_eq(format!("{} tag count", what), expected.len(), actual.len());
        for (key, value) in expected {
            let got = actual.get(key).map(String::as_str).unwrap_or(MISSING);
            self.expect_eq(format!("{} tag '{}'", what, key), value.as_str(), got);
        }
    }

    // ── Backups ───────────────────────────────────────────────────────────────

    /// Check every configured backup of one kind: policy and instance counts,
    /// conventional names, policy rules, instance linkage and the role
    /// assignments the vault identity needs on each data source.
    pub async fn verify_backups(
        &mut self,
        resource_group: &str,
        vault: &BackupVaultResource,
        scope: &str,
        kind: BackupKind,
        backups: &[BackupSpec],
    ) -> Result<(), VerifyError> {
        let backups: Vec<&BackupSpec> = backups.iter().filter(|b| b.kind() == kind).collect();
        let policies = BackupPolicies::new(&self.client, &self.subscription_id)
            .list(resource_group, &vault.name)
            .collect_all()
            .await?;
        let instances = BackupInstances::new(&self.client, &self.subscription_id)
            .list(resource_group, &vault.name)
            .collect_all()
            .await?;

        let policy_prefix = format!("bkpol-{}-{}-", scope, kind.slug());
        let instance_prefix = format!("bkinst-{}-{}-", scope, kind.slug());
        self.expect_eq(
            format!("{} backup policy count", kind),
            backups.len(),
            policies.iter().filter(|p| p.name.starts_with(&policy_prefix)).count(),
        );
        self.expect_eq(
            format!("{} backup instance count", kind),
            backups.len(),
            instances.iter().filter(|i| i.name.starts_with(&instance_prefix)).count(),
        );

        for backup in backups {
            let policy_name = backup_policy_name(scope, kind, &backup.backup_name);
            let instance_name = backup_instance_name(scope, kind, &backup.backup_name);

            let policy = policies.iter().find(|p| p.name == policy_name);
            match policy {
                Some(p) => self.verify_policy(p, backup),
                None => self.mismatch(format!("backup policy '{}' exists", policy_name), "present", MISSING),
            }

            match instances.iter().find(|i| i.name == instance_name) {
                Some(instance) => self.verify_instance(instance, policy, backup),
                None => self.mismatch(format!("backup instance '{}' exists", instance_name), "present", MISSING),
            }

            match vault.principal_id() {
                Some(principal_id) => {
                    for requirement in kind.required_roles() {
                        let role_scope = backup.target.scope(requirement.scope);
                        self.verify_role_assignment(principal_id, requirement.role_name, &role_scope)
                            .await?;
                    }
                }
                None => self.mismatch(
                    format!("role assignments for '{}'", backup.backup_name),
                    "vault identity principal id",
                    MISSING,
                ),
            }
        }
        Ok(())
    }

    /// Rule `Default` must delete after the retention period; rule
    /// `BackupIntervals` must be scheduled at exactly the configured intervals.
    pub fn verify_policy(&mut self, policy: &BackupPolicyResource, backup: &BackupSpec) {
        let name = policy.name.as_str();
        let properties = match policy.policy() {
            Ok(p) => p,
            Err(e) => {
                self.mismatch(format!("policy '{}' type", name), "BackupPolicy", e);
                return;
            }
        };

        match properties
            .retention_rule(DEFAULT_RETENTION_RULE)
            .and_then(|rule| rule.absolute_delete_after())
        {
            Ok(duration) => self.expect_eq(
                format!("policy '{}' retention period", name),
                backup.retention_period.as_str(),
                duration,
            ),
            Err(e) => self.expect(format!("policy '{}' retention rule", name), false, "absolute retention", e),
        };

        match properties
            .backup_rule(BACKUP_INTERVALS_RULE)
            .and_then(|rule| rule.repeating_intervals())
        {
            Ok(intervals) => {
                self.expect_eq(
                    format!("policy '{}' backup interval count", name),
                    backup.backup_intervals.len(),
                    intervals.len(),
                );
                for (index, expected) in backup.backup_intervals.iter().enumerate() {
                    let actual = intervals.get(index).map(String::as_str).unwrap_or(MISSING);
                    self.expect_eq(
                        format!("policy '{}' backup interval {}", name, index),
                        expected.as_str(),
                        actual,
                    );
                }
            }
            Err(e) => {
                self.mismatch(format!("policy '{}' backup rule", name), "scheduled backup rule", e);
            }
        }
    }

    fn verify_instance(
        &mut self,
        instance: &BackupInstanceResource,
        policy: Option<&BackupPolicyResource>,
        backup: &BackupSpec,
    ) {
        let name = instance.name.as_str();
        let info = &instance.properties;
        self.expect(
            format!("instance '{}' data source", name),
            info.data_source_info.resource_id == backup.target.source_id(),
            backup.target.source_id(),
            &info.data_source_info.resource_id,
        );
        if let Some(policy) = policy {
            self.expect(
                format!("instance '{}' policy", name),
                info.policy_info.policy_id == policy.id,
                &policy.id,
                &info.policy_info.policy_id,
            );
        }
    }

    // ── Role assignments ──────────────────────────────────────────────────────

    async fn role_definition(&mut self, role_name: &str) -> Result<Option<RoleDefinition>, VerifyError> {
        if let Some(def) = self.role_definitions.get(role_name) {
            return Ok(Some(def.clone()));
        }
        match RoleDefinitions::new(&self.client, &self.subscription_id)
            .find_by_name(role_name)
            .await
        {
            Ok(def) => {
                self.role_definitions.insert(role_name.to_string(), def.clone());
                Ok(Some(def))
            }
            Err(ArmError::RoleDefinitionLookup { count, .. }) => {
                self.mismatch(
                    format!("role definition '{}'", role_name),
                    "exactly one definition",
                    format!("{} definitions", count),
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `principal_id` must hold `role_name` on `scope`.
    pub async fn verify_role_assignment(
        &mut self,
        principal_id: &str,
        role_name: &str,
        scope: &str,
    ) -> Result<(), VerifyError> {
        let Some(definition) = self.role_definition(role_name).await? else {
            return Ok(());
        };
        let found = RoleAssignments::new(&self.client)
            .find(scope, principal_id, &definition)
            .await?;
        debug!(role_name, scope, found = found.is_some(), "role assignment lookup");
        self.expect(
            format!("role '{}' on {}", role_name, scope),
            found.is_some(),
            format!("assigned to {}", principal_id),
            "no assignment",
        );
        Ok(())
    }

    // ── Diagnostic settings ───────────────────────────────────────────────────

    /// Exactly one setting, sending exactly the expected categories to
    /// `workspace_id` when one is given.
    pub async fn verify_diagnostic_settings(
        &mut self,
        vault_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<(), VerifyError> {
        let settings = DiagnosticSettings::new(&self.client).list(vault_id).await?;
        if !self.expect_eq("diagnostic setting count", 1, settings.len()) {
            return Ok(());
        }
        let properties = &settings[0].properties;

        let logs: BTreeSet<&str> = properties.logs.iter().filter_map(|l| l.category.as_deref()).collect();
        let expected_logs: BTreeSet<&str> = EXPECTED_LOG_CATEGORIES.iter().copied().collect();
        self.expect_eq("diagnostic log category count", EXPECTED_LOG_CATEGORIES.len(), properties.logs.len());
        self.expect(
            "diagnostic log categories",
            logs == expected_logs,
            format!("{:?}", expected_logs),
            format!("{:?}", logs),
        );

        let metrics: BTreeSet<&str> = properties.metrics.iter().filter_map(|m| m.category.as_deref()).collect();
        let expected_metrics: BTreeSet<&str> = EXPECTED_METRIC_CATEGORIES.iter().copied().collect();
        self.expect_eq(
            "diagnostic metric category count",
            EXPECTED_METRIC_CATEGORIES.len(),
            properties.metrics.len(),
        );
        self.expect(
            "diagnostic metric categories",
            metrics == expected_metrics,
            format!("{:?}", expected_metrics),
            format!("{:?}", metrics),
        );

        if let Some(expected) = workspace_id {
            let actual = properties.workspace_id.as_deref().unwrap_or(MISSING);
            // Diagnostic settings echo the workspace id with its segments re-cased.
            self.expect(
                "diagnostic workspace",
                actual.eq_ignore_ascii_case(expected),
                expected,
                actual,
            );
        }
        Ok(())
    }

    // ── Outputs ───────────────────────────────────────────────────────────────

    /// The vault output must echo the name, location and redundancy requested.
    pub fn verify_outputs(
        &mut self,
        outputs: &BTreeMap<String, String>,
        name: &str,
        location: &str,
        redundancy: Redundancy,
    ) {
        let get = |key: &str| outputs.get(key).map(String::as_str).unwrap_or(MISSING);
        self.expect_eq("output backup vault name", name, get("name"));
        self.expect_eq("output backup vault location", location, get("location"));
        self.expect_eq(
            "output backup vault redundancy",
            redundancy.storage_setting_type(),
            get("redundancy"),
        );
    }
}
