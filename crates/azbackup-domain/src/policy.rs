//! Backup policy documents as returned by the Data Protection API.
//!
//! ARM encodes polymorphism with an `objectType` discriminator on policies,
//! rules, triggers and delete options. Each of those is a serde enum tagged on
//! that field, so inspecting a rule is an exhaustive `match` rather than a cast.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Name of the retention rule the module always creates.
pub const DEFAULT_RETENTION_RULE: &str = "Default";
/// Name of the scheduled backup rule.
pub const BACKUP_INTERVALS_RULE: &str = "BackupIntervals";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicyResource {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub properties: BasePolicy,
}

impl BackupPolicyResource {
    pub fn policy(&self) -> Result<&BackupPolicy, DomainError> {
        match &self.properties {
            BasePolicy::BackupPolicy(p) => Ok(p),
            BasePolicy::Unsupported => Err(DomainError::UnexpectedVariant {
                what: format!("policy '{}' properties", self.name),
                expected: "BackupPolicy",
                actual: "an unsupported objectType".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum BasePolicy {
    BackupPolicy(BackupPolicy),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    #[serde(default)]
    pub datasource_types: Vec<String>,
    #[serde(default)]
    pub policy_rules: Vec<PolicyRule>,
}

impl BackupPolicy {
    pub fn rule(&self, name: &str) -> Option<&PolicyRule> {
        self.policy_rules.iter().find(|r| r.name() == name)
    }

    /// The retention rule called `name`.
    pub fn retention_rule(&self, name: &str) -> Result<&RetentionRule, DomainError> {
        match self.rule(name) {
            Some(PolicyRule::Retention(rule)) => Ok(rule),
            Some(other) => Err(DomainError::UnexpectedVariant {
                what: format!("policy rule '{}'", name),
                expected: "AzureRetentionRule",
                actual: other.object_type().into(),
            }),
            None => Err(DomainError::RuleNotFound(name.to_string())),
        }
    }

    /// The backup (scheduling) rule called `name`.
    pub fn backup_rule(&self, name: &str) -> Result<&BackupRule, DomainError> {
        match self.rule(name) {
            Some(PolicyRule::Backup(rule)) => Ok(rule),
            Some(other) => Err(DomainError::UnexpectedVariant {
                what: format!("policy rule '{}'", name),
                expected: "AzureBackupRule",
                actual: other.object_type().into(),
            }),
            None => Err(DomainError::RuleNotFound(name.to_string())),
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum PolicyRule {
    #[serde(rename = "AzureBackupRule")]
    Backup(BackupRule),
    #[serde(rename = "AzureRetentionRule")]
    Retention(RetentionRule),
}

impl PolicyRule {
    pub fn name(&self) -> &str {
        match self {
            PolicyRule::Backup(r) => &r.name,
            PolicyRule::Retention(r) => &r.name,
        }
    }

    pub fn object_type(&self) -> &'static str {
        match self {
            PolicyRule::Backup(_) => "AzureBackupRule",
            PolicyRule::Retention(_) => "AzureRetentionRule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_store: Option<DataStoreInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_parameters: Option<Value>,
    pub trigger: Trigger,
}

impl BackupRule {
    /// Repeating intervals of a schedule-based trigger.
    pub fn repeating_intervals(&self) -> Result<&[String], DomainError> {
        match &self.trigger {
            Trigger::Schedule(t) => Ok(&t.schedule.repeating_time_intervals),
            Trigger::Adhoc(_) => Err(DomainError::UnexpectedVariant {
                what: format!("trigger of rule '{}'", self.name),
                expected: "ScheduleBasedTriggerContext",
                actual: "AdhocBasedTriggerContext".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub lifecycles: Vec<SourceLifeCycle>,
}

impl RetentionRule {
    /// Absolute delete-after duration of the first lifecycle.
    pub fn absolute_delete_after(&self) -> Result<&str, DomainError> {
        let lifecycle = self
            .lifecycles
            .first()
            .ok_or_else(|| DomainError::MissingLifecycle(self.name.clone()))?;
        match &lifecycle.delete_after {
            DeleteOption::Absolute(opt) => Ok(&opt.duration),
            DeleteOption::Unsupported => Err(DomainError::UnexpectedVariant {
                what: format!("delete option of rule '{}'", self.name),
                expected: "AbsoluteDeleteOption",
                actual: "an unsupported objectType".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLifeCycle {
    pub delete_after: DeleteOption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data_store: Option<DataStoreInfo>,
    #[serde(default)]
    pub target_data_store_copy_settings: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreInfo {
    pub data_store_type: String,
    #[serde(default)]
    pub object_type: String,
}

// ── Delete options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum DeleteOption {
    #[serde(rename = "AbsoluteDeleteOption")]
    Absolute(AbsoluteDeleteOption),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsoluteDeleteOption {
    pub duration: String,
}

// ── Triggers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "objectType")]
pub enum Trigger {
    #[serde(rename = "ScheduleBasedTriggerContext")]
    Schedule(ScheduleTrigger),
    #[serde(rename = "AdhocBasedTriggerContext")]
    Adhoc(AdhocTrigger),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    pub schedule: BackupSchedule,
    #[serde(default)]
    pub tagging_criteria: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSchedule {
    #[serde(default)]
    pub repeating_time_intervals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdhocTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagging_criteria: Option<Value>,
}
