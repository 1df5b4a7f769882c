use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Random suffix shared by every resource a single scenario creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueId(pub String);

const UNIQUE_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const UNIQUE_ID_LEN: usize = 6;

impl UniqueId {
    pub fn new(s: impl Into<String>) -> Self {
        UniqueId(s.into())
    }

    /// Six base-62 characters drawn from a v4 UUID.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let id = uuid.as_bytes()[..UNIQUE_ID_LEN]
            .iter()
            .map(|b| UNIQUE_ID_ALPHABET[(*b as usize) % UNIQUE_ID_ALPHABET.len()] as char)
            .collect();
        UniqueId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Redundancy {
    LocallyRedundant,
    GeoRedundant,
    ZoneRedundant,
}

impl Redundancy {
    /// The storage setting `type` ARM reports for a vault with this redundancy.
    pub fn storage_setting_type(&self) -> &'static str {
        match self {
            Redundancy::LocallyRedundant => "LocallyRedundant",
            Redundancy::GeoRedundant => "GeoRedundant",
            Redundancy::ZoneRedundant => "ZoneRedundant",
        }
    }
}

impl std::fmt::Display for Redundancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_setting_type())
    }
}

impl std::str::FromStr for Redundancy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LocallyRedundant" => Ok(Redundancy::LocallyRedundant),
            "GeoRedundant" => Ok(Redundancy::GeoRedundant),
            "ZoneRedundant" => Ok(Redundancy::ZoneRedundant),
            other => Err(DomainError::InvalidValue {
                field: "redundancy",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImmutabilityState {
    Disabled,
    Unlocked,
    Locked,
}

impl std::fmt::Display for ImmutabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmutabilityState::Disabled => write!(f, "Disabled"),
            ImmutabilityState::Unlocked => write!(f, "Unlocked"),
            ImmutabilityState::Locked => write!(f, "Locked"),
        }
    }
}

impl std::str::FromStr for ImmutabilityState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Disabled" => Ok(ImmutabilityState::Disabled),
            "Unlocked" => Ok(ImmutabilityState::Unlocked),
            "Locked" => Ok(ImmutabilityState::Locked),
            other => Err(DomainError::InvalidValue {
                field: "immutability",
                value: other.to_string(),
            }),
        }
    }
}

/// The kinds of data source the backup module can protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    BlobStorage,
    ManagedDisk,
    PostgresqlFlexibleServer,
}

impl BackupKind {
    /// Slug used in policy and instance names.
    pub fn slug(&self) -> &'static str {
        match self {
            BackupKind::BlobStorage => "blobstorage",
            BackupKind::ManagedDisk => "manageddisk",
            BackupKind::PostgresqlFlexibleServer => "pgflexserver",
        }
    }

    /// Terraform variable holding the backups of this kind.
    pub fn tf_variable(&self) -> &'static str {
        match self {
            BackupKind::BlobStorage => "blob_storage_backups",
            BackupKind::ManagedDisk => "managed_disk_backups",
            BackupKind::PostgresqlFlexibleServer => "postgresql_flexible_server_backups",
        }
    }

    /// Roles the vault's managed identity must hold for this kind of backup.
    pub fn required_roles(&self) -> &'static [RoleRequirement] {
        match self {
            BackupKind::BlobStorage => &[RoleRequirement {
                role_name: "Storage Account Backup Contributor",
                scope: RoleScope::Source,
            }],
            BackupKind::ManagedDisk => &[
                RoleRequirement {
                    role_name: "Disk Backup Reader",
                    scope: RoleScope::Source,
                },
                RoleRequirement {
                    role_name: "Disk Snapshot Contributor",
                    scope: RoleScope::SnapshotResourceGroup,
                },
            ],
            BackupKind::PostgresqlFlexibleServer => &[
                RoleRequirement {
                    role_name: "Reader",
                    scope: RoleScope::SourceResourceGroup,
                },
                RoleRequirement {
                    role_name: "PostgreSQL Flexible Server Long Term Retention Backup Role",
                    scope: RoleScope::Source,
                },
            ],
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Where a required role assignment is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope {
    /// The protected resource itself.
    Source,
    /// The resource group containing the protected resource.
    SourceResourceGroup,
    /// The resource group disk snapshots are written to.
    SnapshotResourceGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleRequirement {
    pub role_name: &'static str,
    pub scope: RoleScope,
}

// ── Backups ───────────────────────────────────────────────────────────────────

/// A resource group referenced by both id and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupRef {
    pub id: String,
    pub name: String,
}

/// The data source a backup protects, with the ids Terraform needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupTarget {
    BlobStorage {
        storage_account_id: String,
        containers: Vec<String>,
    },
    ManagedDisk {
        disk_id: String,
        snapshot_resource_group: ResourceGroupRef,
    },
    PostgresqlFlexibleServer {
        server_id: String,
        server_resource_group_id: String,
    },
}

impl BackupTarget {
    pub fn kind(&self) -> BackupKind {
        match self {
            BackupTarget::BlobStorage { .. } => BackupKind::BlobStorage,
            BackupTarget::ManagedDisk { .. } => BackupKind::ManagedDisk,
            BackupTarget::PostgresqlFlexibleServer { .. } => BackupKind::PostgresqlFlexibleServer,
        }
    }

    /// ARM id of the protected resource.
    pub fn source_id(&self) -> &str {
        match self {
            BackupTarget::BlobStorage { storage_account_id, .. } => storage_account_id,
            BackupTarget::ManagedDisk { disk_id, .. } => disk_id,
            BackupTarget::PostgresqlFlexibleServer { server_id, .. } => server_id,
        }
    }

    /// Resolve a [`RoleScope`] to the ARM id it designates for this target.
    pub fn scope(&self, scope: RoleScope) -> String {
        match (self, scope) {
            (_, RoleScope::Source) => self.source_id().to_string(),
            (
                BackupTarget::ManagedDisk { snapshot_resource_group, .. },
                RoleScope::SnapshotResourceGroup,
            ) => snapshot_resource_group.id.clone(),
            (
                BackupTarget::PostgresqlFlexibleServer { server_resource_group_id, .. },
                RoleScope::SourceResourceGroup,
            ) => server_resource_group_id.clone(),
            (_, RoleScope::SourceResourceGroup | RoleScope::SnapshotResourceGroup) => {
                parent_resource_group_id(self.source_id())
            }
        }
    }
}

/// One configured backup: what to protect, how often and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSpec {
    /// Key in the Terraform map variable, e.g. `backup1`.
    pub key: String,
    pub backup_name: String,
    /// ISO-8601 duration, e.g. `P7D`.
    pub retention_period: String,
    /// ISO-8601 repeating intervals, e.g. `R/2024-01-01T00:00:00+00:00/P1D`.
    pub backup_intervals: Vec<String>,
    pub target: BackupTarget,
}

impl BackupSpec {
    pub fn kind(&self) -> BackupKind {
        self.target.kind()
    }

    /// The attribute map Terraform expects for this backup.
    pub fn tf_attributes(&self) -> Value {
        let mut attrs = Map::new();
        attrs.insert("backup_name".into(), json!(self.backup_name));
        attrs.insert("retention_period".into(), json!(self.retention_period));
        attrs.insert("backup_intervals".into(), json!(self.backup_intervals));
        match &self.target {
            BackupTarget::BlobStorage { storage_account_id, containers } => {
                attrs.insert("storage_account_id".into(), json!(storage_account_id));
                attrs.insert("storage_account_containers".into(), json!(containers));
            }
            BackupTarget::ManagedDisk { disk_id, snapshot_resource_group } => {
                attrs.insert("managed_disk_id".into(), json!(disk_id));
                attrs.insert(
                    "managed_disk_resource_group".into(),
                    json!({ "id": snapshot_resource_group.id, "name": snapshot_resource_group.name }),
                );
            }
            BackupTarget::PostgresqlFlexibleServer { server_id, server_resource_group_id } => {
                attrs.insert("server_id".into(), json!(server_id));
                attrs.insert("server_resource_group_id".into(), json!(server_resource_group_id));
            }
        }
        Value::Object(attrs)
    }
}

/// Build the `<kind>_backups` Terraform variable for a set of backups.
pub fn backups_variable(backups: &[BackupSpec]) -> Value {
    let map: Map<String, Value> = backups
        .iter()
        .map(|b| (b.key.clone(), b.tf_attributes()))
        .collect();
    Value::Object(map)
}

/// `/subscriptions/s/resourceGroups/rg/providers/...` → `/subscriptions/s/resourceGroups/rg`.
///
/// Returns the input unchanged when it does not contain a resource group segment.
pub fn parent_resource_group_id(resource_id: &str) -> String {
    let segments: Vec<&str> = resource_id.split('/').collect();
    match segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("resourceGroups"))
    {
        Some(i) if i + 1 < segments.len() => segments[..=i + 1].join("/"),
        _ => resource_id.to_string(),
    }
}

/// Last path segment of an ARM id (the resource name).
pub fn resource_name_from_id(resource_id: &str) -> &str {
    resource_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource_id)
}
