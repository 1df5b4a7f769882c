use std::collections::HashSet;
use std::path::Path;

use azbackup_domain::{BackupKind, ImmutabilityState, Redundancy};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawBackup, RawScenario, RawScenarioFile};
use crate::scenario::{BackupTemplate, Scenario, VaultNaming};

/// Read and validate a scenario table.
///
/// ```text
/// scenarios:
///   - name: blob-backups
///     location: uksouth
///     redundancy: LocallyRedundant
///     backups:
///       - kind: blob_storage
///         name: blob1
///         retention_period: P7D
///         backup_intervals: ["R/2024-01-01T00:00:00+00:00/P1D"]
/// ```
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_scenarios(&content, path)
}

/// Parse a scenario table already in memory. `path` is only used in errors.
pub fn parse_scenarios(content: &str, path: &Path) -> Result<Vec<Scenario>, ConfigError> {
    let raw: RawScenarioFile = serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut seen = HashSet::new();
    let mut scenarios = Vec::with_capacity(raw.scenarios.len());
    for raw_scenario in raw.scenarios {
        if !seen.insert(raw_scenario.name.clone()) {
            return Err(conversion(path, format!("duplicate scenario '{}'", raw_scenario.name)));
        }
        scenarios.push(convert_scenario(raw_scenario, path)?);
    }
    debug!(count = scenarios.len(), "loaded scenarios from {}", path.display());
    Ok(scenarios)
}

fn convert_scenario(raw: RawScenario, path: &Path) -> Result<Scenario, ConfigError> {
    if raw.name.trim().is_empty() {
        return Err(conversion(path, "scenario name must not be empty".into()));
    }
    let redundancy: Redundancy = raw.redundancy.parse()?;
    let immutability = raw
        .immutability
        .as_deref()
        .map(str::parse::<ImmutabilityState>)
        .transpose()?;
    let naming = match raw.naming.as_deref() {
        None | Some("standard") => VaultNaming::Standard,
        Some("legacy") => VaultNaming::Legacy,
        Some(other) => {
            return Err(conversion(
                path,
                format!("scenario '{}': unknown naming '{}'", raw.name, other),
            ))
        }
    };

    let mut backup_names = HashSet::new();
    let mut backups = Vec::with_capacity(raw.backups.len());
    for b in raw.backups {
        let template = convert_backup(b, &raw.name, path)?;
        if !backup_names.insert((template.kind, template.name.clone())) {
            return Err(conversion(
                path,
                format!("scenario '{}': duplicate {} backup '{}'", raw.name, template.kind, template.name),
            ));
        }
        backups.push(template);
    }

    if raw.immutability_workflow {
        if naming == VaultNaming::Legacy {
            return Err(conversion(
                path,
                format!("scenario '{}': the immutability workflow needs standard naming", raw.name),
            ));
        }
        if !backups.iter().any(|b| b.kind == BackupKind::BlobStorage) {
            return Err(conversion(
                path,
                format!("scenario '{}': the immutability workflow needs a blob_storage backup", raw.name),
            ));
        }
    }

    Ok(Scenario {
        name: raw.name,
        location: raw.location,
        redundancy,
        naming,
        create_resource_group: raw.create_resource_group,
        tags: raw.tags,
        immutability,
        diagnostics: raw.diagnostics,
        verify_outputs: raw.verify_outputs,
        check_idempotence: raw.check_idempotence,
        immutability_workflow: raw.immutability_workflow,
        backups,
    })
}

fn convert_backup(raw: RawBackup, scenario: &str, path: &Path) -> Result<BackupTemplate, ConfigError> {
    let kind = parse_kind(&raw.kind, path)?;
    if raw.name.trim().is_empty() {
        return Err(conversion(path, format!("scenario '{}': backup name must not be empty", scenario)));
    }
    if !raw.retention_period.starts_with('P') {
        return Err(conversion(
            path,
            format!(
                "scenario '{}': retention period '{}' is not an ISO-8601 duration",
                scenario, raw.retention_period
            ),
        ));
    }
    if raw.backup_intervals.is_empty() {
        return Err(conversion(
            path,
            format!("scenario '{}': backup '{}' has no backup intervals", scenario, raw.name),
        ));
    }
    if let Some(bad) = raw.backup_intervals.iter().find(|i| !i.starts_with("R/")) {
        return Err(conversion(
            path,
            format!("scenario '{}': '{}' is not a repeating interval", scenario, bad),
        ));
    }

    Ok(BackupTemplate {
        kind,
        name: raw.name,
        retention_period: raw.retention_period,
        backup_intervals: raw.backup_intervals,
    })
}

fn parse_kind(s: &str, path: &Path) -> Result<BackupKind, ConfigError> {
    match s {
        "blob_storage" | "blobstorage" => Ok(BackupKind::BlobStorage),
        "managed_disk" | "manageddisk" => Ok(BackupKind::ManagedDisk),
        "postgresql_flexible_server" | "pgflexserver" => Ok(BackupKind::PostgresqlFlexibleServer),
        other => Err(conversion(path, format!("unknown backup kind '{}'", other))),
    }
}

fn conversion(path: &Path, message: String) -> ConfigError {
    ConfigError::Conversion {
        path: path.display().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Vec<Scenario>, ConfigError> {
        parse_scenarios(yaml, Path::new("inline.yml"))
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let scenarios = parse("scenarios:\n  - name: basic\n").unwrap();
        let s = &scenarios[0];
        assert_eq!(s.location, "uksouth");
        assert_eq!(s.redundancy, Redundancy::LocallyRedundant);
        assert_eq!(s.naming, VaultNaming::Standard);
        assert!(s.create_resource_group);
        assert!(s.backups.is_empty());
        assert!(s.immutability.is_none());
    }

    #[test]
    fn unknown_redundancy_is_rejected() {
        let err = parse("scenarios:\n  - name: x\n    redundancy: Local\n").unwrap_err();
        assert!(matches!(err, ConfigError::Domain(_)), "got {:?}", err);
    }

    #[test]
    fn retention_must_be_a_duration() {
        let yaml = r#"
scenarios:
  - name: x
    backups:
      - kind: managed_disk
        name: disk1
        retention_period: 7 days
        backup_intervals: ["R/2024-01-01T00:00:00+00:00/PT4H"]
"#;
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("retention period"), "got {}", err);
    }

    #[test]
    fn intervals_must_repeat() {
        let yaml = r#"
scenarios:
  - name: x
    backups:
      - kind: managed_disk
        name: disk1
        retention_period: P7D
        backup_intervals: ["2024-01-01T00:00:00+00:00/PT4H"]
"#;
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn duplicate_scenario_names_are_rejected() {
        let err = parse("scenarios:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(err.to_string().contains("duplicate scenario"), "got {}", err);
    }

    #[test]
    fn duplicate_backup_names_within_a_kind_are_rejected() {
        let yaml = r#"
scenarios:
  - name: x
    backups:
      - { kind: blob_storage, name: b, retention_period: P7D, backup_intervals: ["R/2024-01-01T00:00:00+00:00/P1D"] }
      - { kind: blob_storage, name: b, retention_period: P7D, backup_intervals: ["R/2024-01-01T00:00:00+00:00/P1D"] }
"#;
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn immutability_workflow_needs_a_blob_backup() {
        let yaml = "scenarios:\n  - name: x\n    immutability: Unlocked\n    immutability_workflow: true\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("blob_storage"), "got {}", err);
    }
}
