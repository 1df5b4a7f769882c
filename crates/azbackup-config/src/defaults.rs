use std::collections::BTreeMap;

use azbackup_domain::{BackupKind, ImmutabilityState, Redundancy};

use crate::scenario::{BackupTemplate, Scenario, VaultNaming};

const LOCATION: &str = "uksouth";
const DAILY: &str = "R/2024-01-01T00:00:00+00:00/P1D";
const EVERY_OTHER_DAY: &str = "R/2024-01-01T00:00:00+00:00/P2D";
const FOUR_HOURLY: &str = "R/2024-01-01T00:00:00+00:00/PT4H";

fn base(name: &str) -> Scenario {
    Scenario {
        name: name.to_string(),
        location: LOCATION.to_string(),
        redundancy: Redundancy::LocallyRedundant,
        naming: VaultNaming::Standard,
        create_resource_group: true,
        tags: BTreeMap::new(),
        immutability: None,
        diagnostics: false,
        verify_outputs: false,
        check_idempotence: false,
        immutability_workflow: false,
        backups: Vec::new(),
    }
}

fn backup(kind: BackupKind, name: &str, retention: &str, intervals: &[&str]) -> BackupTemplate {
    BackupTemplate {
        kind,
        name: name.to_string(),
        retention_period: retention.to_string(),
        backup_intervals: intervals.iter().map(|s| s.to_string()).collect(),
    }
}

/// The scenario table run when no file is given.
pub fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            naming: VaultNaming::Legacy,
            check_idempotence: true,
            ..base("basic-deployment")
        },
        Scenario {
            create_resource_group: false,
            diagnostics: true,
            ..base("existing-resource-group")
        },
        Scenario {
            diagnostics: true,
            tags: [("environment", "test"), ("owner", "platform")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..base("diagnostic-settings")
        },
        Scenario {
            diagnostics: true,
            verify_outputs: true,
            ..base("terraform-outputs")
        },
        Scenario {
            backups: vec![
                backup(BackupKind::BlobStorage, "blob1", "P7D", &[DAILY]),
                backup(BackupKind::BlobStorage, "blob2", "P30D", &[EVERY_OTHER_DAY]),
            ],
            ..base("blob-storage-backup")
        },
        Scenario {
            backups: vec![
                backup(BackupKind::ManagedDisk, "disk1", "P7D", &[FOUR_HOURLY]),
                backup(BackupKind::ManagedDisk, "disk2", "P30D", &[DAILY]),
            ],
            ..base("managed-disk-backup")
        },
        Scenario {
            backups: vec![
                backup(BackupKind::PostgresqlFlexibleServer, "server1", "P7D", &[DAILY]),
                backup(BackupKind::PostgresqlFlexibleServer, "server2", "P30D", &[EVERY_OTHER_DAY]),
            ],
            ..base("postgresql-flexible-server-backup")
        },
        Scenario {
            immutability: Some(ImmutabilityState::Unlocked),
            immutability_workflow: true,
            backups: vec![backup(BackupKind::BlobStorage, "blob1", "P7D", &[DAILY])],
            ..base("vault-immutability")
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_names_are_unique() {
        let scenarios = builtin_scenarios();
        let names: HashSet<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), scenarios.len());
        assert_eq!(scenarios.len(), 8);
    }

    #[test]
    fn builtin_backups_are_well_formed() {
        for s in builtin_scenarios() {
            for b in &s.backups {
                assert!(b.retention_period.starts_with('P'), "{}: {}", s.name, b.retention_period);
                assert!(b.backup_intervals.iter().all(|i| i.starts_with("R/")));
            }
        }
    }

    #[test]
    fn immutability_scenario_has_a_blob_backup() {
        let s = builtin_scenarios()
            .into_iter()
            .find(|s| s.immutability_workflow)
            .unwrap();
        assert_eq!(s.immutability, Some(ImmutabilityState::Unlocked));
        assert_eq!(s.backups_of(BackupKind::BlobStorage).count(), 1);
    }
}
