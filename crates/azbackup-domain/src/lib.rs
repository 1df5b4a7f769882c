pub mod error;
pub mod naming;
pub mod policy;
pub mod resources;
pub mod types;


pub use error::DomainError;
pub use policy::{
    AbsoluteDeleteOption, AdhocTrigger, BackupPolicy, BackupPolicyResource, BackupRule,
    BackupSchedule, BasePolicy, DataStoreInfo, DeleteOption, PolicyRule, RetentionRule,
    ScheduleTrigger, SourceLifeCycle, Trigger, BACKUP_INTERVALS_RULE, DEFAULT_RETENTION_RULE,
};
pub use resources::*;
pub use types::*;
