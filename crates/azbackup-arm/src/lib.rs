pub mod authorization;
pub mod client;
pub mod dataprotection;
pub mod error;
pub mod monitor;
pub mod pager;
pub mod poller;
pub mod resource_groups;
pub mod token;
pub mod workloads;

pub use authorization::{RoleAssignments, RoleDefinitions};
pub use client::{ArmClient, ArmResponse, BaseUrls, RetryPolicy};
pub use dataprotection::{BackupInstances, BackupJobs, BackupPolicies, BackupVaults};
pub use error::ArmError;
pub use monitor::DiagnosticSettings;
pub use pager::Pager;
pub use poller::{Operation, PollConfig, PollMode, Poller};
pub use resource_groups::ResourceGroups;
pub use token::{
    token_provider, AzureCliTokenProvider, ServicePrincipalTokenProvider, StaticToken, TokenProvider,
    MANAGEMENT_SCOPE, STORAGE_SCOPE,
};
pub use workloads::{blob_endpoint, Workloads};
