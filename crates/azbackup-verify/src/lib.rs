//! End-to-end verification of the backup Terraform module against a live
//! subscription.

mod error;
mod fixtures;
mod immutability;
mod report;
mod runner;
mod verifier;

#[cfg(test)]
mod testing;

pub use error::VerifyError;
pub use fixtures::{ExternalResources, FixtureBuilder, StorageAccountFixture, TEST_CONTAINER};
pub use immutability::{ImmutabilityWorkflow, TEST_BLOB_NAME};
pub use report::{Mismatch, ScenarioReport, Stage, StageError, VerificationReport};
pub use runner::{terraform_vars, ScenarioNames, ScenarioRunner};
pub use verifier::{Verifier, EXPECTED_LOG_CATEGORIES, EXPECTED_METRIC_CATEGORIES};
