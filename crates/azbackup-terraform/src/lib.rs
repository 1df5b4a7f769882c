mod error;
mod options;
mod terraform;
mod workdir;

pub use error::TerraformError;
pub use options::{BackendConfig, TerraformOptions, OPTIONS_FILE, VARS_FILE};
pub use terraform::{PlanOutcome, Terraform};
pub use workdir::copy_module_to_temp;
