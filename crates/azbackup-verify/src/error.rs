use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("config error: {0}")]
    Config(#[from] azbackup_config::ConfigError),

    #[error("control plane error: {0}")]
    Arm(#[from] azbackup_arm::ArmError),

    #[error("terraform error: {0}")]
    Terraform(#[from] azbackup_terraform::TerraformError),

    #[error("domain error: {0}")]
    Domain(#[from] azbackup_domain::DomainError),

    #[error("setup error: {0}")]
    Setup(String),
}
