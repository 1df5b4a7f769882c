mod defaults;
mod env;
mod loader;
mod raw;
mod scenario;
pub mod error;

pub use defaults::builtin_scenarios;
pub use env::{Environment, StateLocation};
pub use error::ConfigError;
pub use loader::{load_scenarios, parse_scenarios};
pub use scenario::{BackupTemplate, Scenario, VaultNaming};
