// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{AppConfig, CredentialConfig, ProviderConfig, ProviderLimits, ScheduleConfig};
pub use loader::{load_config, override_with_env, parse_config};
pub use validation::ConfigValidator;
