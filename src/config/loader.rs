// src/config/loader.rs

use crate::config::{AppConfig, ConfigValidator, CredentialConfig, ProviderConfig, ProviderLimits};
use crate::error::{AppError, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use tracing::{debug, info, warn};

// Environment variable constants
const ENV_VAR_PREFIX: &str = "SPORTS_GOVERNOR_PROVIDER_";
const API_KEYS_SUFFIX: &str = "_API_KEYS";
const ENV_REQUEST_TIMEOUT: &str = "SPORTS_GOVERNOR_REQUEST_TIMEOUT_SECS";
const ENV_FAILURE_THRESHOLD: &str = "SPORTS_GOVERNOR_FAILURE_THRESHOLD";

/// Load configuration from file, apply environment overrides, then validate.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        AppConfig::default()
    };

    override_with_env(&mut config, std::env::vars());

    ConfigValidator::validate(&config)?;

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

/// Parse a configuration document without touching the environment.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    if contents.trim().is_empty() {
        warn!("Configuration document is empty. Using defaults.");
        return Ok(AppConfig::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}

fn load_from_file(config_path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|_| AppError::ConfigNotFound {
        path: config_path.display().to_string(),
    })?;
    parse_config(&content)
}

/// Extracts the provider name from `SPORTS_GOVERNOR_PROVIDER_{NAME}_API_KEYS`.
fn extract_provider_name(env_key: &str) -> Option<String> {
    env_key
        .strip_prefix(ENV_VAR_PREFIX)?
        .strip_suffix(API_KEYS_SUFFIX)
        .filter(|name| !name.is_empty())
        .map(|name| name.to_ascii_lowercase())
}

/// Applies environment overrides. Takes the variables explicitly so tests can feed their own.
pub fn override_with_env<I>(config: &mut AppConfig, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if key == ENV_REQUEST_TIMEOUT {
            match value.trim().parse::<u64>() {
                Ok(secs) => {
                    info!("Overriding request timeout from environment: {}s", secs);
                    config.request_timeout_secs = secs;
                }
                Err(_) => warn!("Invalid {} environment variable: {}", ENV_REQUEST_TIMEOUT, value),
            }
        } else if key == ENV_FAILURE_THRESHOLD {
            match value.trim().parse::<u32>() {
                Ok(threshold) => {
                    info!("Overriding failure threshold from environment: {}", threshold);
                    config.failure_threshold = threshold;
                }
                Err(_) => warn!("Invalid {} environment variable: {}", ENV_FAILURE_THRESHOLD, value),
            }
        } else if let Some(provider_name) = extract_provider_name(&key) {
            let secrets: Vec<String> = value
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if secrets.is_empty() {
                warn!(provider = %provider_name, "Environment variable '{}' has no usable keys. Ignoring.", key);
                continue;
            }

            let provider = match config.providers.iter().position(|p| p.name == provider_name) {
                Some(index) => &mut config.providers[index],
                None => {
                    info!(provider = %provider_name, "Creating provider from environment variables without limits.");
                    config
                        .providers
                        .push(ProviderConfig::new(provider_name.clone(), ProviderLimits::default()));
                    let last = config.providers.len() - 1;
                    &mut config.providers[last]
                }
            };

            let base_priority = provider.credentials.len() as u32;
            let mut added = 0usize;
            for (offset, secret) in secrets.into_iter().enumerate() {
                if provider
                    .credentials
                    .iter()
                    .any(|c| c.secret.expose_secret() == &secret)
                {
                    continue;
                }
                provider.credentials.push(CredentialConfig {
                    secret: SecretString::new(secret),
                    priority: Some(base_priority + offset as u32 + 1),
                });
                added += 1;
            }
            info!(provider = %provider_name, added, "Loaded credentials from environment");
        }
    }
}
