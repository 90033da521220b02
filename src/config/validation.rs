// src/config/validation.rs

use crate::config::{AppConfig, ProviderConfig};
use crate::error::{AppError, Result};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_settings(config) {
            warn!("Settings validation failed: {}", e);
            return Err(e);
        }
        debug!("Settings validation passed");

        if let Err(e) = Self::validate_providers(config) {
            warn!("Provider validation failed: {}", e);
            return Err(e);
        }
        debug!("Provider validation passed");

        if let Err(e) = Self::validate_schedule(config) {
            warn!("Schedule validation failed: {}", e);
            return Err(e);
        }
        debug!("Schedule validation passed");

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_settings(config: &AppConfig) -> Result<()> {
        if config.request_timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Request timeout cannot be 0",
                Some("request_timeout_secs"),
            ));
        }

        if config.failure_threshold == 0 {
            return Err(AppError::config_validation(
                "Failure threshold must be at least 1",
                Some("failure_threshold"),
            ));
        }

        if config.cache_max_entries == 0 {
            return Err(AppError::config_validation(
                "Cache capacity cannot be 0",
                Some("cache_max_entries"),
            ));
        }

        Ok(())
    }

    fn validate_providers(config: &AppConfig) -> Result<()> {
        debug!("Validating {} providers", config.providers.len());

        if config.providers.is_empty() {
            return Err(AppError::config_validation(
                "At least one provider must be configured",
                Some("providers"),
            ));
        }

        let mut names = HashSet::new();
        for provider in &config.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::config_validation(
                    "Provider name cannot be empty",
                    Some("providers.name"),
                ));
            }

            if !names.insert(provider.name.as_str()) {
                return Err(AppError::config_validation(
                    format!("Duplicate provider name: {}", provider.name),
                    Some("providers.name"),
                ));
            }

            Self::validate_provider(provider)?;
        }

        Ok(())
    }

    fn validate_provider(provider: &ProviderConfig) -> Result<()> {
        if let Some(base_url) = &provider.base_url {
            Url::parse(base_url).map_err(|e| {
                AppError::config_validation(
                    format!("Invalid base_url for provider '{}': {} - {}", provider.name, base_url, e),
                    Some("providers.base_url"),
                )
            })?;
        }

        if provider.burst_window_secs == 0 {
            return Err(AppError::config_validation(
                format!("Burst window for provider '{}' cannot be 0", provider.name),
                Some("providers.burst_window_secs"),
            ));
        }

        let limits = provider.limits;
        for (window, limit) in [
            ("burst", limits.burst),
            ("minute", limits.minute),
            ("hour", limits.hour),
            ("day", limits.day),
        ] {
            if limit == Some(0) {
                warn!(
                    provider = %provider.name,
                    window,
                    "Window limit is 0; every call will be denied for this window"
                );
            }
        }

        if let (Some(minute), Some(hour)) = (limits.minute, limits.hour) {
            if hour < minute {
                warn!(provider = %provider.name, minute, hour, "Hourly limit is below the per-minute limit");
            }
        }

        let mut secrets = HashSet::new();
        for credential in &provider.credentials {
            let secret = credential.secret.expose_secret();
            if secret.trim().is_empty() {
                return Err(AppError::config_validation(
                    format!("Empty credential configured for provider '{}'", provider.name),
                    Some("providers.credentials"),
                ));
            }
            if !secrets.insert(secret.as_str()) {
                return Err(AppError::config_validation(
                    format!(
                        "Duplicate credential {} for provider '{}'",
                        crate::credentials::preview(secret),
                        provider.name
                    ),
                    Some("providers.credentials"),
                ));
            }
        }

        if provider.credentials.is_empty() {
            warn!(provider = %provider.name, "Provider has no credentials configured");
        }

        Ok(())
    }

    fn validate_schedule(config: &AppConfig) -> Result<()> {
        for job in &config.schedule {
            if job.interval_secs == 0 {
                return Err(AppError::config_validation(
                    format!("Schedule '{}' has a zero interval", job.name),
                    Some("schedule.interval_secs"),
                ));
            }
            if job.providers.is_empty() {
                return Err(AppError::config_validation(
                    format!("Schedule '{}' names no providers", job.name),
                    Some("schedule.providers"),
                ));
            }
            if let Some(unknown) = job.providers.iter().find(|p| config.provider(p).is_none()) {
                return Err(AppError::config_validation(
                    format!("Schedule '{}' references unknown provider '{}'", job.name, unknown),
                    Some("schedule.providers"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderLimits, ScheduleConfig};
    use std::collections::BTreeMap;

    fn valid_config() -> AppConfig {
        AppConfig {
            providers: vec![ProviderConfig::new(
                "odds",
                ProviderLimits {
                    minute: Some(5),
                    ..Default::default()
                },
            )
            .with_credential("key-one-123456", 1)],
            ..Default::default()
        }
    }

    fn field_of(err: AppError) -> Option<String> {
        match err {
            AppError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn accepts_minimal_config() {
        assert!(ConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let mut config = valid_config();
        config.providers.push(config.providers[0].clone());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("providers.name"));
    }

    #[test]
    fn rejects_bad_base_url() {
        let mut config = valid_config();
        config.providers[0].base_url = Some("not a url".into());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("providers.base_url"));
    }

    #[test]
    fn rejects_duplicate_secrets() {
        let mut config = valid_config();
        config.providers[0] = config.providers[0].clone().with_credential("key-one-123456", 2);
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("providers.credentials"));
    }

    #[test]
    fn zero_limit_is_accepted() {
        let mut config = valid_config();
        config.providers[0].limits.day = Some(0);
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn rejects_schedule_for_unknown_provider() {
        let mut config = valid_config();
        config.schedule.push(ScheduleConfig {
            name: "odds-refresh".into(),
            data_type: "odds".into(),
            providers: vec!["missing".into()],
            interval_secs: 900,
            params: BTreeMap::new(),
        });
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("schedule.providers"));
    }
}
