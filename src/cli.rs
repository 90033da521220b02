// src/cli.rs

use crate::clock::{SharedClock, SystemClock};
use crate::config::{load_config, AppConfig, ProviderLimits};
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::quota::{QuotaTracker, WindowStatus};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "sports-governor",
    version,
    about = "Quota, credential and cache governance for rate-limited sports data APIs",
    long_about = "Operator tooling for the sports data governor: validates provider configuration, \
                  shows configured quotas and credentials, and generates example configuration."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml", env = "SPORTS_GOVERNOR_CONFIG")]
    pub config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "SPORTS_GOVERNOR_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate (defaults to --config)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Show detailed validation output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List configured providers with their limits and credentials
    Providers,

    /// Generate example configuration file
    GenerateConfig {
        /// Output file path; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

pub const EXAMPLE_CONFIG: &str = r#"# Sports data governor configuration
request_timeout_secs: 15
failure_threshold: 3
cooldown_secs: 300
max_history: 1000
cache_max_entries: 10000

# Per data type overrides, in seconds
cache_ttl_secs:
  live_games: 30
  odds: 120
max_age_secs:
  odds: 120
  teams: 1800

providers:
  - name: odds
    base_url: https://api.odds.example.com/v4
    limits: { minute: 5, hour: 100, day: 500, burst: 2 }
    burst_window_secs: 1
    credentials:
      - { secret: "replace-with-primary-key", priority: 1 }
      - { secret: "replace-with-backup-key", priority: 2 }
  - name: stats
    base_url: https://api.stats.example.com
    limits: { minute: 30, day: 7500 }
    credentials:
      - { secret: "replace-with-stats-key" }

schedule:
  - { name: teams-daily, data_type: teams, providers: [stats], interval_secs: 86400 }
  - { name: schedules-hourly, data_type: scheduled_games, providers: [stats], interval_secs: 3600 }
  - name: odds-refresh
    data_type: odds
    providers: [odds, stats]
    interval_secs: 900
    params: { league: nba }
"#;

fn describe_limits(limits: &ProviderLimits) -> String {
    let parts: Vec<String> = [
        ("burst", limits.burst),
        ("minute", limits.minute),
        ("hour", limits.hour),
        ("day", limits.day),
    ]
    .into_iter()
    .filter_map(|(name, limit)| limit.map(|l| format!("{name}={l}")))
    .collect();
    if parts.is_empty() {
        "unlimited".to_string()
    } else {
        parts.join(", ")
    }
}

fn describe_window(name: &str, window: Option<WindowStatus>) -> Option<String> {
    window.map(|w| format!("{name} {}/{} (resets in {}s)", w.used, w.limit, w.reset_in.as_secs()))
}

/// Loads and validates a configuration file, returning a printable summary.
pub fn validate_command(path: &Path, verbose: bool) -> Result<String> {
    let config = load_config(path)?;
    let mut out = String::new();
    writeln!(out, "Configuration is valid: {}", path.display())?;
    writeln!(
        out,
        "{} provider(s), {} scheduled job(s)",
        config.providers.len(),
        config.schedule.len()
    )?;
    if verbose {
        writeln!(
            out,
            "request timeout {}s, failure threshold {}, cool-down {}s",
            config.request_timeout_secs, config.failure_threshold, config.cooldown_secs
        )?;
        for provider in &config.providers {
            writeln!(
                out,
                "  {}: {} [{} credential(s)]",
                provider.name,
                describe_limits(&provider.limits),
                provider.credentials.len()
            )?;
        }
        for job in &config.schedule {
            writeln!(
                out,
                "  job {}: {} every {}s via {}",
                job.name,
                job.data_type,
                job.interval_secs,
                job.providers.join(", ")
            )?;
        }
    }
    Ok(out)
}

/// Provider table with a quota snapshot for each.
pub fn providers_command(config: &AppConfig) -> Result<String> {
    let clock: SharedClock = Arc::new(SystemClock);
    let registry = ProviderRegistry::from_config(config, Arc::clone(&clock));
    let quota = QuotaTracker::new(clock);
    let mut out = String::new();
    for name in registry.names() {
        let provider = registry.get(&name)?;
        quota.register(&provider.name, &provider.limits, provider.burst_window);
        let status = quota.status(&name)?;
        let credentials = config.provider(&name).map_or(0, |p| p.credentials.len());
        let windows: Vec<String> = [
            describe_window("burst", status.burst),
            describe_window("minute", status.minute),
            describe_window("hour", status.hour),
            describe_window("day", status.day),
        ]
        .into_iter()
        .flatten()
        .collect();
        writeln!(
            out,
            "{name}\t{}\t{credentials} credential(s)\t{}",
            provider.base_url.as_deref().unwrap_or("-"),
            if windows.is_empty() { "unlimited".to_string() } else { windows.join("; ") }
        )?;
    }
    Ok(out)
}
