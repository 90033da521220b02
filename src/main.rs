// src/main.rs

use anyhow::Context;
use sports_data_governor::cli::{providers_command, validate_command, Cli, Commands, EXAMPLE_CONFIG};
use sports_data_governor::config::load_config;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(log_level: &str, json: bool) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Validate { file, verbose } => {
            let path = file.unwrap_or(cli.config);
            let summary = validate_command(&path, verbose)
                .with_context(|| format!("configuration {} is invalid", path.display()))?;
            print!("{summary}");
        }
        Commands::Providers => {
            let config = load_config(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            print!("{}", providers_command(&config)?);
        }
        Commands::GenerateConfig { output } => match output {
            Some(path) => {
                std::fs::write(&path, EXAMPLE_CONFIG)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "Example configuration written");
            }
            None => print!("{EXAMPLE_CONFIG}"),
        },
    }
    Ok(())
}
