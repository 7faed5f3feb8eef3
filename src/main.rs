//! easygpt - streaming chat-completion relay
//!
//! Serves prompt endpoints backed by OpenAI, Azure OpenAI or OpenRouter and
//! relays streamed completions to browser clients.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easygpt::config::{Config, KeySource};
use easygpt::proxy::{run_server, AppState};

#[derive(Parser)]
#[command(name = "easygpt")]
#[command(about = "Streaming chat-completion relay for OpenAI, Azure OpenAI and OpenRouter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Print a provider's model list (served from cache when present)
    Models {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Provider name (defaults to the configured default)
        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easygpt=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut cfg, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_sources) = Config::from_file_with_env(&config)?;
            println!("Configuration '{}' is valid", config);
            println!("  listen:    {}", cfg.server.listen);
            println!("  cache dir: {}", cfg.cache.dir.display());
            println!("  framing:   {:?}", cfg.relay.framing);
            for (name, source) in &key_sources {
                println!("  provider '{}': api key {}", name, source);
            }
            Ok(())
        }

        Commands::Providers { config } => {
            let cfg = Config::from_file(&config)?;
            let default = cfg.default_provider().map(str::to_string);
            for provider in &cfg.providers {
                let marker = if default.as_deref() == Some(provider.name.as_str()) {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "{}{}  kind={}  url={}",
                    provider.name,
                    marker,
                    provider.kind,
                    provider.url.as_deref().unwrap_or("<default>")
                );
            }
            Ok(())
        }

        Commands::Models { config, provider } => {
            let cfg = Config::from_file(&config)?;
            let state = AppState::from_config(&cfg)?;
            let provider = state.providers.get(provider.as_deref())?;
            // The runtime ends with this command, so refresh in place.
            let models = provider.list_models_inline().await?;
            println!("{}", serde_json::to_string_pretty(&models)?);
            Ok(())
        }
    }
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (name, source) in key_sources {
        if *source == KeySource::None {
            tracing::warn!(provider = %name, "No API key configured");
        } else {
            tracing::info!(provider = %name, source = %source, "Resolved API key");
        }
    }
}
