//! Localchat - chat with a model running on your machine

use std::path::PathBuf;

use clap::Parser;
use localchat::cli;
use localchat::config::{AppConfig, XdgDirs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Localchat - chat with a locally hosted language model
#[derive(Parser, Debug)]
#[command(name = "localchat")]
#[command(version, about, long_about = None)]
struct Args {
    /// Execute a single prompt and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Model to chat with
    #[arg(short, long, env = "LOCALCHAT_MODEL")]
    model: Option<String>,

    /// Base URL of the inference engine
    #[arg(long, env = "LOCALCHAT_URL")]
    url: Option<String>,

    /// API key sent to the engine as a bearer token
    #[arg(long, env = "LOCALCHAT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    run_cli(args)
}

fn load_config(args: &Args, dirs: &XdgDirs) -> anyhow::Result<AppConfig> {
    let path = args.config.clone().unwrap_or_else(|| dirs.config_file());
    let mut config = AppConfig::load_from(&path)?;

    if let Some(model) = &args.model {
        config.model_id = model.clone();
    }
    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Run the CLI/REPL application
fn run_cli(args: Args) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let default_filter = if args.verbose {
            "trace"
        } else if args.debug {
            "debug"
        } else {
            "warn" // Quiet by default for normal use
        };

        // Initialize tracing with stderr output
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        if args.debug || args.verbose {
            tracing::info!("Debug logging enabled");
        }

        let dirs = XdgDirs::new();
        let config = load_config(&args, &dirs)?;

        if let Some(prompt) = &args.prompt {
            cli::runner::run_single_prompt(&config, prompt).await?;
        } else {
            let history = match dirs.ensure_dirs() {
                Ok(()) => Some(dirs.history_file()),
                Err(e) => {
                    tracing::warn!(error = %e, "state directory unavailable, history disabled");
                    None
                }
            };
            cli::runner::run_interactive(&config, history).await?;
        }

        Ok(())
    })
}
