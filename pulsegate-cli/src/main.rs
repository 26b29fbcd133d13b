use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulsegate::{Config, ConfigError, DashboardView, MonitoringController};
use std::path::PathBuf;
use std::time::Duration;

mod doctor;
mod render;

#[derive(clap::Parser, Debug)]
#[clap(version, about = "Terminal front end for the pulsegate telemetry pipeline")]
struct Args {
    /// Base URL of the telemetry backend (overrides config and PULSEGATE_URL)
    #[clap(long, global = true)]
    url: Option<String>,

    /// Bearer token for the backend (overrides config and PULSEGATE_TOKEN)
    #[clap(long, global = true)]
    token: Option<String>,

    /// Path to a pulsegate.toml; errors in it are fatal
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colorized output
    #[clap(long, global = true)]
    no_color: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run one poll cycle and print the dashboard (default)
    Once {
        /// Print the view as JSON instead
        #[clap(long)]
        json: bool,
    },
    /// Keep monitoring until Ctrl-C, printing after every cycle
    Watch,
    /// Check every backend endpoint and the live stream
    Doctor,
}

/// Resolve the config. A broken default/`$PULSEGATE_CONFIG` file falls back
/// to defaults and is returned as a warning for after logger setup; an
/// explicit `--config` file must parse.
fn load_config(args: &Args) -> Result<(Config, Option<ConfigError>)> {
    let (mut config, problem) = match &args.config {
        Some(path) => {
            let mut config = Config::from_path(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            config.apply_env();
            (config, None)
        }
        None => Config::load_lenient(),
    };
    if let Some(url) = &args.url {
        config.backend.base_url = url.clone();
    }
    if let Some(token) = &args.token {
        config.backend.token = Some(token.clone());
    }
    config.validate().context("invalid configuration")?;
    Ok((config, problem))
}

/// Start a controller, wait for its first applied cycle, and stop it again.
pub(crate) async fn first_view(config: Config) -> Result<DashboardView> {
    let grace = config.polling.fetch_timeout() + Duration::from_secs(5);
    let mut controller =
        MonitoringController::new(config).context("failed to build HTTP client")?;
    let mut cycles = controller.cycles();

    controller.start();
    tokio::time::timeout(grace, cycles.changed())
        .await
        .context("timed out waiting for the first poll cycle")?
        .context("controller shut down before the first cycle")?;
    let view = controller.view();
    controller.stop();
    Ok(view)
}

async fn run_watch(config: Config) -> Result<()> {
    let mut controller =
        MonitoringController::new(config).context("failed to build HTTP client")?;
    let mut cycles = controller.cycles();
    controller.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("[controller] interrupted");
                break;
            }
            changed = cycles.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", render::format_view(&controller.view()));
            }
        }
    }

    controller.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, problem) = load_config(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    if let Some(err) = problem {
        log::warn!("[config] {err}; using defaults");
    }

    if args.no_color {
        colored::control::set_override(false);
    }

    match args.command.clone().unwrap_or(Command::Once { json: false }) {
        Command::Once { json } => {
            let view = first_view(config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("{}", render::format_view(&view));
            }
        }
        Command::Watch => run_watch(config).await?,
        Command::Doctor => doctor::run_doctor(config).await?,
    }

    Ok(())
}
