//! foodbot: a kitchen scale with a camera
//!
//! Press the button, and the item on the scale is weighed, photographed,
//! identified by a vision model and appended to a JSON food log. A small HTTP
//! API (and an MCP server) serve the log and turn it into recipe ideas.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// === Modules ===

mod actuators;
mod ai;
mod api;
mod app;
mod config;
mod error;
mod mcp;
mod pipeline;
mod sensors;
mod shared;
mod storage;

use ai::MealType;

// === CLI ===

#[derive(Parser)]
#[command(name = "foodbot", version)]
#[command(about = "Weigh, photograph, identify and log food; suggest recipes from the log")]
struct Cli {
    /// Config file (default: ~/.config/foodbot/config.toml)
    #[arg(long, global = true, env = "FOODBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the food log, photos and scale calibration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a simulated scale, camera and identifier
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture loop, button (or keyboard with --simulate) and HTTP API (default)
    Run,
    /// HTTP API only, no capturing
    Serve,
    /// Capture one item and print the log entry
    Capture,
    /// Zero the scale
    Tare,
    /// Tare, then calibrate against a known weight in grams
    Calibrate { grams: f64 },
    /// Identify the food in an image file
    Identify { image: PathBuf },
    /// Suggest full recipes from the food log
    Recipes {
        #[arg(long, default_value = "any")]
        meal_type: MealType,
        #[arg(long, default_value_t = ai::recipes::DEFAULT_SUGGESTIONS)]
        count: usize,
        /// Write the JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Short dish ideas with the grams each one needs
    Dishes {
        #[arg(long, default_value = "any")]
        meal_type: MealType,
    },
    /// Detailed recipe for one dish
    Recipe {
        #[arg(long)]
        name: String,
        /// JSON file mapping ingredient names to grams
        #[arg(long, conflicts_with = "input_json")]
        ingredients: Option<PathBuf>,
        /// Inline JSON mapping ingredient names to grams
        #[arg(long)]
        input_json: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the log and recipe tools over MCP (stdio)
    Mcp,
    /// Open the config file in your editor
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::Config = command {
        return run_config_command(cli.config.as_deref());
    }

    let mut config = config::Config::load(cli.config.as_deref());
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    if cli.simulate {
        config.simulate = true;
    }
    tracing::debug!("Data directory: {}", config.data_dir().display());

    match command {
        Commands::Run => app::run(config).await,
        Commands::Serve => app::serve_only(config).await,
        Commands::Capture => app::capture(config).await,
        Commands::Tare => app::calibrate(config, None).await,
        Commands::Calibrate { grams } => app::calibrate(config, Some(grams)).await,
        Commands::Identify { image } => app::identify(config, &image).await,
        Commands::Recipes {
            meal_type,
            count,
            output,
        } => app::recipes(config, meal_type, count, output).await,
        Commands::Dishes { meal_type } => app::dishes(config, meal_type).await,
        Commands::Recipe {
            name,
            ingredients,
            input_json,
            output,
        } => {
            let amounts = app::read_amounts(ingredients.as_deref(), input_json.as_deref())?;
            app::full_recipe(config, &name, amounts, output).await
        }
        Commands::Mcp => app::mcp(config).await,
        Commands::Config => Ok(()),
    }
}

/// Logs go to stderr so stdout stays free for command output and MCP
fn init_tracing(debug: bool) {
    let default = if debug {
        "foodbot=debug,tower_http=debug"
    } else {
        "foodbot=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Open config file in user's editor
fn run_config_command(path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(config::Config::path)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !config_path.exists() {
        std::fs::write(&config_path, config::TEMPLATE)?;
        println!("Created config file: {}", config_path.display());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "nano".to_string());

    println!("Opening {} with {}", config_path.display(), editor);

    std::process::Command::new(&editor)
        .arg(&config_path)
        .status()?;

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
