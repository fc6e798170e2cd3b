//! Wiring: builds components from config and runs each CLI command

use anyhow::Context;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::actuators::camera::{Camera, SimulatedCamera};
use crate::ai::{
    FoodIdentifier, Identification, MealType, OpenAiClient, RecipeSuggestor, SimulatedIdentifier,
    VisionIdentifier,
};
use crate::api::{self, AppState};
use crate::config::Config;
use crate::pipeline::{CaptureHandle, CapturePipeline};
use crate::sensors::button::{keyboard_presses, Press};
use crate::sensors::scale::{SimulatedScale, WeightSensor};
use crate::storage::FoodLog;

type Suggestor = Option<Arc<RecipeSuggestor<OpenAiClient>>>;

async fn open_log(config: &Config) -> anyhow::Result<Arc<FoodLog>> {
    let path = config.log_path();
    let log = FoodLog::open(&path)
        .await
        .with_context(|| format!("Failed to open food log at {}", path.display()))?;
    Ok(Arc::new(log))
}

fn openai_client(config: &Config) -> anyhow::Result<OpenAiClient> {
    OpenAiClient::new(&config.ai).context("Cannot reach the language model")
}

/// Recipe features are optional for the server; it still logs without a key
fn optional_suggestor(config: &Config) -> Suggestor {
    match OpenAiClient::new(&config.ai) {
        Ok(client) => Some(Arc::new(RecipeSuggestor::new(client))),
        Err(e) => {
            tracing::warn!("Recipe suggestions disabled: {}", e);
            None
        }
    }
}

fn simulated_pipeline(
    config: &Config,
    log: Arc<FoodLog>,
) -> anyhow::Result<CapturePipeline<SimulatedScale, SimulatedCamera, SimulatedIdentifier>> {
    tracing::info!("Using simulated scale, camera and identifier");
    let camera = SimulatedCamera::new(config.images_dir())?;
    Ok(CapturePipeline::new(
        SimulatedScale::default(),
        camera,
        SimulatedIdentifier::default(),
        log,
    ))
}

#[cfg(feature = "hardware")]
mod hardware {
    use super::*;
    use crate::actuators::camera::LibcameraStill;
    use crate::sensors::button::GpioButton;
    use crate::sensors::scale::{Hx711, Scale};
    use std::time::Duration;

    pub type Pipeline =
        CapturePipeline<Scale<Hx711>, LibcameraStill, VisionIdentifier<OpenAiClient>>;

    pub fn scale(config: &Config) -> anyhow::Result<Scale<Hx711>> {
        let cell = Hx711::new(
            config.scale.dout_pin,
            config.scale.sck_pin,
            Duration::from_millis(config.scale.ready_timeout_ms),
        )
        .context("Failed to set up the HX711")?;
        Ok(Scale::new(cell, config.scale.samples, config.calibration_path()))
    }

    pub fn pipeline(config: &Config, log: Arc<FoodLog>) -> anyhow::Result<Pipeline> {
        let identifier = VisionIdentifier::new(openai_client(config)?, config.ai.max_image_side);
        let camera = LibcameraStill::new(config.camera.clone(), config.images_dir())?;
        Ok(CapturePipeline::new(scale(config)?, camera, identifier, log))
    }

    pub async fn run(
        config: &Config,
        log: Arc<FoodLog>,
        recipes: Suggestor,
        presses: (mpsc::Sender<Press>, mpsc::Receiver<Press>),
    ) -> anyhow::Result<()> {
        let pipeline = pipeline(config, Arc::clone(&log))?;
        let mut button = GpioButton::start(
            config.button.pin,
            Duration::from_millis(config.button.debounce_ms),
            presses.0.clone(),
        )
        .context("Failed to set up the capture button")?;
        println!("Ready. Press the button on GPIO {} to capture an item.", button.pin());

        let result = drive(config, log, recipes, pipeline, presses, std::future::pending()).await;

        if let Err(e) = button.stop() {
            tracing::warn!("Failed to release the button: {}", e);
        }
        result
    }
}

#[cfg(not(feature = "hardware"))]
mod hardware {
    pub fn unavailable() -> anyhow::Error {
        anyhow::anyhow!("foodbot was built without the `hardware` feature; run with --simulate")
    }
}

/// Pipeline loop plus HTTP server until a shutdown signal, or until
/// `input_closed` resolves
async fn drive<S, C, I>(
    config: &Config,
    log: Arc<FoodLog>,
    recipes: Suggestor,
    pipeline: CapturePipeline<S, C, I>,
    (tx, rx): (mpsc::Sender<Press>, mpsc::Receiver<Press>),
    input_closed: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()>
where
    S: WeightSensor,
    C: Camera,
    I: FoodIdentifier,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = crate::shutdown_signal() => {}
            _ = input_closed => tracing::info!("Input closed, shutting down"),
        }
        let _ = stop_tx.send(true);
    });

    let capture = CaptureHandle::new(tx, pipeline.subscribe());
    let pipeline_task = tokio::spawn(pipeline.run(rx, stopped(stop_rx.clone())));

    let state = AppState {
        log,
        recipes,
        capture: Some(capture),
    };
    let served = serve(config, state, stopped(stop_rx)).await;

    pipeline_task.await.context("Capture pipeline panicked")?;
    served
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn serve(
    config: &Config,
    state: AppState<OpenAiClient>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = api::router(state, &config.server, config.images_dir());
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Starting HTTP server on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// `foodbot run`: capture loop, trigger input and API together
pub async fn run(config: Config) -> anyhow::Result<()> {
    let log = open_log(&config).await?;
    let recipes = optional_suggestor(&config);
    // Capacity 1: at most one press waits while a capture runs
    let (tx, rx) = mpsc::channel(1);

    if config.simulate {
        let pipeline = simulated_pipeline(&config, Arc::clone(&log))?;
        let keyboard = keyboard_presses(tx.clone());
        let input_closed = async move {
            let _ = keyboard.await;
        };
        return drive(&config, log, recipes, pipeline, (tx, rx), input_closed).await;
    }

    #[cfg(feature = "hardware")]
    return hardware::run(&config, log, recipes, (tx, rx)).await;

    #[cfg(not(feature = "hardware"))]
    Err(hardware::unavailable())
}

/// `foodbot serve`: API only
pub async fn serve_only(config: Config) -> anyhow::Result<()> {
    let state = AppState {
        log: open_log(&config).await?,
        recipes: optional_suggestor(&config),
        capture: None,
    };
    serve(&config, state, crate::shutdown_signal()).await
}

/// `foodbot capture`: one capture, entry printed as JSON
pub async fn capture(config: Config) -> anyhow::Result<()> {
    let log = open_log(&config).await?;

    let entry = if config.simulate {
        simulated_pipeline(&config, log)?.run_once().await?
    } else {
        #[cfg(feature = "hardware")]
        {
            hardware::pipeline(&config, log)?.run_once().await?
        }
        #[cfg(not(feature = "hardware"))]
        {
            drop(log);
            return Err(hardware::unavailable());
        }
    };

    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

#[cfg(feature = "hardware")]
fn wait_for_enter(prompt: &str) -> anyhow::Result<()> {
    use std::io::BufRead;

    println!("{}", prompt);
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(())
}

/// `foodbot tare` and `foodbot calibrate <grams>`
pub async fn calibrate(config: Config, known_grams: Option<f64>) -> anyhow::Result<()> {
    if config.simulate {
        anyhow::bail!("Taring and calibrating need the real scale; drop --simulate");
    }

    #[cfg(feature = "hardware")]
    {
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut scale = hardware::scale(&config)?;

            wait_for_enter("Remove everything from the scale, then press Enter.")?;
            let offset = scale.tare()?;
            println!("Tare complete (offset {:.1}).", offset);

            if let Some(grams) = known_grams {
                wait_for_enter(&format!(
                    "Place the {} g reference weight on the scale, then press Enter.",
                    grams
                ))?;
                let calibration = scale.calibrate(grams)?;
                println!(
                    "Calibration saved to {} (reference unit {:.3}).",
                    config.calibration_path().display(),
                    calibration.reference_unit
                );
            }

            let weight = scale.weight_grams()?;
            println!("Current reading: {:.1} g", weight);
            scale.power_down();
            Ok(())
        })
        .await
        .context("Calibration task panicked")?
    }

    #[cfg(not(feature = "hardware"))]
    {
        let _ = known_grams;
        Err(hardware::unavailable())
    }
}

/// `foodbot identify <image>`
pub async fn identify(config: Config, image: &Path) -> anyhow::Result<()> {
    if !image.exists() {
        anyhow::bail!("Image not found: {}", image.display());
    }

    let result: Identification = if config.simulate {
        SimulatedIdentifier::default().identify(image).await
    } else {
        VisionIdentifier::new(openai_client(&config)?, config.ai.max_image_side)
            .identify(image)
            .await
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn emit<T: serde::Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// `foodbot recipes`
pub async fn recipes(
    config: Config,
    meal_type: MealType,
    count: usize,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let suggestor = RecipeSuggestor::new(openai_client(&config)?);
    let ingredients = open_log(&config).await?.ingredients().await?;
    let recipes = suggestor.suggest(&ingredients, meal_type, count).await?;
    emit(&recipes, output.as_deref())
}

/// `foodbot dishes`
pub async fn dishes(config: Config, meal_type: MealType) -> anyhow::Result<()> {
    let suggestor = RecipeSuggestor::new(openai_client(&config)?);
    let ingredients = open_log(&config).await?.ingredients().await?;
    let ideas = suggestor.dish_ideas(&ingredients, meal_type).await?;
    emit(&ideas, None)
}

/// Amounts for `foodbot recipe`, from a JSON file or inline JSON
pub fn read_amounts(
    file: Option<&Path>,
    inline: Option<&str>,
) -> anyhow::Result<BTreeMap<String, f64>> {
    let raw = match (file, inline) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(json)) => json.to_string(),
        (None, None) => anyhow::bail!("Pass --ingredients FILE or --input-json JSON"),
    };
    serde_json::from_str(&raw).context("Ingredients must be a JSON object of name to grams")
}

/// `foodbot recipe`
pub async fn full_recipe(
    config: Config,
    name: &str,
    amounts: BTreeMap<String, f64>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let suggestor = RecipeSuggestor::new(openai_client(&config)?);
    let recipe = suggestor.full_recipe(name, &amounts).await?;
    emit(&recipe, output.as_deref())
}

/// `foodbot mcp`
pub async fn mcp(config: Config) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    tracing::info!("Starting foodbot MCP server");

    let server = crate::mcp::FoodBotServer::new(
        open_log(&config).await?,
        optional_suggestor(&config),
        &config.mcp.disabled,
    );
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    tracing::info!("foodbot MCP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_amounts_inline() {
        let amounts = read_amounts(None, Some(r#"{"Rice": 150, "Egg": 55.5}"#)).unwrap();
        assert_eq!(amounts["Egg"], 55.5);
    }

    #[test]
    fn test_read_amounts_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amounts.json");
        std::fs::write(&path, r#"{"Oats": 80}"#).unwrap();

        let amounts = read_amounts(Some(&path), Some(r#"{"Rice": 1}"#)).unwrap();
        assert_eq!(amounts.keys().collect::<Vec<_>>(), vec!["Oats"]);
    }

    #[test]
    fn test_read_amounts_errors() {
        assert!(read_amounts(None, None).is_err());
        assert!(read_amounts(None, Some("[1, 2]")).is_err());
    }

    #[tokio::test]
    async fn test_simulated_capture_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            simulate: true,
            ..Config::default()
        };

        capture(config.clone()).await.unwrap();

        let log = open_log(&config).await.unwrap();
        let entries = log.entries(None, crate::storage::Order::Newest).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(dir.path().join("images").join("image_1.jpg").exists());
        assert!((50.0..=500.0).contains(&entries[0].weight_grams));
    }

    #[tokio::test]
    async fn test_recipes_need_key() {
        let config = Config::default();
        assert!(recipes(config, MealType::Any, 3, None).await.is_err());
    }
}
