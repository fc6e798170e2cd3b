//! Food identification from a photo

use rand::seq::SliceRandom;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use super::client::LlmClient;
use super::extract;
use crate::error::{Error, Result};

const SYSTEM_PROMPT: &str = "You are an expert in food identification. Your task is to analyze \
the image and identify what food item is present. Return only a JSON object with 'food_type' \
and 'confidence' fields.";

const USER_PROMPT: &str = "Identify the food in this image. Return JSON with format \
{\"food_type\": \"name of food\", \"confidence\": confidence level from 0-1}";

const MAX_TOKENS: u32 = 100;

pub const UNKNOWN_FOOD: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Identification {
    pub food_type: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Identification {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            food_type: UNKNOWN_FOOD.to_string(),
            confidence: 0.0,
            error: Some(error.into()),
        }
    }

    /// Read a model reply, filling in defaults for anything missing
    pub fn from_reply(reply: &str) -> Self {
        let Some(map) = extract::json_object(reply) else {
            tracing::warn!("Could not parse identification reply: {}", reply);
            return Self::failed("Failed to parse response");
        };

        let food_type = map
            .get("food_type")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_FOOD)
            .to_string();

        let confidence = map
            .get("confidence")
            .and_then(|v| match v {
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                other => other.as_f64(),
            })
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        Self {
            food_type,
            confidence,
            error: None,
        }
    }
}

/// Anything that can name the food in a photo.
///
/// Never fails outright: problems come back as an `unknown` identification
/// with `error` set, so a capture can still be logged.
pub trait FoodIdentifier: Send + Sync + 'static {
    fn identify(&self, image: &Path) -> impl Future<Output = Identification> + Send;
}

#[derive(Debug)]
pub struct VisionIdentifier<C> {
    client: C,
    max_image_side: u32,
}

impl<C: LlmClient> VisionIdentifier<C> {
    /// `max_image_side` of 0 sends photos untouched
    pub fn new(client: C, max_image_side: u32) -> Self {
        Self {
            client,
            max_image_side,
        }
    }

    async fn try_identify(&self, image: &Path) -> Result<Identification> {
        let bytes = tokio::fs::read(image).await?;
        let max_side = self.max_image_side;
        let jpeg = tokio::task::spawn_blocking(move || shrink_jpeg(bytes, max_side))
            .await
            .map_err(|e| Error::Camera(format!("image task failed: {}", e)))?;

        tracing::debug!(
            "Sending {} ({} bytes) for identification",
            image.display(),
            jpeg.len()
        );
        let reply = self
            .client
            .generate_with_image(SYSTEM_PROMPT, USER_PROMPT, jpeg, MAX_TOKENS)
            .await?;
        Ok(Identification::from_reply(&reply))
    }
}

impl<C: LlmClient> FoodIdentifier for VisionIdentifier<C> {
    async fn identify(&self, image: &Path) -> Identification {
        match self.try_identify(image).await {
            Ok(id) => {
                tracing::info!("Identified {} ({:.2})", id.food_type, id.confidence);
                id
            }
            Err(e) => {
                tracing::error!("Error identifying food: {}", e);
                Identification::failed(e.to_string())
            }
        }
    }
}

/// Downscale so the longest side fits `max_side` and re-encode as JPEG.
/// Photos that cannot be decoded are passed through as-is.
fn shrink_jpeg(bytes: Vec<u8>, max_side: u32) -> Vec<u8> {
    if max_side == 0 {
        return bytes;
    }
    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!("Sending image without resizing, decode failed: {}", e);
            return bytes;
        }
    };

    let is_jpeg = matches!(image::guess_format(&bytes), Ok(image::ImageFormat::Jpeg));
    if is_jpeg && img.width() <= max_side && img.height() <= max_side {
        return bytes;
    }

    let resized = img.resize(max_side, max_side, image::imageops::FilterType::Triangle);
    let mut out = Cursor::new(Vec::new());
    match resized.to_rgb8().write_to(&mut out, image::ImageFormat::Jpeg) {
        Ok(()) => out.into_inner(),
        Err(e) => {
            tracing::warn!("JPEG re-encode failed, sending original: {}", e);
            bytes
        }
    }
}

const SIMULATED_FOODS: &[&str] = &[
    "Apple",
    "Banana",
    "Orange",
    "Mango",
    "Strawberries",
    "Broccoli",
    "Carrots",
    "Chicken Breast",
    "Salmon Fillet",
    "Rice",
    "Pasta",
    "Sweet Potato",
    "Avocado",
];

/// Picks a random food, for running without a model
#[derive(Debug, Clone)]
pub struct SimulatedIdentifier {
    delay: Duration,
}

impl SimulatedIdentifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedIdentifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FoodIdentifier for SimulatedIdentifier {
    async fn identify(&self, image: &Path) -> Identification {
        let (food, confidence) = {
            let mut rng = rand::thread_rng();
            let food = SIMULATED_FOODS.choose(&mut rng).copied().unwrap_or("Apple");
            (food, rng.gen_range(0.75..0.98))
        };

        tokio::time::sleep(self.delay).await;
        tracing::info!("Simulated identification of {}: {}", image.display(), food);

        Identification {
            food_type: food.to_string(),
            confidence,
            error: None,
        }
    }
}
