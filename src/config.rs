//! Configuration module
//!
//! Reads settings from ~/.config/foodbot/config.toml (or --config), then lets
//! the environment (.env included) override the parts that are usually secret
//! or deployment specific.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bundled template written by `foodbot config` on first use
pub const TEMPLATE: &str = include_str!("../config.toml.example");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the log, photos and scale calibration live.
    /// Defaults to the platform data dir (~/.local/share/foodbot).
    pub data_dir: Option<PathBuf>,
    /// Use simulated scale, camera and identifier instead of real hardware
    pub simulate: bool,
    pub button: ButtonConfig,
    pub scale: ScaleConfig,
    pub camera: CameraConfig,
    pub ai: AiConfig,
    pub server: ServerConfig,
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// BCM pin number, wired to ground through the button
    pub pin: u8,
    pub debounce_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: 17,
            debounce_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub dout_pin: u8,
    pub sck_pin: u8,
    /// Readings averaged per weight, tare and calibration step
    pub samples: usize,
    /// How long to wait for the HX711 to signal a conversion is ready
    pub ready_timeout_ms: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            dout_pin: 5,
            sck_pin: 6,
            samples: 10,
            ready_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub command: String,
    pub width: u32,
    pub height: u32,
    /// Upper bound on a single capture, including sensor warm-up
    pub timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: "libcamera-still".to_string(),
            width: 1920,
            height: 1080,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Any OpenAI-compatible chat completions endpoint
    pub api_base: String,
    /// Prefer OPENAI_API_KEY in the environment over storing the key here
    pub api_key: Option<String>,
    /// Model used for recipes and dish ideas
    pub model: String,
    /// Model used to identify photos
    pub vision_model: String,
    /// Photos are downscaled so their longest side fits this (0 = send as is)
    pub max_image_side: u32,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            vision_model: "gpt-4o".to_string(),
            max_image_side: 1024,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS origins; "*" allows any
    pub allowed_origins: Vec<String>,
    /// Built frontend served at / when set and present
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec!["*".to_string()],
            static_dir: None,
        }
    }
}

/// Settings for `foodbot mcp`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Tool names to hide from MCP clients
    pub disabled: Vec<String>,
}

impl Config {
    /// Get the default config file path
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("foodbot").join("config.toml"))
    }

    /// Load config from `path` (or the default location), falling back to
    /// defaults when the file is missing or broken, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::path) {
            Some(path) => Self::load_file(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Overlay environment variables. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.ai.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|m| !m.is_empty()) {
            self.ai.model = model;
        }
        if let Some(base) = lookup("OPENAI_API_BASE").filter(|b| !b.is_empty()) {
            self.ai.api_base = base;
        }
        if let Some(dir) = lookup("FOODBOT_DATA_DIR").filter(|d| !d.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("foodbot"))
                .unwrap_or_else(|| PathBuf::from("data"))
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join("food_log.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir().join("images")
    }

    #[cfg(feature = "hardware")]
    pub fn calibration_path(&self) -> PathBuf {
        self.data_dir().join("scale_calibration.json")
    }
}
