//! Error types for foodbot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or environment problems
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// GPIO pin setup or interrupt registration
    #[cfg(feature = "hardware")]
    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("Scale error: {0}")]
    Scale(String),

    #[error("Camera error: {0}")]
    Camera(String),

    /// Transport or API failure talking to the language model
    #[error("Model error: {0}")]
    Llm(String),

    /// Model answered, but not with the JSON we asked for
    #[error("Could not parse model response: {message}")]
    Parse { message: String, raw: String },

    #[error("No ingredients found in food log")]
    EmptyLog,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "hardware")]
impl From<rppal::gpio::Error> for Error {
    fn from(e: rppal::gpio::Error) -> Self {
        Error::Gpio(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Llm(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Camera(format!("image processing failed: {}", e))
    }
}
