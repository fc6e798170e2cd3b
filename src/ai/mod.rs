//! Model-backed features: food identification and recipe ideas

pub mod client;
pub mod extract;
pub mod recipes;
pub mod vision;

pub use client::{LlmClient, OpenAiClient};
pub use recipes::{DishIdea, MealType, Recipe, RecipeSuggestor};
pub use vision::{FoodIdentifier, Identification, SimulatedIdentifier, VisionIdentifier};
