//! Storage module - flat-file persistence

pub mod log;

pub use log::{FoodLog, Ingredient, LogEntry, NewEntry, Order};
