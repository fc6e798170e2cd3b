//! Sensors module - the capture button and the load cell

pub mod button;
pub mod scale;
