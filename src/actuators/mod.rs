//! Actuators module - things the robot does to the world

pub mod camera;
