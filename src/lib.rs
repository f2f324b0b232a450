pub mod commands;
pub mod config;
pub mod error;
pub mod foundry;
pub mod telemetry;

pub use error::{LabError, Result};
