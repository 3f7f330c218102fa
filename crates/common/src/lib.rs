//! Shared types for the dashboard API client workspace

mod error;
mod secret;
mod toml_file;

pub use error::{Error, Result};
pub use secret::Secret;
pub use toml_file::read_toml;
