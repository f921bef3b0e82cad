//! Configuration management.

mod app;
mod xdg;

pub use app::{AppConfig, ConfigError, DEFAULT_MODEL_ID};
pub use xdg::XdgDirs;
