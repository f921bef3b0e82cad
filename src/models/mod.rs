//! Model availability.
//!
//! This module handles:
//! - Reading the engine registry for the configured model
//! - Forwarding download / pause commands
//! - Publishing lifecycle changes to observers

pub mod tracker;

pub use tracker::{ModelTracker, RegistryError};
