//! Application configuration management.
//!
//! Handles loading and merging configuration from multiple sources:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - TOML configuration file
//! - Default values (lowest priority)

mod app;
mod migration;
mod overlay;
mod storage;

pub use app::AppConfig;
