//! # Core Module
//!
//! Core domain types and configuration for the reminder bot.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.7.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial creation with config module

pub mod config;

// Re-export commonly used items
pub use config::Config;
