//! # Core Module
//!
//! Configuration shared by the binary and the schedulers.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial creation with config module

pub mod config;

pub use config::Config;
