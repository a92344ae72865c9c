//! # hap-core
//!
//! Core types, configuration, and error definitions shared across the HAP
//! accessory crates.
//!
//! This crate provides:
//! - Accessory identification and setup codes
//! - Advertised feature/status flags and categories
//! - TOML configuration
//! - Common error types

pub mod config;
pub mod device;
pub mod error;
pub mod features;

pub use config::{AccessoryConfig, MdnsConfig};
pub use device::{DeviceId, SetupCode};
pub use error::{
    ConfigError, CryptoError, Error, HttpError, MdnsError, PairingError, ParseError, Result,
};
pub use features::{Category, FeatureFlags, StatusFlags};
