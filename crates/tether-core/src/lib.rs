//! # tether-core
//!
//! Core types and configuration for Tether.
//!
//! This crate provides the building blocks shared by the attachment engine:
//! - Record identity traits (Identifiable, RecordKey)
//! - Process-wide configuration (AppConfig)

pub mod config;
pub mod traits;

pub use config::*;
pub use traits::*;
