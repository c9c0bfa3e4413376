//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the device sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus carrying the sync progress stream
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the codec and sync crates
//! depend on. It establishes the logging conventions, the configuration
//! surface, and the event broadcasting mechanism used to stream sync progress
//! to callers.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
