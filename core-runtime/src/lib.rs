//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the range cache core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, the validated configuration used
//! to bootstrap a cache, and the event broadcasting mechanism through which
//! cache telemetry reaches the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
