//! Shared utilities for the metered data layer
//!
//! This crate provides the ambient pieces used across the workspace:
//! tracing subscriber setup and `${VAR}` expansion for configuration values.

pub mod env;
pub mod logging;

pub use env::{EnvError, resolve_env_string, resolve_env_with};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
