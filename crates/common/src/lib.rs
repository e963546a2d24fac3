//! Common utilities and types shared across Tutorbase session-room components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;
