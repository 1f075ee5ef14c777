//! Metrics collection and export for shredder.
//!
//! Thin layer over the `metrics` crate facade. Crates that record metrics
//! depend on this crate behind their own optional `metrics` feature and use the
//! names from [`definitions`] so every counter is declared in one place.
//!
//! ```rust,ignore
//! use shredder_metrics::{counter, metadata};
//!
//! counter!(metadata::FIELDS_ENCRYPTED_TOTAL).increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render the text format
//! - `tracing`: propagate span context to metric labels

mod definitions;
mod recorder;
pub mod tracing_integration;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
