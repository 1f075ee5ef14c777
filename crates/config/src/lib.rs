//! Configuration loading, validation and env substitution.
//!
//! Config files: `shredder.toml`, `shredder.yaml`, `shredder.yml` or
//! `shredder.json`. Searched in `./` then `~/.config/shredder/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, and the
//! `SHREDDER_TRANSIT_TOKEN` / `SHREDDER_TRANSIT_URL` overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        CipherAlgorithm, KekBackend, KeyStoreBackend, KeyStoreConfig, MarkersConfig,
        MaterialsConfig, MaterialsMode, MetricsConfig, RetryConfig, ShredderConfig, TransitConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config, validate_str},
};
