//! Configuration loading and validation for the rota job engine.
//!
//! Config files: `rota.toml`, `rota.yaml`, `rota.yml` or `rota.json`,
//! searched in `./` then the user config directory (`~/.config/rota/`).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, load_config, parse_config},
    schema::{RotaConfig, SchedulerConfig, StoreBackend, StoreConfig},
    validate::{Diagnostic, Severity, validate},
};
