//! Configuration for the report engine.
//!
//! Handles the `relato.toml` settings file and environment variable
//! expansion.

mod settings;

pub use settings::{
    expand_env_vars, CacheSettings, CrmSettings, HarvestSettings, Settings, SettingsError,
};
