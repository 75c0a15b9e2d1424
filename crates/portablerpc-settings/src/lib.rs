//! # portablerpc-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`RpcSettings::default()`]
//! 2. **User file** — `~/.portablerpc/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `PORTABLERPC_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_checked, load_settings_from_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<RpcSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loaded on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static RpcSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: RpcSettings) -> std::result::Result<(), RpcSettings> {
    SETTINGS.set(settings)
}
