//! # ponder-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`PonderSettings::default()`]
//! 2. **User file** — `~/.ponder/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `PONDER_*` overrides (highest priority)
//!
//! Invalid values (non-integers, values below a documented minimum) never
//! fail loading; they silently fall back to the default.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<PonderSettings> = OnceLock::new();

/// Get the process-wide settings, loading them on first call.
///
/// Falls back to compiled defaults if the settings file cannot be read.
pub fn get_settings() -> &'static PonderSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            PonderSettings::default()
        })
    })
}

/// Initialize the process-wide settings with a specific value.
///
/// Returns the settings back if they were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: PonderSettings) -> std::result::Result<(), PonderSettings> {
    SETTINGS.set(settings)
}
