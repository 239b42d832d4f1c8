//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\voice-cover\
//!   macOS:   ~/Library/Application Support/voice-cover/
//!   Linux:   ~/.config/voice-cover/
//!
//! Scratch dir (per-run workspaces):
//!   Windows: %LOCALAPPDATA%\voice-cover\runs\
//!   macOS:   ~/Library/Caches/voice-cover/runs/
//!   Linux:   ~/.cache/voice-cover/runs/
//!
//! The scratch dir falls back to the system temp dir, never to the current
//! working directory: concurrent runs must not collide on relative paths.

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default root under which each run creates its `run-<uuid>` directory.
    pub scratch_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voice-cover";

    /// Resolves all paths using the `dirs` crate.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::APP_NAME);

        let scratch_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::APP_NAME)
            .join("runs");

        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
            scratch_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_absolute() {
        let paths = AppPaths::new();
        assert!(paths.scratch_dir.is_absolute());
        assert!(paths.scratch_dir.ends_with("voice-cover/runs"));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
    }
}
