//! Config file discovery and loading for the CLI.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use netsession_core::FileConfig;

/// Resolves the default config path.
///
/// Resolution order:
/// 1. `$XDG_CONFIG_HOME/netsession/config.toml`
/// 2. `$HOME/.config/netsession/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("netsession")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("netsession")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. Without one, the default path is used when
/// present and an empty config otherwise.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return read_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    FileConfig::from_toml_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "request_timeout_secs = 12\n").unwrap();

        let config = load_file_config(Some(&path)).unwrap();
        assert_eq!(config.request_timeout_secs, Some(12));
    }

    #[test]
    fn test_load_missing_explicit_config_fails_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_file_config(Some(&path)).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("absent.toml"), "Expected path in: {msg}");
    }

    #[test]
    fn test_load_invalid_config_reports_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "resource_timeout_secs = 0\n").unwrap();

        let err = load_file_config(Some(&path)).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("resource_timeout_secs"), "Expected field in: {msg}");
        assert!(msg.contains("Failed to parse config file"), "got: {msg}");
    }
}
