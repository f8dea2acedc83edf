//! Configuration loading and root folder resolution
//!
//! The root folder holds the SQLite database and the optional TOML config.
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no CLI argument is given
pub const ROOT_FOLDER_ENV: &str = "DUETECT_ROOT_FOLDER";

/// File name of the SQLite database inside the root folder
pub const DATABASE_FILE: &str = "duetect.db";

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Database path inside a resolved root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// Create the root folder directory if it does not exist yet
pub fn ensure_root_folder(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        tracing::info!("Created root folder: {}", root_folder.display());
    }
    Ok(())
}

/// Locate the platform config file, if present
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/duetect/config.toml first, then /etc/duetect/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("duetect").join("config.toml"));
        let system_config = PathBuf::from("/etc/duetect/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("duetect").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("duetect"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/duetect"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("duetect"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/duetect"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("duetect"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\duetect"))
    } else {
        PathBuf::from("./duetect_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_takes_priority() {
        let resolved = resolve_root_folder(Some(Path::new("/tmp/duetect-test"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/duetect-test"));
    }

    #[test]
    fn default_root_folder_is_nonempty() {
        let default = default_root_folder();
        assert!(!default.as_os_str().is_empty());
    }

    #[test]
    fn database_path_appends_file_name() {
        let path = database_path(Path::new("/data/duetect"));
        assert_eq!(path, PathBuf::from("/data/duetect/duetect.db"));
    }
}
