pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{FailureMode, RetrySettings, Settings, TimeoutSettings};

use std::path::PathBuf;

/// Environment variable naming a settings file directly
pub const CONFIG_ENV: &str = "RIGGING_CONFIG";

const CANDIDATES: [&str; 4] = [
    "rigging.local.yaml",
    ".rigging.local.yaml",
    "rigging.yaml",
    ".rigging.yaml",
];

/// Directory holding the global settings file (`~/.config/rigging`)
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("rigging"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// Find the settings file.
///
/// Search order:
/// 1. `RIGGING_CONFIG` (direct path)
/// 2. current directory: rigging.local.yaml, .rigging.local.yaml, rigging.yaml, .rigging.yaml
/// 3. the same names under `./.rigging/`
/// 4. `~/.config/rigging/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{CONFIG_ENV} points to a missing file");
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".rigging");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load settings from the discovered file, or defaults when there is none.
/// Returns the path that was used.
pub fn load_settings() -> Result<(Settings, Option<PathBuf>)> {
    match find_config_file() {
        Ok(path) => Ok((Settings::load(&path)?, Some(path))),
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No settings file, using defaults");
            Ok((Settings::default(), None))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("rigging"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("rigging.yaml"), "forks: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("rigging.yaml"));
    }

    #[test]
    #[serial]
    fn test_local_file_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("rigging.yaml"), "forks: 2").unwrap();
        fs::write(temp_dir.path().join(".rigging.local.yaml"), "forks: 3").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".rigging.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(".rigging");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("rigging.yaml"), "forks: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with(".rigging/rigging.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "forks: 9").unwrap();

        unsafe {
            std::env::set_var(CONFIG_ENV, config_path.to_str().unwrap());
        }
        let result = load_settings();
        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }

        let (settings, path) = result.unwrap();
        assert_eq!(settings.forks, 9);
        assert_eq!(path, Some(config_path));
    }

    #[test]
    #[serial]
    fn test_missing_file_means_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let found = find_config_file();
        let loaded = load_settings();
        std::env::set_current_dir(original_dir).unwrap();

        // A global file on the machine running the tests would be found too
        if let Err(ConfigError::ConfigFileNotFound) = found {
            let (settings, path) = loaded.unwrap();
            assert_eq!(settings, Settings::default());
            assert!(path.is_none());
        }
    }
}
