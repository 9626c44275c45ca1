pub mod schema;

pub use schema::InfocentralConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default infocentral home directory (~/.infocentral).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".infocentral"))
        .unwrap_or_else(|| PathBuf::from(".infocentral"))
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<InfocentralConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read infocentral config file")?;
        let config: InfocentralConfig =
            toml::from_str(&contents).context("Failed to parse infocentral config (TOML)")?;
        Ok(config)
    } else {
        Ok(InfocentralConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &InfocentralConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_home_is_under_the_user_home() {
        assert!(default_home_dir().ends_with(".infocentral"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = load_config(Path::new("/nonexistent/infocentral.toml")).unwrap();
        assert_eq!(cfg.interpreter, "python3");
        assert_eq!(cfg.execution_timeout_secs, 30);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infocentral.toml");

        let mut cfg = InfocentralConfig::default();
        cfg.oracle_api_key = "sk-test".into();
        cfg.keep_versions = 3;
        save_config(&cfg, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.oracle_api_key, "sk-test");
        assert_eq!(loaded.keep_versions, 3);
    }
}
