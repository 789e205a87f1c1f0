//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use biolink_engine::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything `biolink` reads from its TOML file.
///
/// Engine sections (`[capture]`, `[permission]`, ...) sit at the top level
/// next to `[log]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub log: LogSettings,

    #[serde(flatten)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or from the first standard location that exists.
    ///
    /// Falls back to defaults when no path is given and no file exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let candidates = [
                    Self::default_path(),
                    PathBuf::from("/etc/biolink/config.toml"),
                ];
                match candidates.into_iter().find(|p| p.exists()) {
                    Some(p) => p,
                    None => return Ok(Self::default()),
                }
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;
        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(config_dir) => config_dir.join("biolink").join("config.toml"),
            None => PathBuf::from(".config/biolink/config.toml"),
        }
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', expected one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }
        self.service.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_engine::DriverMode;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_is_default() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_sections_parse() {
        let config: CliConfig = toml::from_str(
            r#"
            [log]
            level = "debug"

            [capture]
            total_ms = 5000

            [driver]
            mode = "fixed"
            "#,
        )
        .unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.service.capture.total(), Duration::from_millis(5000));
        assert_eq!(config.service.driver.mode, DriverMode::Fixed);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.service.verify.min_score = 55;
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[log]\nlevel = \"loud\"\n").unwrap();
        assert!(CliConfig::load(Some(path.clone())).is_err());

        fs::write(&path, "[capture]\ntotal_ms = 0\n").unwrap();
        let err = CliConfig::load(Some(path)).unwrap_err();
        assert!(format!("{err:#}").contains("capture.total_ms"));
    }
}
