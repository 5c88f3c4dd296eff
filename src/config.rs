use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `[googlechat] webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "GOOGLE_CHAT_WEBHOOK_URL";

/// Cross-platform configuration directory manager
pub struct ConfigManager;

impl ConfigManager {
    /// Get the main configuration directory path following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/backupjob or ~/.config/backupjob
    /// - macOS: ~/Library/Application Support/backupjob
    /// - Windows: %APPDATA%\backupjob
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join("backupjob"))
            } else {
                let home = dirs::home_dir().context("Failed to get home directory")?;
                Ok(home.join(".config").join("backupjob"))
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Ok(dirs::config_dir()
                .context("Failed to get config directory")?
                .join("backupjob"))
        }
    }

    /// Get the default config file path (config.toml)
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

/// rclone settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcloneConfig {
    pub binary: String,
    /// Passed to `--bwlimit`; `"off"` disables limiting.
    pub bwlimit: String,
    pub s3_storage_class: String,
    pub s3_provider: String,
    pub s3_acl: String,
}

impl Default for RcloneConfig {
    fn default() -> Self {
        RcloneConfig {
            binary: "rclone".to_string(),
            bwlimit: "off".to_string(),
            s3_storage_class: "STANDARD".to_string(),
            s3_provider: "AWS".to_string(),
            s3_acl: "private".to_string(),
        }
    }
}

/// restic settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResticConfig {
    pub binary: String,
    /// File name looked up at the root of every backed-up directory and used as an exclude file.
    pub implicit_exclude_file_name: String,
}

impl Default for ResticConfig {
    fn default() -> Self {
        ResticConfig {
            binary: "restic".to_string(),
            implicit_exclude_file_name: crate::restic::IMPLICIT_EXCLUDE_FILE_NAME.to_string(),
        }
    }
}

/// Google Chat webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleChatConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Minimum spacing between posted messages (webhook rate limit).
    pub seconds_between_messages: u64,
    /// Retries after an HTTP 429 before giving up on a message.
    pub max_retries: u32,
}

impl Default for GoogleChatConfig {
    fn default() -> Self {
        GoogleChatConfig {
            webhook_url: None,
            seconds_between_messages: 2,
            max_retries: 3,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupJobConfig {
    pub rclone: RcloneConfig,
    pub restic: ResticConfig,
    pub googlechat: GoogleChatConfig,
}

impl BackupJobConfig {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing file at the default location yields the defaults. An
    /// explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => {
                let default_path = ConfigManager::config_file_path()?;
                if !default_path.exists() {
                    log::debug!(
                        "No config file at {}, using defaults",
                        default_path.display()
                    );
                    return Ok(Self::default());
                }
                Self::load_from(&default_path)
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BackupJobConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// The webhook URL, from the environment first and then the config file.
    pub fn webhook_url(&self) -> Result<String> {
        if let Ok(url) = std::env::var(WEBHOOK_URL_ENV) {
            if !url.is_empty() {
                return Ok(url);
            }
        }

        self.googlechat
            .webhook_url
            .clone()
            .filter(|u| !u.is_empty())
            .with_context(|| {
                format!("{WEBHOOK_URL_ENV} must be set (or [googlechat] webhook_url configured)")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BackupJobConfig::default();
        assert_eq!(config.rclone.binary, "rclone");
        assert_eq!(config.rclone.bwlimit, "off");
        assert_eq!(config.rclone.s3_storage_class, "STANDARD");
        assert_eq!(config.restic.implicit_exclude_file_name, "backupignore");
        assert_eq!(config.googlechat.seconds_between_messages, 2);
        assert_eq!(config.googlechat.max_retries, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[rclone]\nbwlimit = \"10M\"\n\n[googlechat]\nmax_retries = 5\n",
        )
        .unwrap();

        let config = BackupJobConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rclone.bwlimit, "10M");
        assert_eq!(config.rclone.s3_provider, "AWS");
        assert_eq!(config.googlechat.max_retries, 5);
        assert_eq!(config.restic, ResticConfig::default());
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(BackupJobConfig::load(Some(&temp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[rclone\n").unwrap();
        assert!(BackupJobConfig::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_xdg_config_home_respected() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", temp.path());

        let path = ConfigManager::config_file_path().unwrap();
        assert_eq!(path, temp.path().join("backupjob").join("config.toml"));

        // Nothing there yet, so defaults apply.
        assert_eq!(BackupJobConfig::load(None).unwrap(), BackupJobConfig::default());

        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    #[serial]
    fn test_webhook_url_env_takes_precedence() {
        let mut config = BackupJobConfig::default();
        config.googlechat.webhook_url = Some("https://from-file".to_string());

        std::env::remove_var(WEBHOOK_URL_ENV);
        assert_eq!(config.webhook_url().unwrap(), "https://from-file");

        std::env::set_var(WEBHOOK_URL_ENV, "https://from-env");
        assert_eq!(config.webhook_url().unwrap(), "https://from-env");

        std::env::remove_var(WEBHOOK_URL_ENV);
        config.googlechat.webhook_url = None;
        assert!(config.webhook_url().is_err());
    }
}
