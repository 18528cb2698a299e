//! Configuration and paths

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Default minimum interval between location fixes (5 minutes)
pub const DEFAULT_INTERVAL_MS: u64 = 300_000;

/// Foreground notification id, reused so re-showing replaces the notice
pub const NOTIFICATION_ID: u32 = 1;

pub const CHANNEL_ID: &str = "LocationTrackingChannel";
pub const CHANNEL_NAME: &str = "Location Tracking";
pub const CHANNEL_DESCRIPTION: &str = "Tracking your location";

pub const NOTIFICATION_TITLE: &str = "Location Tracker";
pub const NOTIFICATION_TEXT: &str = "Tracking active";

/// Accepted digit counts for a recipient number
pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;

/// Configuration for one tracking session, fixed for its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub recipient: Option<String>,
    pub interval: Duration,
}

impl SessionConfig {
    pub fn new(recipient: Option<String>, interval_ms: Option<u64>) -> Self {
        Self {
            recipient,
            interval: Duration::from_millis(interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)),
        }
    }

    /// Recipient with surrounding whitespace removed, `None` if blank
    pub fn recipient(&self) -> Option<&str> {
        self.recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// How the foreground notice is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// termux-notification + termux-wake-lock
    Termux,
    /// Log only (headless hosts)
    Log,
}

/// User-editable settings, stored as JSON in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub recipient: Option<String>,
    pub interval_ms: u64,
    /// Whether `start` on a running service reconfigures it
    pub allow_restart: bool,
    pub location_command: Vec<String>,
    /// `{recipient}` and `{message}` are substituted per send
    pub sms_command: Vec<String>,
    pub host: HostKind,
    /// Command run when the notification is tapped
    pub tap_action: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            recipient: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            allow_restart: false,
            location_command: ["termux-location", "-p", "gps", "-r", "once"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sms_command: ["termux-sms-send", "-n", "{recipient}", "{message}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            host: HostKind::Termux,
            tap_action: Some("am start -n com.termux/com.termux.app.TermuxActivity".to_string()),
        }
    }
}

impl RelaySettings {
    /// Build the session configuration, letting explicit values win
    pub fn session(&self, recipient: Option<String>, interval_ms: Option<u64>) -> SessionConfig {
        SessionConfig::new(
            recipient.or_else(|| self.recipient.clone()),
            Some(interval_ms.unwrap_or(self.interval_ms)),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.location_command.is_empty() {
            return Err(Error::Config("location_command is empty".to_string()));
        }
        if self.sms_command.is_empty() {
            return Err(Error::Config("sms_command is empty".to_string()));
        }
        if !self.sms_command.iter().any(|a| a.contains("{message}")) {
            return Err(Error::Config(
                "sms_command has no {message} placeholder".to_string(),
            ));
        }
        Ok(())
    }
}

/// All configurable paths plus the loaded settings
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub relay_dir: PathBuf,
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    pub logs_dir: PathBuf,
    pub log_file: PathBuf,
    pub config_file: PathBuf,
    /// Termux:Boot script directory
    pub boot_dir: PathBuf,
    pub settings: RelaySettings,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::rooted_at(&home, &home.join(".location-relay"))
    }
}

impl Config {
    fn rooted_at(home: &Path, relay_dir: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            relay_dir: relay_dir.to_path_buf(),
            state_dir: relay_dir.join("state"),
            pid_file: relay_dir.join("state/relay.pid"),
            logs_dir: relay_dir.join("logs"),
            log_file: relay_dir.join("logs/relay.log"),
            config_file: relay_dir.join("config.json"),
            boot_dir: home.join(".termux/boot"),
            settings: RelaySettings::default(),
        }
    }

    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self::rooted_at(temp_dir, &temp_dir.join("location-relay"))
    }

    /// Default paths with settings read from the config file
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.reload()?;
        Ok(config)
    }

    /// Re-read settings from the config file; a missing file means defaults
    pub fn reload(&mut self) -> Result<()> {
        if !self.config_file.exists() {
            self.settings = RelaySettings::default();
            return Ok(());
        }

        let content = fs::read_to_string(&self.config_file)?;
        let settings: RelaySettings = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", self.config_file.display(), e)))?;
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Write settings to the config file atomically
    pub fn save(&self) -> Result<()> {
        let parent = self
            .config_file
            .parent()
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let json = serde_json::to_string_pretty(&self.settings)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.config_file)
            .map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_interval() {
        let session = SessionConfig::new(Some("+15551234567".to_string()), None);
        assert_eq!(session.interval, Duration::from_millis(300_000));
        assert_eq!(SessionConfig::default().interval.as_millis(), 300_000);
    }

    #[test]
    fn test_blank_recipient_is_none() {
        assert_eq!(SessionConfig::new(Some("   ".to_string()), None).recipient(), None);
        assert_eq!(SessionConfig::new(None, None).recipient(), None);
        assert_eq!(
            SessionConfig::new(Some(" +15551234567 ".to_string()), None).recipient(),
            Some("+15551234567")
        );
    }

    #[test]
    fn test_settings_session_override() {
        let settings = RelaySettings {
            recipient: Some("+15550000000".to_string()),
            interval_ms: 60_000,
            ..Default::default()
        };

        let from_file = settings.session(None, None);
        assert_eq!(from_file.recipient(), Some("+15550000000"));
        assert_eq!(from_file.interval, Duration::from_secs(60));

        let overridden = settings.session(Some("+15551111111".to_string()), Some(1_000));
        assert_eq!(overridden.recipient(), Some("+15551111111"));
        assert_eq!(overridden.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.home, temp);
        assert!(config.pid_file.starts_with(&config.state_dir));
        assert!(config.log_file.starts_with(&config.logs_dir));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_test(temp_dir.path());
        config.settings.interval_ms = 5;
        config.reload().unwrap();
        assert_eq!(config.settings, RelaySettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_test(temp_dir.path());
        config.settings.recipient = Some("+15551234567".to_string());
        config.settings.host = HostKind::Log;
        config.save().unwrap();

        let mut reloaded = Config::for_test(temp_dir.path());
        reloaded.reload().unwrap();
        assert_eq!(reloaded.settings.recipient.as_deref(), Some("+15551234567"));
        assert_eq!(reloaded.settings.host, HostKind::Log);
        assert_eq!(reloaded.settings.interval_ms, DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_test(temp_dir.path());
        fs::create_dir_all(&config.relay_dir).unwrap();
        fs::write(&config.config_file, r#"{"interval_ms": 120000, "host": "log"}"#).unwrap();

        config.reload().unwrap();
        assert_eq!(config.settings.interval_ms, 120_000);
        assert_eq!(config.settings.host, HostKind::Log);
        assert_eq!(config.settings.sms_command[0], "termux-sms-send");
    }

    #[test]
    fn test_invalid_sms_command_rejected() {
        let settings = RelaySettings {
            sms_command: vec!["send-sms".to_string(), "{recipient}".to_string()],
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
        assert!(RelaySettings::default().validate().is_ok());
    }
}
