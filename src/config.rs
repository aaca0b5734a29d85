//! Configuration loading and management
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional `settings.json` in the data directory (written by the menu
//! bar app), and `NOTCH_VOICE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default room server for local development
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:7880";

/// Default audio level sampling rate
pub const DEFAULT_LEVEL_HZ: u32 = 30;

const SETTINGS_FILE: &str = "settings.json";

/// Voice identity the agent answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Ara,
    Eve,
    Leo,
}

impl Voice {
    pub fn display_name(&self) -> &'static str {
        match self {
            Voice::Ara => "Ara",
            Voice::Eve => "Eve",
            Voice::Leo => "Leo",
        }
    }
}

impl std::str::FromStr for Voice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ara" => Ok(Voice::Ara),
            "eve" => Ok(Voice::Eve),
            "leo" => Ok(Voice::Leo),
            _ => Err(ConfigError::UnknownVoice(s.to_string())),
        }
    }
}

/// Problems with the connection settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No auth token configured")]
    MissingToken,

    #[error("No server URL configured")]
    MissingServerUrl,

    #[error("unknown voice: {0}")]
    UnknownVoice(String),
}

/// Room server settings the session needs to connect
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub server_url: String,
    pub token: Option<String>,
}

impl Credentials {
    /// Return `(url, token)` or the first missing piece
    pub fn require(&self) -> Result<(&str, &str), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        match self.token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok((&self.server_url, token)),
            _ => Err(ConfigError::MissingToken),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Contents of `settings.json`; every field optional
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server_url: Option<String>,
    token: Option<String>,
    voice: Option<Voice>,
    level_hz: Option<u32>,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Room server and auth token
    pub credentials: Credentials,

    /// Voice the agent answers with
    pub voice: Voice,

    /// Audio level sampling rate in Hz
    pub level_hz: u32,
}

impl Config {
    /// Load configuration from defaults, the settings file and environment
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("notch-voice");

        let mut config = Self::with_data_dir(data_dir);
        if let Some(settings) = read_settings(&config.data_dir.join(SETTINGS_FILE))? {
            config.apply_settings(settings);
        }
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            credentials: Credentials {
                server_url: DEFAULT_SERVER_URL.to_string(),
                token: None,
            },
            voice: Voice::default(),
            level_hz: DEFAULT_LEVEL_HZ,
        }
    }

    fn apply_settings(&mut self, settings: SettingsFile) {
        if let Some(url) = settings.server_url {
            self.credentials.server_url = url;
        }
        if settings.token.is_some() {
            self.credentials.token = settings.token;
        }
        if let Some(voice) = settings.voice {
            self.voice = voice;
        }
        if let Some(hz) = settings.level_hz {
            self.level_hz = hz;
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("NOTCH_VOICE_URL") {
            self.credentials.server_url = url;
        }
        if let Some(token) = var("NOTCH_VOICE_TOKEN") {
            self.credentials.token = Some(token);
        }
        if let Some(voice) = var("NOTCH_VOICE_VOICE") {
            self.voice = voice.parse()?;
        }
        if let Some(socket) = var("NOTCH_VOICE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(hz) = var("NOTCH_VOICE_LEVEL_HZ") {
            self.level_hz = hz
                .parse()
                .with_context(|| format!("invalid NOTCH_VOICE_LEVEL_HZ: {}", hz))?;
        }
        Ok(())
    }

    /// Interval between audio level samples
    pub fn level_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.level_hz.max(1)))
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn read_settings(path: &Path) -> Result<Option<SettingsFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let settings = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir(PathBuf::from("/tmp/nv"));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/nv/daemon.sock"));
        assert_eq!(config.credentials.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.credentials.require(), Err(ConfigError::MissingToken));
        assert_eq!(config.voice, Voice::Ara);
        assert_eq!(config.level_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"server_url":"wss://rooms.example.com","token":"abc","voice":"Leo"}"#,
        )
        .unwrap();

        let mut config = Config::with_data_dir(dir.path().to_path_buf());
        config.apply_settings(read_settings(&path).unwrap().unwrap());

        assert_eq!(
            config.credentials.require().unwrap(),
            ("wss://rooms.example.com", "abc")
        );
        assert_eq!(config.voice, Voice::Leo);
        assert_eq!(config.level_hz, DEFAULT_LEVEL_HZ);
    }

    #[test]
    fn test_missing_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_settings(&dir.path().join(SETTINGS_FILE)).unwrap().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NOTCH_VOICE_TOKEN", "env-token"),
            ("NOTCH_VOICE_VOICE", "eve"),
            ("NOTCH_VOICE_LEVEL_HZ", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::with_data_dir(PathBuf::from("/tmp/nv"));
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.credentials.token.as_deref(), Some("env-token"));
        assert_eq!(config.voice, Voice::Eve);
        assert_eq!(config.level_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_env_voice() {
        let mut config = Config::with_data_dir(PathBuf::from("/tmp/nv"));
        let result = config.apply_env(|key| (key == "NOTCH_VOICE_VOICE").then(|| "bob".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_url() {
        let credentials = Credentials {
            server_url: "  ".to_string(),
            token: Some("t".to_string()),
        };
        assert_eq!(credentials.require(), Err(ConfigError::MissingServerUrl));
    }

    #[test]
    fn test_token_redacted() {
        let credentials = Credentials {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token: Some("secret".to_string()),
        };
        assert!(!format!("{:?}", credentials).contains("secret"));
    }
}
