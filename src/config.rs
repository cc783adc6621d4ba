//! Server configuration module
//!
//! Handles loading and parsing of engine configuration from files and environment variables.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::IvMode;

/// Longest admission window accepted by `validate` (one day)
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Largest session cap the connection semaphore can hold
pub const MAX_CONNECTIONS: usize = {
    let permits = tokio::sync::Semaphore::MAX_PERMITS;
    if permits < u32::MAX as usize {
        permits
    } else {
        u32::MAX as usize
    }
};

/// Which line-oriented service this process hosts.
///
/// The engine is identical for every kind; the kind only selects port and
/// admission presets plus the demo command set in the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Login,
    Character,
    Chat,
    Auction,
    Quest,
    Game,
}

impl ServiceKind {
    /// Preset listening port
    pub fn default_port(self) -> u16 {
        match self {
            ServiceKind::Login => 25564,
            ServiceKind::Game => 25565,
            ServiceKind::Chat => 25566,
            ServiceKind::Quest => 25567,
            ServiceKind::Character => 25568,
            ServiceKind::Auction => 25569,
        }
    }

    /// Preset admission budget per window
    pub fn default_max_requests(self) -> u32 {
        match self {
            ServiceKind::Game => 200,
            _ => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Login => "login",
            ServiceKind::Character => "character",
            ServiceKind::Chat => "chat",
            ServiceKind::Auction => "auction",
            ServiceKind::Quest => "quest",
            ServiceKind::Game => "game",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "login" => Ok(ServiceKind::Login),
            "character" => Ok(ServiceKind::Character),
            "chat" => Ok(ServiceKind::Chat),
            "auction" => Ok(ServiceKind::Auction),
            "quest" => Ok(ServiceKind::Quest),
            "game" => Ok(ServiceKind::Game),
            other => Err(format!("unknown service kind: {}", other)),
        }
    }
}

/// How frames are delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// One read is one frame; encrypted or plaintext is guessed by trying to decrypt
    #[default]
    Legacy,
    /// u32 big-endian length prefix, then a mode tag byte, then the payload
    Framed,
}

impl FromStr for WireMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(WireMode::Legacy),
            "framed" => Ok(WireMode::Framed),
            other => Err(format!("unknown wire mode: {}", other)),
        }
    }
}

/// Log output format for the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Hosted service
    #[serde(default)]
    pub service: ServiceKind,

    /// Address to bind the listener on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listening port; the service preset applies when unset
    #[serde(default)]
    pub port: Option<u16>,

    /// Admission control
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Cipher transport
    #[serde(default)]
    pub cipher: CipherConfig,

    /// Socket and framing limits
    #[serde(default)]
    pub network: NetworkConfig,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Admission controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Requests per window; the service preset applies when unset
    #[serde(default)]
    pub max_requests: Option<u32>,

    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Interval between idle-window sweeps in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Also charge every non-empty frame against the budget
    #[serde(default)]
    pub limit_messages: bool,
}

/// Cipher transport configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct CipherConfig {
    /// Encrypt responses and attempt to decrypt requests
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shared secret the key material is derived from
    #[serde(default = "default_passphrase")]
    pub passphrase: String,

    /// IV handling
    #[serde(default)]
    pub iv_mode: IvMode,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Frame delimiting
    #[serde(default)]
    pub wire_mode: WireMode,

    /// Size of a single socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Longest accepted message after decryption and trimming
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Largest accepted framed-mode frame body
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Concurrent session cap
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds `stop` waits for sessions to finish
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Status log interval in seconds (0 to disable)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Set TCP_NODELAY on accepted sockets
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_window_secs() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_true() -> bool {
    true
}

// Shared development secret; deployments override it
fn default_passphrase() -> String {
    "linewire-shared-secret-change-me".to_string()
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_max_message_len() -> usize {
    4096
}

fn default_max_frame_size() -> usize {
    65536
}

fn default_max_connections() -> usize {
    1024
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_status_interval() -> u64 {
    60
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: None,
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_cleanup_interval(),
            limit_messages: false,
        }
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            passphrase: default_passphrase(),
            iv_mode: IvMode::default(),
        }
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("enabled", &self.enabled)
            .field("passphrase", &"<redacted>")
            .field("iv_mode", &self.iv_mode)
            .finish()
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wire_mode: WireMode::default(),
            read_buffer_size: default_read_buffer_size(),
            max_message_len: default_max_message_len(),
            max_frame_size: default_max_frame_size(),
            max_connections: default_max_connections(),
            shutdown_grace_secs: default_shutdown_grace(),
            status_interval_secs: default_status_interval(),
            nodelay: default_true(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            service: ServiceKind::default(),
            bind_address: default_bind_address(),
            port: None,
            admission: AdmissionConfig::default(),
            cipher: CipherConfig::default(),
            network: NetworkConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults for a given service
    pub fn for_service(service: ServiceKind) -> Self {
        Self {
            service,
            ..Self::default()
        }
    }

    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("LINEWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = if config_path.exists() {
            Self::read_file(&config_path).await?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, without environment overrides
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::read_file(path).await?;
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LINEWIRE_SERVICE") {
            match val.parse() {
                Ok(service) => self.service = service,
                Err(e) => tracing::warn!("Ignoring LINEWIRE_SERVICE: {}", e),
            }
        }
        if let Ok(val) = env::var("LINEWIRE_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("LINEWIRE_PORT") {
            if let Ok(port) = val.parse() {
                self.port = Some(port);
            }
        }
        if let Ok(val) = env::var("LINEWIRE_PASSPHRASE") {
            self.cipher.passphrase = val;
        }
        if let Ok(val) = env::var("LINEWIRE_ENCRYPTION") {
            self.cipher.enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("LINEWIRE_IV_MODE") {
            match val.parse() {
                Ok(mode) => self.cipher.iv_mode = mode,
                Err(e) => tracing::warn!("Ignoring LINEWIRE_IV_MODE: {}", e),
            }
        }
        if let Ok(val) = env::var("LINEWIRE_MAX_REQUESTS") {
            if let Ok(max) = val.parse() {
                self.admission.max_requests = Some(max);
            }
        }
        if let Ok(val) = env::var("LINEWIRE_WINDOW_SECS") {
            if let Ok(secs) = val.parse() {
                self.admission.window_secs = secs;
            }
        }
        if let Ok(val) = env::var("LINEWIRE_WIRE_MODE") {
            match val.parse() {
                Ok(mode) => self.network.wire_mode = mode,
                Err(e) => tracing::warn!("Ignoring LINEWIRE_WIRE_MODE: {}", e),
            }
        }
        if let Ok(val) = env::var("LINEWIRE_MAX_CONNECTIONS") {
            if let Ok(max) = val.parse() {
                self.network.max_connections = max;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_requests() == 0 {
            anyhow::bail!("Admission max_requests must be at least 1");
        }
        if self.admission.window_secs == 0 {
            anyhow::bail!("Admission window must be at least 1 second");
        }
        if self.admission.window_secs > MAX_WINDOW_SECS {
            anyhow::bail!("Admission window cannot exceed {} seconds", MAX_WINDOW_SECS);
        }
        if self.admission.cleanup_interval_secs == 0 {
            anyhow::bail!("Admission cleanup interval must be at least 1 second");
        }
        if self.cipher.enabled && self.cipher.passphrase.is_empty() {
            anyhow::bail!("Cipher passphrase cannot be empty while encryption is enabled");
        }
        if self.network.read_buffer_size == 0 {
            anyhow::bail!("Read buffer size must be greater than 0");
        }
        if self.network.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }
        if self.network.max_connections > MAX_CONNECTIONS {
            anyhow::bail!("Max connections cannot exceed {}", MAX_CONNECTIONS);
        }
        if self.network.max_frame_size < self.network.max_message_len {
            anyhow::bail!("Max frame size cannot be smaller than max message length");
        }

        Ok(())
    }

    /// Effective listening port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.service.default_port())
    }

    /// Effective admission budget per window
    pub fn max_requests(&self) -> u32 {
        self.admission
            .max_requests
            .unwrap_or_else(|| self.service.default_max_requests())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.service, ServiceKind::Login);
        assert_eq!(config.port(), 25564);
        assert_eq!(config.max_requests(), 100);
        assert_eq!(config.admission.window_secs, 60);
        assert_eq!(config.admission.cleanup_interval_secs, 300);
        assert!(config.cipher.enabled);
        assert_eq!(config.cipher.iv_mode, IvMode::Random);
        assert_eq!(config.network.wire_mode, WireMode::Legacy);
        assert_eq!(config.network.max_message_len, 4096);
    }

    #[test]
    fn test_service_presets() {
        let game = ServerConfig::for_service(ServiceKind::Game);
        assert_eq!(game.port(), 25565);
        assert_eq!(game.max_requests(), 200);

        let auction = ServerConfig::for_service(ServiceKind::Auction);
        assert_eq!(auction.port(), 25569);
        assert_eq!(auction.max_requests(), 100);

        let mut chat = ServerConfig::for_service(ServiceKind::Chat);
        chat.port = Some(9000);
        chat.admission.max_requests = Some(5);
        assert_eq!(chat.port(), 9000);
        assert_eq!(chat.max_requests(), 5);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.admission.max_requests = Some(0);
        assert!(config.validate().is_err());
        config.admission.max_requests = None;

        config.admission.window_secs = 0;
        assert!(config.validate().is_err());
        config.admission.window_secs = 60;

        config.cipher.passphrase.clear();
        assert!(config.validate().is_err());
        // Passphrase only matters while encryption is on
        config.cipher.enabled = false;
        assert!(config.validate().is_ok());

        config.network.max_frame_size = 100;
        assert!(config.validate().is_err());
        config.network.max_frame_size = 65536;

        config.network.max_connections = 0;
        assert!(config.validate().is_err());
        config.network.max_connections = MAX_CONNECTIONS + 1;
        assert!(config.validate().is_err());
        config.network.max_connections = MAX_CONNECTIONS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_unusable_admission_timing() {
        let mut config = ServerConfig::default();

        // A zero period cannot drive the cleanup ticker
        config.admission.cleanup_interval_secs = 0;
        assert!(config.validate().is_err());
        config.admission.cleanup_interval_secs = 1;
        assert!(config.validate().is_ok());

        config.admission.window_secs = u64::MAX;
        assert!(config.validate().is_err());
        config.admission.window_secs = MAX_WINDOW_SECS;
        assert!(config.validate().is_ok());

        assert!(ServerConfig::from_toml_str("[admission]\ncleanup_interval_secs = 0").is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = ServerConfig::from_toml_str(
            r#"
            service = "game"
            port = 4000
            log_format = "json"

            [admission]
            window_secs = 30
            limit_messages = true

            [cipher]
            passphrase = "s3cret"
            iv_mode = "fixed"

            [network]
            wire_mode = "framed"
            max_connections = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.service, ServiceKind::Game);
        assert_eq!(config.port(), 4000);
        assert_eq!(config.max_requests(), 200);
        assert_eq!(config.admission.window_secs, 30);
        assert!(config.admission.limit_messages);
        assert_eq!(config.cipher.passphrase, "s3cret");
        assert_eq!(config.cipher.iv_mode, IvMode::Fixed);
        assert_eq!(config.network.wire_mode, WireMode::Framed);
        assert_eq!(config.network.max_connections, 8);
        assert_eq!(config.network.read_buffer_size, 4096);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_toml_str_rejects_invalid() {
        assert!(ServerConfig::from_toml_str("service = \"lobby\"").is_err());
        assert!(ServerConfig::from_toml_str("[admission]\nwindow_secs = 0").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service = \"quest\"\n[admission]\nmax_requests = 7").unwrap();

        let config = ServerConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.service, ServiceKind::Quest);
        assert_eq!(config.port(), 25567);
        assert_eq!(config.max_requests(), 7);
        assert_eq!(config.config_path, file.path());
    }

    #[tokio::test]
    async fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServerConfig::load_from(dir.path().join("absent.toml")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_cipher_config_debug_redacts_passphrase() {
        let config = CipherConfig::default();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&config.passphrase));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Game".parse::<ServiceKind>(), Ok(ServiceKind::Game));
        assert_eq!("framed".parse::<WireMode>(), Ok(WireMode::Framed));
        assert!("udp".parse::<WireMode>().is_err());
        assert_eq!(ServiceKind::Character.to_string(), "character");
    }
}
