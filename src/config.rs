use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hier::Delimiter;

/// Port cross-probing listens on (server) or dials (client) by default.
pub const DEFAULT_PORT: u16 = 42000;

/// How many consecutive ports the server tries before giving up.
pub const DEFAULT_PORT_SPAN: u16 = 1000;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// External viewer on the other end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    #[default]
    CustomWaveView,
    Verdi,
    Other,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomWaveView => "customwaveview",
            Self::Verdi => "verdi",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customwaveview" => Ok(Self::CustomWaveView),
            "verdi" => Ok(Self::Verdi),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

/// Which side of the TCP link this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Server,
    Client,
}

/// Where the link lives and which tool is on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub tool: ToolName,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            tool: ToolName::default(),
        }
    }
}

impl EndpointConfig {
    /// `host:port` for logging and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Cross-probe settings, loaded from TOML. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossProbeConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tool: Option<ToolName>,
    pub role: Option<Role>,
    pub connect_timeout_ms: Option<u64>,
    pub port_span: Option<u16>,
    pub single_session: Option<bool>,
    pub delimiter: Option<Delimiter>,
    /// Plain-text file of `<tool> <port>` lines assigning ports per tool.
    pub port_band_file: Option<PathBuf>,
}

impl CrossProbeConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn tool(&self) -> ToolName {
        self.tool.unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Resolve the endpoint.
    ///
    /// An explicit `port` wins; otherwise the port band file is consulted for
    /// the configured tool, then the default port applies. A port band file
    /// that cannot be read is logged and skipped.
    pub fn endpoint(&self) -> EndpointConfig {
        let tool = self.tool();
        let band_port = match (&self.port, &self.port_band_file) {
            (None, Some(path)) => match load_port_band(path, tool) {
                Ok(port) => port,
                Err(e) => {
                    tracing::error!("{e}");
                    None
                }
            },
            _ => None,
        };
        EndpointConfig {
            host: self.host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: self.port.or(band_port).unwrap_or(DEFAULT_PORT),
            tool,
        }
    }
}

/// Default config location: `<config_dir>/crossprobe/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crossprobe").join("config.toml"))
}

/// Look up the port assigned to `tool` in a port band file.
pub fn load_port_band(path: &Path, tool: ToolName) -> Result<Option<u16>, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
    Ok(parse_port_band(&contents, tool))
}

/// First line mentioning the tool name whose second column is a port.
fn parse_port_band(contents: &str, tool: ToolName) -> Option<u16> {
    contents
        .lines()
        .filter(|line| line.to_lowercase().contains(tool.as_str()))
        .find_map(|line| line.split_whitespace().nth(1)?.parse().ok())
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config: CrossProbeConfig = toml::from_str("").unwrap();
        let endpoint = config.endpoint();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.tool, ToolName::CustomWaveView);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.role.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            host = "10.0.1.10"
            port = 43000
            tool = "verdi"
            role = "client"
            connect_timeout_ms = 250
            port_span = 10
            single_session = false
            delimiter = "/"
        "#;
        let config: CrossProbeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.role, Some(Role::Client));
        assert_eq!(config.port_span, Some(10));
        assert_eq!(config.single_session, Some(false));
        assert_eq!(config.delimiter, Some(Delimiter::Slash));
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.endpoint(),
            EndpointConfig {
                host: "10.0.1.10".into(),
                port: 43000,
                tool: ToolName::Verdi,
            }
        );
    }

    #[test]
    fn rejects_unknown_tool() {
        let result: Result<CrossProbeConfig, _> = toml::from_str(r#"tool = "gtkwave""#);
        assert!(result.is_err());
    }

    #[test]
    fn port_band_lookup() {
        let contents = "# tool port\ncustomwaveview 42100\nVerdi 42200\n";
        assert_eq!(parse_port_band(contents, ToolName::CustomWaveView), Some(42100));
        assert_eq!(parse_port_band(contents, ToolName::Verdi), Some(42200));
        assert_eq!(parse_port_band(contents, ToolName::Other), None);
    }

    #[test]
    fn port_band_skips_lines_without_port() {
        let contents = "verdi\nverdi 42300\n";
        assert_eq!(parse_port_band(contents, ToolName::Verdi), Some(42300));
    }

    #[test]
    fn port_band_file_sets_endpoint_port() {
        let dir = tempfile::tempdir().unwrap();
        let band = dir.path().join("portband");
        std::fs::write(&band, "verdi 42555\n").unwrap();

        let config = CrossProbeConfig {
            tool: Some(ToolName::Verdi),
            port_band_file: Some(band),
            ..Default::default()
        };
        assert_eq!(config.endpoint().port, 42555);
    }

    #[test]
    fn explicit_port_beats_port_band() {
        let dir = tempfile::tempdir().unwrap();
        let band = dir.path().join("portband");
        std::fs::write(&band, "verdi 42555\n").unwrap();

        let config = CrossProbeConfig {
            tool: Some(ToolName::Verdi),
            port: Some(42001),
            port_band_file: Some(band),
            ..Default::default()
        };
        assert_eq!(config.endpoint().port, 42001);
    }

    #[test]
    fn missing_port_band_falls_back_to_default() {
        let config = CrossProbeConfig {
            port_band_file: Some(PathBuf::from("/nonexistent/portband")),
            ..Default::default()
        };
        assert_eq!(config.endpoint().port, DEFAULT_PORT);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CrossProbeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        let err = CrossProbeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(..)));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn tool_name_from_str() {
        assert_eq!("Verdi".parse::<ToolName>().unwrap(), ToolName::Verdi);
        assert!("nope".parse::<ToolName>().is_err());
    }
}
