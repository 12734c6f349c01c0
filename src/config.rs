use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default delay between reconnect attempts for an endpoint.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Default address the cell binds when neither the config nor the CLI set one.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Top-level cell config, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellConfig {
    /// Local server identity and HTTP options.
    #[serde(default)]
    pub server: ServerSection,
    /// Where telemetry events go.
    #[serde(default)]
    pub telemetry: TelemetrySection,
    /// Remote endpoints to federate with.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Override system hostname as the cell name.
    pub name: Option<String>,
    /// Version advertised in the MCP handshake.
    pub version: Option<String>,
    /// Address to bind the HTTP server.
    pub bind: Option<SocketAddr>,
    /// Instructions advertised to MCP clients.
    pub instructions: Option<String>,
    /// Register the built-in soma_* introspection tools.
    #[serde(default = "default_true")]
    pub introspection: bool,
    /// Serve the HTML dashboard at /dashboard.
    #[serde(default = "default_true")]
    pub dashboard: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            bind: None,
            instructions: None,
            introspection: true,
            dashboard: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySink {
    #[default]
    Log,
    None,
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default)]
    pub sink: TelemetrySink,
    /// Prefix prepended to every logged event.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            sink: TelemetrySink::default(),
            prefix: default_prefix(),
        }
    }
}

/// A single remote endpoint entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique key within the cell.
    pub id: String,
    /// Display name, falls back to `id`.
    pub name: Option<String>,
    /// Streamable HTTP URL of the remote MCP endpoint.
    pub url: String,
    /// Schedule a retry after a failed connection attempt.
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Install local proxies for the endpoint's tools once connected.
    #[serde(default = "default_true")]
    pub proxy_tools: bool,
    /// Prefix for proxied tool names, falls back to `<id>_`.
    pub tool_prefix: Option<String>,
    /// Abandon a connection attempt that takes longer than this.
    pub connect_timeout_ms: Option<u64>,
}

impl EndpointConfig {
    /// Config with every optional field at its default.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: url.into(),
            reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            proxy_tools: true,
            tool_prefix: None,
            connect_timeout_ms: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    pub fn with_proxy_tools(mut self, proxy_tools: bool) -> Self {
        self.proxy_tools = proxy_tools;
        self
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn tool_prefix(&self) -> String {
        self.tool_prefix
            .clone()
            .unwrap_or_else(|| format!("{}_", self.id))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Check the fields that cannot be expressed in the type.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("endpoint id must not be empty".into());
        }
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| format!("endpoint '{}' has invalid url '{}': {}", self.id, self.url, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!(
                "endpoint '{}' url must use http or https (got '{}')",
                self.id,
                url.scheme()
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(format!(
                "endpoint '{}' reconnect_interval_ms must be greater than 0",
                self.id
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_prefix() -> String {
    "[soma]".to_string()
}

impl CellConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Reject duplicate endpoint ids and malformed endpoint entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate().map_err(ConfigError::Invalid)?;
            if !seen.insert(endpoint.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint id '{}'",
                    endpoint.id
                )));
            }
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/soma/cell.toml`, when a config directory exists.
pub fn default_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("soma").join("cell.toml"))
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::path::PathBuf, std::io::Error),
    ParseFailed(std::path::PathBuf, toml::de::Error),
    WriteFailed(std::path::PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
    Invalid(String),
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
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
            Self::Invalid(detail) => write!(f, "Invalid config: {}", detail),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Check file permissions on a config file and warn if world-readable.
///
/// Endpoint URLs may embed credentials, so a world-readable file is worth a
/// warning on Unix.
#[cfg(unix)]
pub fn check_config_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Cell config file {} is world-readable (mode {:o}). \
             Endpoint URLs may carry credentials -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &std::path::Path) {}

/// Returns true if the given file mode has the world-readable bit set.
#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

/// Resolve the cell's name. Uses config override if present,
/// otherwise falls back to system hostname.
pub fn resolve_cell_name(server: &ServerSection) -> String {
    if let Some(name) = &server.name {
        return name.clone();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "soma".to_string())
}
