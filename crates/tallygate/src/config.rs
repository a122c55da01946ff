//! Configuration for the tallygate gateway.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "TALLYGATE_";

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and mode settings.
    pub gateway: GatewaySettings,
    /// Upstream (real backend) settings.
    pub upstream: UpstreamSettings,
    /// Contract settings.
    pub contract: ContractSettings,
    /// Capture log settings.
    pub capture: CaptureSettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl GatewayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid JSON: {e}"))),
            _ => Err(GatewayError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables are prefixed with `TALLYGATE_` and use
    /// uppercase `snake_case`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which receives the full
    /// variable name (e.g. `TALLYGATE_MODE`).
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(mode) = var("MODE") {
            self.gateway.mode = mode;
        }

        if let Some(addr) = var("LISTEN_ADDR") {
            self.gateway.listen_addr = addr;
        }

        if let Some(port) = var("LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                self.gateway.listen_port = port;
            }
        }

        if let Some(prefix) = var("ROUTE_PREFIX") {
            self.gateway.route_prefix = prefix;
        }

        if let Some(url) = var("UPSTREAM_URL") {
            self.upstream.base_url = url;
        }

        if let Some(token) = var("BEARER_TOKEN") {
            self.upstream.bearer_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Some(timeout) = var("UPSTREAM_TIMEOUT") {
            if let Ok(timeout) = humantime_serde::parse_duration(&timeout) {
                self.upstream.timeout = timeout;
            }
        }

        if let Some(path) = var("CONTRACT_PATH") {
            self.contract.path = Some(PathBuf::from(path));
        }

        if let Some(flag) = var("VALIDATE_CAPTURES") {
            if let Ok(flag) = flag.parse() {
                self.contract.validate_captures = flag;
            }
        }

        if let Some(path) = var("CAPTURE_LOG") {
            self.capture.log_path = PathBuf::from(path);
        }

        if let Some(level) = var("LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        self
    }

    /// The configured mode, falling back to mock (with a warning) when the
    /// configured value is not recognized.
    pub fn mode(&self) -> GatewayMode {
        GatewayMode::parse(&self.gateway.mode).unwrap_or_else(|| {
            warn!(
                configured = %self.gateway.mode,
                "unrecognized gateway mode, falling back to mock"
            );
            GatewayMode::Mock
        })
    }

    /// Whether the configured mode needs the contract loaded.
    pub fn needs_contract(&self) -> bool {
        match GatewayMode::parse(&self.gateway.mode).unwrap_or(GatewayMode::Mock) {
            GatewayMode::Mock => true,
            GatewayMode::Capture => self.contract.validate_captures,
            GatewayMode::Proxy => false,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        let base_url = &self.upstream.base_url;
        if base_url.is_empty() {
            return Err(GatewayError::config("upstream.base_url is required"));
        }

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(GatewayError::config(
                "upstream.base_url must start with http:// or https://",
            ));
        }

        if self.upstream.timeout.is_zero() {
            return Err(GatewayError::config("upstream.timeout must be greater than zero"));
        }

        let prefix = &self.gateway.route_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(GatewayError::config(
                "gateway.route_prefix must start with '/' and must not end with '/'",
            ));
        }

        for (name, path) in [
            ("gateway.health_path", &self.gateway.health_path),
            ("gateway.metrics_path", &self.gateway.metrics_path),
        ] {
            if !path.starts_with('/') {
                return Err(GatewayError::config(format!("{name} must start with '/'")));
            }
            if path == prefix || path.starts_with(&format!("{prefix}/")) {
                return Err(GatewayError::config(format!(
                    "{name} must not be under the routing prefix {prefix}"
                )));
            }
        }

        if self.needs_contract() && self.contract.path.is_none() {
            return Err(GatewayError::config(format!(
                "contract.path is required in {} mode",
                self.gateway.mode
            )));
        }

        Ok(())
    }
}

/// How the gateway satisfies requests. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Serve responses synthesized from the contract.
    #[default]
    Mock,
    /// Forward to the upstream and relay the response as it streams.
    Proxy,
    /// Forward to the upstream and record every exchange.
    Capture,
}

impl GatewayMode {
    /// Parse a mode name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "proxy" => Some(Self::Proxy),
            "capture" => Some(Self::Capture),
            _ => None,
        }
    }

    /// Lowercase mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Proxy => "proxy",
            Self::Capture => "capture",
        }
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener and mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port the gateway listens on.
    pub listen_port: u16,
    /// Mode name (`mock`, `proxy` or `capture`).
    pub mode: String,
    /// Inbound path prefix routed to the dispatcher and stripped before
    /// matching or forwarding.
    pub route_prefix: String,
    /// Health check path.
    pub health_path: String,
    /// Prometheus metrics path.
    pub metrics_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            mode: GatewayMode::Mock.as_str().to_string(),
            route_prefix: "/api".to_string(),
            health_path: "/health".to_string(),
            metrics_path: "/_tallygate/metrics".to_string(),
        }
    }
}

/// Upstream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Base origin of the real API; a base path is preserved.
    pub base_url: String,
    /// Bearer credential injected into forwarded requests.
    pub bearer_token: Option<String>,
    /// Timeout for upstream requests.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox-quickbooks.api.intuit.com".to_string(),
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Contract settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSettings {
    /// Path to the OpenAPI document.
    pub path: Option<PathBuf>,
    /// Validate requests in capture mode before forwarding them.
    pub validate_captures: bool,
}

/// Capture log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Append-only NDJSON file receiving one line per exchange.
    pub log_path: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("captures.ndjson"),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log filter directive (e.g. `info`, `tallygate=debug,warn`).
    pub log_level: String,
    /// Emit JSON logs; pretty output otherwise.
    pub json_logs: bool,
    /// Expose Prometheus metrics on the metrics path.
    pub metrics_enabled: bool,
    /// Service name for telemetry.
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
            service_name: "tallygate".to_string(),
        }
    }
}

/// Builder for `GatewayConfig`.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the mode.
    #[must_use]
    pub fn mode(mut self, mode: GatewayMode) -> Self {
        self.config.gateway.mode = mode.as_str().to_string();
        self
    }

    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.gateway.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.gateway.listen_port = port;
        self
    }

    /// Set the routing prefix.
    #[must_use]
    pub fn route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.gateway.route_prefix = prefix.into();
        self
    }

    /// Set the upstream base URL.
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.base_url = url.into();
        self
    }

    /// Set the bearer credential.
    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.upstream.bearer_token = Some(token.into());
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream.timeout = timeout;
        self
    }

    /// Set the contract path.
    #[must_use]
    pub fn contract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.contract.path = Some(path.into());
        self
    }

    /// Validate requests in capture mode.
    #[must_use]
    pub fn validate_captures(mut self, enabled: bool) -> Self {
        self.config.contract.validate_captures = enabled;
        self
    }

    /// Set the capture log path.
    #[must_use]
    pub fn capture_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.capture.log_path = path.into();
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.telemetry.log_level = level.into();
        self
    }

    /// Enable or disable the metrics endpoint.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.telemetry.metrics_enabled = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Duration (de)serialization using humantime-like strings (`500ms`, `30s`,
/// `2m`, `1h`; a bare number means seconds).
mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit) = if let Some(stripped) = s.strip_suffix("ms") {
            (stripped, 0)
        } else if let Some(stripped) = s.strip_suffix('s') {
            (stripped, 1)
        } else if let Some(stripped) = s.strip_suffix('m') {
            (stripped, 60)
        } else if let Some(stripped) = s.strip_suffix('h') {
            (stripped, 3600)
        } else {
            // Assume seconds
            (s, 1)
        };

        let n: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: '{s}'"))?;
        Ok(if unit == 0 {
            Duration::from_millis(n)
        } else {
            Duration::from_secs(n.saturating_mul(unit))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn contract_config() -> GatewayConfigBuilder {
        GatewayConfig::builder().contract_path("contract.json")
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.gateway.listen_port, 8080);
        assert_eq!(config.gateway.route_prefix, "/api");
        assert_eq!(config.gateway.health_path, "/health");
        assert_eq!(config.mode(), GatewayMode::Mock);
        assert_eq!(config.upstream.timeout, Duration::from_secs(30));
        assert!(config.upstream.bearer_token.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = contract_config()
            .mode(GatewayMode::Capture)
            .listen_port(9000)
            .upstream_url("http://backend:3000/base")
            .upstream_timeout(Duration::from_secs(60))
            .bearer_token("secret")
            .capture_log("/tmp/captures.ndjson")
            .build()
            .unwrap();

        assert_eq!(config.mode(), GatewayMode::Capture);
        assert_eq!(config.gateway.listen_port, 9000);
        assert_eq!(config.upstream.base_url, "http://backend:3000/base");
        assert_eq!(config.upstream.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.capture.log_path, PathBuf::from("/tmp/captures.ndjson"));
    }

    #[test]
    fn test_config_validation() {
        assert!(contract_config().upstream_url("").build().is_err());
        assert!(contract_config().upstream_url("invalid-url").build().is_err());
        assert!(contract_config().route_prefix("api").build().is_err());
        assert!(contract_config().route_prefix("/api/").build().is_err());
        assert!(contract_config().upstream_timeout(Duration::ZERO).build().is_err());
        assert!(contract_config().upstream_url("http://localhost:3000").build().is_ok());
    }

    #[test]
    fn test_health_path_outside_prefix() {
        let mut config = GatewayConfig::default();
        config.contract.path = Some(PathBuf::from("contract.json"));
        config.gateway.health_path = "/api/health".to_string();
        assert!(config.validate().is_err());

        config.gateway.health_path = "/apihealth".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_contract_required_by_mode() {
        assert!(GatewayConfig::builder().mode(GatewayMode::Mock).build().is_err());
        assert!(GatewayConfig::builder().mode(GatewayMode::Proxy).build().is_ok());
        assert!(GatewayConfig::builder().mode(GatewayMode::Capture).build().is_ok());
        assert!(GatewayConfig::builder()
            .mode(GatewayMode::Capture)
            .validate_captures(true)
            .build()
            .is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(GatewayMode::parse("PROXY"), Some(GatewayMode::Proxy));
        assert_eq!(GatewayMode::parse(" capture "), Some(GatewayMode::Capture));
        assert_eq!(GatewayMode::parse("replay"), None);

        let mut config = GatewayConfig::default();
        config.gateway.mode = "replay".to_string();
        assert_eq!(config.mode(), GatewayMode::Mock);
        assert!(config.needs_contract());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("TALLYGATE_MODE", "Proxy"),
            ("TALLYGATE_LISTEN_PORT", "9999"),
            ("TALLYGATE_UPSTREAM_URL", "http://127.0.0.1:4000"),
            ("TALLYGATE_UPSTREAM_TIMEOUT", "750ms"),
            ("TALLYGATE_BEARER_TOKEN", "abc"),
            ("TALLYGATE_VALIDATE_CAPTURES", "true"),
            ("TALLYGATE_CAPTURE_LOG", "/var/log/tally.ndjson"),
            ("TALLYGATE_LOG_LEVEL", "debug"),
        ]);
        let config = GatewayConfig::default()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.mode(), GatewayMode::Proxy);
        assert_eq!(config.gateway.listen_port, 9999);
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:4000");
        assert_eq!(config.upstream.timeout, Duration::from_millis(750));
        assert_eq!(config.upstream.bearer_token.as_deref(), Some("abc"));
        assert!(config.contract.validate_captures);
        assert_eq!(config.capture.log_path, PathBuf::from("/var/log/tally.ndjson"));
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let env = HashMap::from([("TALLYGATE_LISTEN_PORT", "not-a-port"), ("TALLYGATE_UPSTREAM_TIMEOUT", "soon")]);
        let config = GatewayConfig::default()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.gateway.listen_port, 8080);
        assert_eq!(config.upstream.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("15"), Ok(Duration::from_secs(15)));
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_toml_config() {
        let toml = r#"
[gateway]
listen_port = 8081
mode = "capture"

[upstream]
base_url = "http://localhost:3000"
timeout = "5s"

[contract]
path = "accounting.json"
validate_captures = true

[capture]
log_path = "exchanges.ndjson"

[telemetry]
json_logs = false
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway.listen_port, 8081);
        assert_eq!(config.mode(), GatewayMode::Capture);
        assert_eq!(config.upstream.timeout, Duration::from_secs(5));
        assert!(config.contract.validate_captures);
        assert_eq!(config.capture.log_path, PathBuf::from("exchanges.ndjson"));
        assert!(!config.telemetry.json_logs);
        assert_eq!(config.gateway.route_prefix, "/api");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_formats() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("tallygate.json");
        std::fs::write(&json_path, r#"{"gateway": {"mode": "proxy"}}"#).unwrap();
        let config = GatewayConfig::from_file(&json_path).unwrap();
        assert_eq!(config.mode(), GatewayMode::Proxy);

        let yaml_path = dir.path().join("tallygate.yaml");
        std::fs::write(&yaml_path, "gateway: {}").unwrap();
        assert!(GatewayConfig::from_file(&yaml_path).is_err());
    }
}
