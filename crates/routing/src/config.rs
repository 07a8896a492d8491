//! Routing configuration: managed backends, their spans and health policy.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chunknet_net_transport::TransportConfig;
use chunknet_primitives::{HashSpan, HostAddress};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Consecutive transport failures after which a backend is taken offline.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// How long an offline backend is skipped before it is tried again.
pub const DEFAULT_OFFLINE_BACKOFF: Duration = Duration::from_secs(10);

/// Errors loading or validating a [`RoutingConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML was malformed or did not match the schema.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    /// A backend was configured without spans.
    #[error("backend {0} owns no hash spans")]
    NoSpans(HostAddress),

    /// The same backend was configured twice.
    #[error("backend {0} is configured more than once")]
    DuplicateHost(HostAddress),
}

/// One managed backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether the backend requires a secured transport.
    #[serde(default)]
    pub secure: bool,
    /// Inclusive hash ranges the backend owns.
    pub spans: Vec<HashSpan>,
}

impl BackendConfig {
    /// Backend at `address` owning `spans`.
    pub fn new(address: &HostAddress, spans: impl IntoIterator<Item = HashSpan>) -> Self {
        Self {
            host: address.host.clone(),
            port: address.port,
            secure: address.secure,
            spans: spans.into_iter().collect(),
        }
    }

    /// The backend's address.
    pub fn address(&self) -> HostAddress {
        HostAddress::new(self.host.clone(), self.port).with_secure(self.secure)
    }
}

/// Settings of a routing coordinator.
///
/// ```toml
/// max_failures = 3
/// offline_backoff = 10000
///
/// [transport]
/// idle_timeout = 30000
///
/// [[backends]]
/// host = "10.0.0.1"
/// port = 4000
/// spans = [{ start = "0x00…", end = "0x7f…" }]
/// ```
///
/// Hashes are 0x-prefixed hex; durations are milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Consecutive transport failures that take a backend offline; zero never does.
    pub max_failures: u32,
    /// How long an offline backend is skipped.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub offline_backoff: Duration,
    /// Settings for every backend connection.
    pub transport: TransportConfig,
    /// Managed backends, in read preference order.
    pub backends: Vec<BackendConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            offline_backoff: DEFAULT_OFFLINE_BACKOFF,
            transport: TransportConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl RoutingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check that every backend owns spans and appears once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for backend in &self.backends {
            let address = backend.address();
            if backend.spans.is_empty() {
                return Err(ConfigError::NoSpans(address));
            }
            if !seen.insert((address.host.clone(), address.port)) {
                return Err(ConfigError::DuplicateHost(address));
            }
        }
        Ok(())
    }

    /// Add a managed backend.
    pub fn with_backend(
        mut self,
        address: &HostAddress,
        spans: impl IntoIterator<Item = HashSpan>,
    ) -> Self {
        self.backends.push(BackendConfig::new(address, spans));
        self
    }

    /// Builder-style transport override.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Builder-style health policy override.
    pub fn with_health(mut self, max_failures: u32, offline_backoff: Duration) -> Self {
        self.max_failures = max_failures;
        self.offline_backoff = offline_backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const LOW: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";
    const MID: &str = "0x7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
    const HIGH: &str = "0x8000000000000000000000000000000000000000000000000000000000000000";

    fn document(extra: &str) -> String {
        format!(
            r#"
max_failures = 5
offline_backoff = 2500

[transport]
idle_timeout = 1000

[[backends]]
host = "10.0.0.1"
port = 4000
spans = [{{ start = "{LOW}", end = "{MID}" }}]

[[backends]]
host = "10.0.0.2"
port = 4000
secure = true
spans = [{{ start = "{HIGH}", end = "{HIGH}" }}]
{extra}
"#
        )
    }

    #[test]
    fn test_parses_backends_and_policy() {
        let config = RoutingConfig::from_toml_str(&document("")).unwrap();
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.offline_backoff, Duration::from_millis(2500));
        assert_eq!(config.transport.idle_timeout, Duration::from_secs(1));
        assert_eq!(config.backends.len(), 2);

        let second = config.backends[1].address();
        assert!(second.secure);
        assert_eq!(second.to_string(), "tls://10.0.0.2:4000");
        assert_eq!(config.backends[0].spans[0].end().to_string(), MID);
    }

    #[test]
    fn test_defaults_when_omitted() {
        let config = RoutingConfig::from_toml_str("").unwrap();
        assert_eq!(config, RoutingConfig::default());
        assert_eq!(config.max_failures, DEFAULT_MAX_FAILURES);
    }

    #[test]
    fn test_inverted_span_rejected() {
        let toml = format!(
            "[[backends]]\nhost = \"h\"\nport = 1\nspans = [{{ start = \"{MID}\", end = \"{LOW}\" }}]\n"
        );
        assert_matches!(RoutingConfig::from_toml_str(&toml), Err(ConfigError::Parse(_)));
    }

    #[test]
    fn test_backend_without_spans_rejected() {
        let toml = "[[backends]]\nhost = \"h\"\nport = 1\nspans = []\n";
        assert_matches!(RoutingConfig::from_toml_str(toml), Err(ConfigError::NoSpans(_)));
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let extra = format!(
            "[[backends]]\nhost = \"10.0.0.1\"\nport = 4000\nspans = [{{ start = \"{LOW}\", end = \"{LOW}\" }}]\n"
        );
        assert_matches!(
            RoutingConfig::from_toml_str(&document(&extra)),
            Err(ConfigError::DuplicateHost(host)) if host.host == "10.0.0.1"
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert_matches!(
            RoutingConfig::from_toml_str("retries = 4\n"),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("chunknet-routing-{}.toml", std::process::id()));
        fs::write(&path, document("")).unwrap();
        let loaded = RoutingConfig::load(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded.unwrap().backends.len(), 2);

        assert_matches!(
            RoutingConfig::load(std::env::temp_dir().join("chunknet-missing.toml")),
            Err(ConfigError::Read { .. })
        );
    }

    #[test]
    fn test_builder_roundtrips_through_toml() {
        let config = RoutingConfig::default()
            .with_backend(&HostAddress::new("127.0.0.1", 7000), [HashSpan::FULL])
            .with_health(1, Duration::from_millis(50));
        let encoded = toml::to_string(&config).unwrap();
        assert_eq!(RoutingConfig::from_toml_str(&encoded).unwrap(), config);
    }
}
