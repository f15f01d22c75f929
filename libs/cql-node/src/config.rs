use crate::env::{FromEnv, env_optional, env_parse, env_required};
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default CQL native protocol port
pub const DEFAULT_PORT: u16 = 9042;

/// Fixed delay between a failed connect attempt and the next one
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Plaintext credential pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Connection settings for one database node.
///
/// Built once when the flow is loaded and never mutated afterwards.
///
/// # Example
///
/// ```ignore
/// use cql_node::ConnectionConfig;
///
/// let config = ConnectionConfig::new("10.0.0.1, 10.0.0.2")
///     .with_port(9142)
///     .with_keyspace("telemetry")
///     .with_credentials("cassandra", "cassandra");
/// assert_eq!(config.contact_points(), vec!["10.0.0.1:9142", "10.0.0.2:9142"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Ordered, deduplicated host list with whitespace removed
    pub hosts: Vec<String>,

    /// Port applied to every host that does not carry its own
    pub port: u16,

    /// Default keyspace for the session
    pub keyspace: Option<String>,

    /// Only present when a non-empty username was configured
    pub credentials: Option<Credentials>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Create a config from a comma-separated host list
    pub fn new(hosts: &str) -> Self {
        Self {
            hosts: parse_hosts(hosts),
            port: DEFAULT_PORT,
            keyspace: None,
            credentials: None,
            connect_timeout_secs: 10,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the keyspace; a blank name clears it
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        let keyspace = keyspace.into();
        self.keyspace = (!keyspace.trim().is_empty()).then(|| keyspace.trim().to_string());
        self
    }

    /// Set credentials; ignored when the username is empty
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        self.credentials = if username.is_empty() {
            None
        } else {
            Some(Credentials {
                username,
                password: password.into(),
            })
        };
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `host:port` pairs handed to the driver
    pub fn contact_points(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| with_port(host, self.port))
            .collect()
    }

    fn ensure_hosts(self) -> Result<Self, ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }
        Ok(self)
    }
}

/// Strip all whitespace, split on commas, drop empties and duplicates (first wins)
pub fn parse_hosts(raw: &str) -> Vec<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut hosts: Vec<String> = Vec::new();
    for host in stripped.split(',').filter(|h| !h.is_empty()) {
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

fn with_port(host: &str, port: u16) -> String {
    if host.starts_with('[') {
        if host.contains("]:") {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        }
    } else {
        match host.matches(':').count() {
            0 => format!("{}:{}", host, port),
            1 => host.to_string(),
            // bare IPv6 address
            _ => format!("[{}]:{}", host, port),
        }
    }
}

/// Load ConnectionConfig from environment variables
///
/// - `CASSANDRA_HOSTS` (required) - comma-separated host list
/// - `CASSANDRA_PORT` (optional, default: 9042)
/// - `CASSANDRA_KEYSPACE` (optional)
/// - `CASSANDRA_USERNAME` / `CASSANDRA_PASSWORD` (optional)
/// - `CASSANDRA_CONNECT_TIMEOUT_SECS` (optional, default: 10)
impl FromEnv for ConnectionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = ConnectionConfig::new(&env_required("CASSANDRA_HOSTS")?)
            .with_port(env_parse("CASSANDRA_PORT", DEFAULT_PORT)?)
            .with_connect_timeout(env_parse("CASSANDRA_CONNECT_TIMEOUT_SECS", 10)?);

        if let Some(keyspace) = env_optional("CASSANDRA_KEYSPACE") {
            config = config.with_keyspace(keyspace);
        }
        if let Some(username) = env_optional("CASSANDRA_USERNAME") {
            config = config
                .with_credentials(username, env_optional("CASSANDRA_PASSWORD").unwrap_or_default());
        }

        config.ensure_hosts()
    }
}

/// Flow description consumed by the runner: database nodes plus the query nodes bound to them
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseNodeConfig>,

    #[serde(default)]
    pub queries: Vec<QueryNodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseNodeConfig {
    pub id: String,
    pub hosts: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub keyspace: String,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryNodeConfig {
    pub id: String,
    /// Id of the database node this query node uses
    #[serde(default)]
    pub mydb: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl DatabaseNodeConfig {
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        ConnectionConfig::new(&self.hosts)
            .with_port(self.port)
            .with_keyspace(self.keyspace.clone())
            .with_credentials(self.credentials.user.clone(), self.credentials.password.clone())
            .ensure_hosts()
    }
}

impl FlowConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError {
            key: "flow".to_string(),
            details: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FlowFile {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Self::from_json(&raw)
    }
}
