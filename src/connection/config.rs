use super::retry::RetryConfig;
use std::time::Duration;

/// Default user name for digest credentials set via `password()`.
pub const DEFAULT_DIGEST_USER: &str = "master";

/// Authentication presented when opening a coordination session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub scheme: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn digest(username: &str, password: &str) -> Self {
        Self {
            scheme: "digest".to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Auth payload in `user:password` form.
    pub fn auth(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Coordination service connection configuration
///
/// Shared by every group created from one component.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Ensemble connect string (`host:port[,host:port...]`)
    pub connect_string: String,

    /// Bound on a single connection attempt
    pub connection_timeout: Duration,

    /// Session timeout negotiated with the ensemble
    pub session_timeout: Duration,

    /// Optional authentication
    pub credentials: Option<Credentials>,

    /// Reconnect policy
    pub retry: RetryConfig,

    /// Capacity of the event channel each group subscribes to
    pub event_buffer: usize,
}

impl CoordinationConfig {
    /// Create a new configuration for the given ensemble
    pub fn new(connect_string: &str) -> Self {
        Self {
            connect_string: connect_string.to_string(),
            connection_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(30),
            credentials: None,
            retry: RetryConfig::default(),
            event_buffer: 256,
        }
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set session timeout
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set digest credentials
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::digest(username, password));
        self
    }

    /// Set a digest password for the default user
    pub fn password(self, password: &str) -> Self {
        self.credentials(DEFAULT_DIGEST_USER, password)
    }

    /// Set the reconnect policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the event channel capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Parse from connection string
    ///
    /// Format: "zk://[username:password@]host:port[,host:port...]"
    pub fn from_url(url: &str) -> Result<Self, String> {
        let rest = url
            .strip_prefix("zk://")
            .ok_or_else(|| "URL must start with 'zk://'".to_string())?;

        let (auth, hosts) = match rest.rsplit_once('@') {
            Some((auth, hosts)) => (Some(auth), hosts),
            None => (None, rest),
        };

        let hosts = hosts.trim_end_matches('/');
        if hosts.is_empty() {
            return Err("URL has no hosts".to_string());
        }
        for host in hosts.split(',') {
            let (name, port) = host
                .rsplit_once(':')
                .ok_or_else(|| format!("Host '{}' has no port", host))?;
            if name.is_empty() {
                return Err(format!("Host '{}' has no name", host));
            }
            port.parse::<u16>()
                .map_err(|_| format!("Invalid port in '{}'", host))?;
        }

        let mut config = Self::new(hosts);
        if let Some(auth) = auth {
            let (username, password) = auth
                .split_once(':')
                .ok_or_else(|| "Invalid credentials format".to_string())?;
            config = config.credentials(username, password);
        }
        Ok(config)
    }

    /// Human readable description with the password hidden
    pub fn describe(&self) -> String {
        match &self.credentials {
            Some(creds) => format!("zk://{}:***@{}", creds.username, self.connect_string),
            None => format!("zk://{}", self.connect_string),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_string.trim().is_empty() {
            return Err("connect_string cannot be empty".to_string());
        }

        if self.connection_timeout.is_zero() {
            return Err("connection_timeout must be > 0".to_string());
        }

        if self.session_timeout.is_zero() {
            return Err("session_timeout must be > 0".to_string());
        }

        if self.event_buffer == 0 {
            return Err("event_buffer must be > 0".to_string());
        }

        if let Some(creds) = &self.credentials {
            if creds.username.is_empty() || creds.password.is_empty() {
                return Err("credentials need both a username and a password".to_string());
            }
        }

        self.retry.validate()
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self::new("localhost:2181")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinationConfig::default();
        assert_eq!(config.connect_string, "localhost:2181");
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert!(config.credentials.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CoordinationConfig::new("zk1:2181,zk2:2181")
            .connection_timeout(Duration::from_secs(3))
            .session_timeout(Duration::from_secs(5))
            .password("secret")
            .event_buffer(16);

        assert_eq!(config.connection_timeout, Duration::from_secs(3));
        assert_eq!(config.session_timeout, Duration::from_secs(5));
        assert_eq!(config.event_buffer, 16);
        assert_eq!(
            config.credentials.as_ref().map(|c| c.auth()),
            Some("master:secret".to_string())
        );
    }

    #[test]
    fn test_from_url() {
        let config = CoordinationConfig::from_url("zk://alice:secret@zk1:2181,zk2:2182").unwrap();

        assert_eq!(config.connect_string, "zk1:2181,zk2:2182");
        let creds = config.credentials.unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "secret");
    }

    #[test]
    fn test_from_url_without_credentials() {
        let config = CoordinationConfig::from_url("zk://localhost:2181/").unwrap();
        assert_eq!(config.connect_string, "localhost:2181");
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_invalid_url() {
        assert!(CoordinationConfig::from_url("http://localhost:2181").is_err());
        assert!(CoordinationConfig::from_url("zk://").is_err());
        assert!(CoordinationConfig::from_url("zk://localhost").is_err());
        assert!(CoordinationConfig::from_url("zk://localhost:notaport").is_err());
        assert!(CoordinationConfig::from_url("zk://nocolon@localhost:2181").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(CoordinationConfig::new("").validate().is_err());
        assert!(
            CoordinationConfig::default()
                .connection_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(CoordinationConfig::default().event_buffer(0).validate().is_err());
        assert!(
            CoordinationConfig::default()
                .credentials("user", "")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_describe_hides_password() {
        let config = CoordinationConfig::new("zk1:2181").credentials("alice", "secret123");

        let described = config.describe();
        assert!(!described.contains("secret123"));
        assert!(described.contains("***"));
        assert!(!format!("{:?}", config).contains("secret123"));
    }
}
