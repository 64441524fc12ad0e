//! Connection and pool configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::driver::ConnectOptions;
use crate::error::Error;
use crate::retry::{DEFAULT_BACKOFF_BASE, RetryPolicy};

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the connection pool.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections opened at construction and kept queued.
    pub size: usize,

    /// Upper bound on how long `acquire` may block; `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,

    /// Whether the liveness probe may re-open a dropped session in place.
    pub reconnect_on_ping: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
            reconnect_on_ping: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of pooled connections.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable or disable in-place reconnects during the liveness probe.
    #[must_use]
    pub fn reconnect_on_ping(mut self, enabled: bool) -> Self {
        self.reconnect_on_ping = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.size == 0 {
            return Err(Error::Config("pool size must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Configuration for connecting to the database server.
///
/// Deserializes from the flat shape `{host, port, user, password, database,
/// charset, pool_size?, connect_timeout?, retry_backoff_base?}` where
/// `connect_timeout` is in seconds.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawConfig")]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 3306).
    pub port: u16,

    /// Login name.
    pub user: String,

    /// Login password.
    pub password: String,

    /// Database name.
    pub database: String,

    /// Connection character set (default: utf8mb4).
    pub charset: String,

    /// Time allowed to establish a session (default: 5s).
    pub connect_timeout: Duration,

    /// Retry policy shared by connects and operations.
    pub retry: RetryPolicy,

    /// Pool settings.
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            charset: "utf8mb4".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;` connection string.
    ///
    /// ```text
    /// host=db.internal;port=3306;user=app;password=secret;database=orders;pool size=20
    /// ```
    ///
    /// The host may carry a port as `host:port`. IPv6 literals must be
    /// bracketed, as in `[::1]` or `[::1]:3307`. Unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" | "data source" => {
                    let (host, port) = split_host_port(value)?;
                    config.host = host.to_string();
                    if let Some(port) = port {
                        config.port = port;
                    }
                }
                "port" => config.port = parse_port(value)?,
                "user" | "user id" | "uid" | "username" => config.user = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "database" | "db" | "initial catalog" => config.database = value.to_string(),
                "charset" | "character set" => config.charset = value.to_string(),
                "pool size" | "pool_size" | "max pool size" => {
                    config.pool.size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid pool size: {value}")))?;
                }
                "connect timeout" | "connect_timeout" | "connection timeout" => {
                    config.connect_timeout = parse_seconds(value)?;
                }
                "retry backoff" | "retry_backoff_base" => {
                    let base: f64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid retry backoff: {value}")))?;
                    config.retry = RetryPolicy::try_from_backoff_base(base)?
                        .max_retries(config.retry.max_retries);
                }
                "max retries" | "max_retries" => {
                    config.retry.max_retries = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid max retries: {value}")))?;
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the connection character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the number of pooled connections.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool.size = size;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Options handed to the driver when opening a session.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            charset: self.charset.clone(),
            connect_timeout: self.connect_timeout,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("user must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(Error::Config("database must not be empty".into()));
        }
        self.retry.validate()?;
        self.pool.validate()
    }
}

fn parse_port(value: &str) -> Result<u16, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {value}")))
}

fn split_host_port(value: &str) -> Result<(&str, Option<u16>), Error> {
    if let Some(rest) = value.strip_prefix('[') {
        let (addr, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 host: {value}")))?;
        if tail.is_empty() {
            return Ok((addr, None));
        }
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| Error::Config(format!("invalid host: {value}")))?;
        return Ok((addr, Some(parse_port(port)?)));
    }
    if value.matches(':').count() > 1 {
        return Err(Error::Config(format!("IPv6 host must be bracketed: {value}")));
    }
    match value.split_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((value, None)),
    }
}

fn parse_seconds(value: &str) -> Result<Duration, Error> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| Error::Config(format!("invalid timeout: {value}")))
}

/// Flat construction input as loaded by a host application.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    charset: String,
    #[serde(default = "default_pool_size")]
    pool_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout: f64,
    #[serde(default = "default_backoff_base")]
    retry_backoff_base: f64,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_connect_timeout_secs() -> f64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs_f64()
}

fn default_backoff_base() -> f64 {
    DEFAULT_BACKOFF_BASE
}

impl TryFrom<RawConfig> for Config {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let connect_timeout = Duration::try_from_secs_f64(raw.connect_timeout)
            .map_err(|_| Error::Config(format!("invalid timeout: {}", raw.connect_timeout)))?;
        if !raw.retry_backoff_base.is_finite() || raw.retry_backoff_base < 1.0 {
            return Err(Error::Config(format!(
                "retry_backoff_base must be >= 1.0, got {}",
                raw.retry_backoff_base
            )));
        }
        let retry = RetryPolicy::try_from_backoff_base(raw.retry_backoff_base)?;
        Ok(Self {
            host: raw.host,
            port: raw.port,
            user: raw.user,
            password: raw.password,
            database: raw.database,
            charset: raw.charset,
            connect_timeout,
            retry,
            pool: PoolConfig::new().size(raw.pool_size),
        })
    }
}
