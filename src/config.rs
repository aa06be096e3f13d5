//! Connection strings and pool configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DbError, DbResult};

/// Parsed `<driver>://[user[:password]@]<host-or-dsn>[:port][/database][?key=value&...]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    pub driver: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl ConnectionString {
    pub fn parse(text: &str) -> DbResult<Self> {
        let text = text.trim();
        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| DbError::Config(format!("missing driver scheme in '{text}'")))?;
        if scheme.is_empty() {
            return Err(DbError::Config(format!("empty driver name in '{text}'")));
        }
        let driver = canonical_driver(scheme);

        // Split off ?options
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };

        // Split by @ to separate credentials from host
        let (credentials, host_part) = match rest.rfind('@') {
            Some(at_pos) => (&rest[..at_pos], &rest[at_pos + 1..]),
            None => ("", rest),
        };

        let (user, password) = if credentials.is_empty() {
            (None, None)
        } else {
            match credentials.split_once(':') {
                Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
                None => (Some(credentials.to_string()), None),
            }
        };

        // Split host_part by / to separate host:port from database
        let (host_port, database) = match host_part.find('/') {
            Some(slash_pos) => {
                let db = &host_part[slash_pos + 1..];
                (&host_part[..slash_pos], (!db.is_empty()).then(|| db.to_string()))
            }
            None => (host_part, None),
        };

        // A trailing :digits is a port; anything else stays part of the host
        // (`:memory:`, Windows drive letters, DSN names).
        let (host, port) = match host_port.rfind(':') {
            Some(colon_pos)
                if colon_pos + 1 < host_port.len()
                    && host_port[colon_pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
            {
                let port_str = &host_port[colon_pos + 1..];
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| DbError::Config(format!("invalid port: {port_str}")))?;
                (host_port[..colon_pos].to_string(), Some(port))
            }
            _ => (host_port.to_string(), None),
        };

        let mut options = Vec::new();
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            options.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            driver,
            user,
            password,
            host,
            port,
            database,
            options,
        })
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Render the full string, password included.
    pub fn to_url(&self) -> String {
        self.render(self.password.as_deref())
    }

    fn render(&self, password: Option<&str>) -> String {
        let mut out = format!("{}://", self.driver);
        if let Some(user) = &self.user {
            out.push_str(user);
            if let Some(password) = password {
                out.push(':');
                out.push_str(password);
            }
            out.push('@');
        }
        out.push_str(&self.host);
        if let Some(port) = self.port {
            out.push_str(&format!(":{port}"));
        }
        if let Some(database) = &self.database {
            out.push('/');
            out.push_str(database);
        }
        if !self.options.is_empty() {
            let pairs: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push('?');
            out.push_str(&pairs.join("&"));
        }
        out
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = self.password.as_ref().map(|_| "***");
        f.write_str(&self.render(masked))
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        Self::parse(s)
    }
}

fn canonical_driver(scheme: &str) -> String {
    let lower = scheme.to_ascii_lowercase();
    match lower.as_str() {
        "mssql" => "odbc".to_string(),
        "sqlite" => "sqlite3".to_string(),
        _ => lower,
    }
}

// ============================================================================
// Pool configuration
// ============================================================================

fn default_max_connections() -> usize {
    10
}

fn default_checkout_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_driver_prefix() -> String {
    crate::registry::DEFAULT_DRIVER_PREFIX.to_string()
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Configuration for a [`crate::ConnectionPool`].
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub connection_string: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(
        default = "default_checkout_timeout",
        rename = "checkout_timeout_ms",
        deserialize_with = "deserialize_millis"
    )]
    pub checkout_timeout: Duration,
    #[serde(default = "default_driver_prefix")]
    pub driver_prefix: String,
}

impl PoolConfig {
    pub fn new(connection_string: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            max_connections: default_max_connections(),
            checkout_timeout: default_checkout_timeout(),
            driver_prefix: default_driver_prefix(),
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn driver_prefix(mut self, prefix: &str) -> Self {
        self.driver_prefix = prefix.to_string();
        self
    }

    /// Check limits and parse the connection string.
    pub fn validate(&self) -> DbResult<ConnectionString> {
        if self.max_connections == 0 {
            return Err(DbError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        ConnectionString::parse(&self.connection_string)
    }
}
