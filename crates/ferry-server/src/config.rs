//! Node configuration: a TOML file with env-var overrides.
//!
//! Every key has a default so a bare `ferry-server` starts a single-node
//! instance with an in-process registry. A missing config file is fine;
//! an unreadable or invalid one fails startup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fallback secret for local development. `main` logs a warning when the
/// node runs with it.
pub const DEV_AUTH_SECRET: &str = "ferry-dev-secret-do-not-deploy";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FerryConfig {
    pub server: ServerSection,
    pub tcp: TcpSection,
    pub node: NodeSection,
    pub redis: RedisSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// HTTP/WebSocket listen port.
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSection {
    /// Raw TCP listen port.
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// Cluster-unique node id. Generated per process when left empty.
    pub id: String,
    /// Address other nodes may reach this node at; informational, carried
    /// in registry entries.
    pub advertise_addr: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisSection {
    pub enabled: bool,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    /// SQLite file path; `:memory:` for an ephemeral store.
    pub path: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Shared secret the token verifier derives its MAC key from.
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for TcpSection {
    fn default() -> Self {
        Self { port: 8083 }
    }
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            advertise_addr: String::new(),
        }
    }
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: "ferry.db".to_string(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            secret: DEV_AUTH_SECRET.to_string(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info,ferry_server=debug".to_string(),
        }
    }
}

impl FerryConfig {
    /// Load the config file at `path` (defaults apply when it does not
    /// exist), apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.apply_env();
        config.finalize()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("FERRY_SERVER_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "invalid FERRY_SERVER_PORT, keeping configured value"),
            }
        }
        if let Ok(port) = std::env::var("FERRY_TCP_PORT") {
            match port.parse() {
                Ok(port) => self.tcp.port = port,
                Err(_) => tracing::warn!(value = %port, "invalid FERRY_TCP_PORT, keeping configured value"),
            }
        }
        if let Ok(id) = std::env::var("FERRY_NODE_ID") {
            if !id.is_empty() {
                self.node.id = id;
            }
        }
        if let Ok(url) = std::env::var("FERRY_REDIS_URL") {
            if !url.is_empty() {
                self.redis.url = url;
                self.redis.enabled = true;
            }
        }
        if let Ok(val) = std::env::var("FERRY_REDIS_ENABLED") {
            self.redis.enabled = val != "false" && val != "0";
        }
        if let Ok(secret) = std::env::var("FERRY_AUTH_SECRET") {
            if !secret.is_empty() {
                self.auth.secret = secret;
            }
        }
        if let Ok(db_path) = std::env::var("FERRY_DB_PATH") {
            if !db_path.is_empty() {
                self.database.path = db_path;
            }
        }
        if let Ok(level) = std::env::var("FERRY_LOG") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            let suffix = &Uuid::new_v4().simple().to_string()[..8];
            self.node.id = format!("node-{suffix}");
        }
        if self.node.advertise_addr.is_empty() {
            self.node.advertise_addr = format!("127.0.0.1:{}", self.server.port);
        }

        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be nonzero".into()));
        }
        if self.tcp.port == 0 {
            return Err(ConfigError::Validation("tcp.port must be nonzero".into()));
        }
        if self.server.port == self.tcp.port {
            return Err(ConfigError::Validation(
                "server.port and tcp.port must differ".into(),
            ));
        }
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "redis.url required when redis.enabled".into(),
            ));
        }
        if self.auth.secret.trim().is_empty() {
            return Err(ConfigError::Validation("auth.secret must not be empty".into()));
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Validation("database.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.auth.secret == DEV_AUTH_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let mut config = FerryConfig::default();
        config.finalize().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tcp.port, 8083);
        assert!(config.node.id.starts_with("node-"));
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FerryConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[server]
port = 9090

[node]
id = "node-test"

[redis]
enabled = true
url = "redis://redis.internal:6379/1"
"#
        )
        .unwrap();

        let config = FerryConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.node.id, "node-test");
        assert!(config.redis.enabled);
        assert_eq!(config.redis.url, "redis://redis.internal:6379/1");
        // Untouched sections keep their defaults.
        assert_eq!(config.tcp.port, 8083);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "[server]\nporte = 1\n").unwrap();
        assert!(matches!(FerryConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn colliding_ports_fail_validation() {
        let mut config = FerryConfig::default();
        config.server.port = 7000;
        config.tcp.port = 7000;
        assert!(matches!(
            config.finalize(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn generated_node_ids_are_distinct() {
        let mut a = FerryConfig::default();
        let mut b = FerryConfig::default();
        a.finalize().unwrap();
        b.finalize().unwrap();
        assert_ne!(a.node.id, b.node.id);
    }
}
