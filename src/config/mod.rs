/// Configuration for the approval service
///
/// Everything comes from `APPROVAL_*` environment variables with container-friendly
/// defaults; see [`Config::default`].

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub escalation: EscalationConfig,
    pub directory: DirectoryConfig,
    pub adapters: AdapterConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL; the file is created if missing
    pub url: String,
    pub max_connections: u32,
    /// How long a connection waits for the write lock before failing
    pub busy_timeout_secs: u64,
}

/// Overdue-task sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Six-field cron expression, seconds first
    pub schedule: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// JSON file with roles, departments and managers
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Business types served by the built-in in-memory adapter
    pub business_types: Vec<String>,
}

impl Config {
    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        Self {
            server: ServerConfig {
                host: var("APPROVAL_HOST", "0.0.0.0"),
                port: var("APPROVAL_PORT", "3005").parse().unwrap_or(3005),
            },
            database: DatabaseConfig {
                url: var("APPROVAL_DATABASE_URL", "sqlite://data/approvals.db"),
                max_connections: var("APPROVAL_DATABASE_MAX_CONNECTIONS", "8").parse().unwrap_or(8),
                busy_timeout_secs: var("APPROVAL_DATABASE_BUSY_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            },
            escalation: EscalationConfig {
                schedule: var("APPROVAL_ESCALATION_SCHEDULE", "0 */5 * * * *"),
                enabled: !matches!(
                    var("APPROVAL_ESCALATION_ENABLED", "true").to_ascii_lowercase().as_str(),
                    "false" | "0" | "no" | "off"
                ),
            },
            directory: DirectoryConfig {
                file: lookup("APPROVAL_DIRECTORY_FILE").filter(|path| !path.trim().is_empty()),
            },
            adapters: AdapterConfig {
                business_types: var(
                    "APPROVAL_BUSINESS_TYPES",
                    "purchase_order,acceptance_order,quote,invoice",
                )
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            },
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.server.port, 3005);
        assert_eq!(config.database.url, "sqlite://data/approvals.db");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database.busy_timeout_secs, 10);
        assert!(config.escalation.enabled);
        assert!(config.directory.file.is_none());
        assert_eq!(
            config.adapters.business_types,
            vec!["purchase_order", "acceptance_order", "quote", "invoice"]
        );
    }

    #[test]
    fn overrides_from_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("APPROVAL_PORT", "8080"),
            ("APPROVAL_DATABASE_MAX_CONNECTIONS", "2"),
            ("APPROVAL_ESCALATION_ENABLED", "off"),
            ("APPROVAL_DIRECTORY_FILE", "/etc/org.json"),
            ("APPROVAL_BUSINESS_TYPES", " invoice , ,quote"),
        ]);
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.max_connections, 2);
        assert!(!config.escalation.enabled);
        assert_eq!(config.directory.file.as_deref(), Some("/etc/org.json"));
        assert_eq!(config.adapters.business_types, vec!["invoice", "quote"]);
    }

    #[test]
    fn bad_port_falls_back() {
        let config = Config::from_lookup(|name| (name == "APPROVAL_PORT").then(|| "http".to_string()));
        assert_eq!(config.server.port, 3005);
    }
}
