/// Configuration for the sync service: schools, their WebUntis systems, and runtime settings
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::{env, fmt, fs};
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable overriding the HTTP port.
pub const PORT_ENV: &str = "UNTISSYNC_PORT";
/// Environment variable overriding the database path.
pub const DB_ENV: &str = "UNTISSYNC_DB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub server: ServerConfig,

    /// Seconds between periodic sync runs in `serve` mode; 0 disables the job
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub schools: Vec<SchoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Settings for the outgoing WebUntis HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Sent as `client` on `authenticate`
    pub client_name: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "untissync".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A school whose classes and courses are kept in sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchoolConfig {
    pub id: String,
    pub name: String,

    /// Stored as `year` on classes created for this school
    #[serde(default)]
    pub current_year: Option<String>,

    #[serde(default)]
    pub systems: Vec<WebUntisSystem>,
}

/// Connection details of one WebUntis installation
#[derive(Clone, Serialize, Deserialize)]
pub struct WebUntisSystem {
    /// Base URL, e.g. `https://mese.webuntis.com`
    pub url: String,
    /// WebUntis school login name
    pub school_name: String,
    pub user: String,
    pub password: String,
}

impl WebUntisSystem {
    /// Stable identifier of this installation, used in reconcile keys.
    pub fn key(&self) -> String {
        format!("{}#{}", self.url.trim_end_matches('/'), self.school_name)
    }
}

impl fmt::Debug for WebUntisSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebUntisSystem")
            .field("url", &self.url)
            .field("school_name", &self.school_name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_database_path() -> String {
    "untissync.db".to_string()
}

fn default_sync_interval() -> u64 {
    24 * 60 * 60
}

impl AppConfig {
    /// Loads and validates the configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON config file
    ///
    /// # Returns
    /// * `Ok(AppConfig)` - Parsed configuration
    /// * `Err` - If the file is unreadable, malformed or inconsistent
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config = Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;

        info!(
            "Loaded configuration for {} school(s) from {}",
            config.schools.len(),
            path.display()
        );

        Ok(config)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for school in &self.schools {
            if school.id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("school '{}' has an empty id", school.name),
                });
            }
            if !seen.insert(school.id.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate school id '{}'", school.id),
                });
            }
            for system in &school.systems {
                url::Url::parse(&system.url).map_err(|e| ConfigError::Invalid {
                    message: format!(
                        "school '{}' has an invalid WebUntis url '{}': {e}",
                        school.id, system.url
                    ),
                })?;
            }
        }
        Ok(())
    }

    /// Applies `UNTISSYNC_PORT` and `UNTISSYNC_DB` if they are set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var(PORT_ENV) {
            match port.parse() {
                Ok(port) => {
                    info!("{PORT_ENV} set, using port {port}");
                    self.server.port = port;
                }
                Err(e) => warn!("Invalid {PORT_ENV} value '{port}': {e}"),
            }
        }

        if let Ok(path) = env::var(DB_ENV) {
            info!("{DB_ENV} set, using database {path}");
            self.database_path = path;
        }
    }

    /// Gets a school by id
    pub fn get_school(&self, school_id: &str) -> Option<&SchoolConfig> {
        self.schools.iter().find(|s| s.id == school_id)
    }
}
