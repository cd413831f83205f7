pub mod routes;

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub use routes::{Route, RouteAccess, RouteSetting, RouteSettingOverride, RouteSettings};

/// Errors loading configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid route settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub filter: FilterConfig,
    pub security: SecurityConfig,
    pub metadata: MetadataConfig,
    pub routes: RouteSettings,
    /// YAML file overriding per-route settings
    pub routes_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Mount point of the data routes
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            connection_timeout: 30,
            enable_query_logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: Option<u64>,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enables bearer-token identity and route access checks
    pub jwt_secret: Option<String>,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

/// What deleting an absent metadata row does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    #[default]
    Idempotent,
    Strict,
}

impl std::str::FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idempotent" => Ok(DeletePolicy::Idempotent),
            "strict" => Ok(DeletePolicy::Strict),
            other => Err(format!("Unknown delete policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub table: String,
    /// Column holding the dataset name
    pub name_column: String,
    pub created_column: String,
    pub update_column: String,
    pub delete_policy: DeletePolicy,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            table: "data".to_string(),
            name_column: "dataset".to_string(),
            created_column: "created_at".to_string(),
            update_column: "updated_at".to_string(),
            delete_policy: DeletePolicy::Idempotent,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Environment preset plus overrides, resolved through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(lookup)
    }

    /// `from_env` followed by the route settings file, if one is named
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        config.apply_routes_file()?;
        Ok(config)
    }

    pub fn apply_routes_file(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.routes_file.clone() else {
            return Ok(());
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        self.routes.apply_overrides(RouteSettings::parse_overrides(&text)?);
        Ok(())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Server overrides
        if let Some(v) = lookup("DATA_API_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("DATA_API_PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Some(v) = lookup("DATA_API_PREFIX") {
            self.server.prefix = v;
        }

        // Database overrides
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Some(v) = lookup("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // Filter overrides; 0 or "none" lifts the cap
        if let Some(v) = lookup("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok().filter(|limit| *limit > 0);
        }
        if let Some(v) = lookup("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Security overrides
        if let Some(v) = lookup("JWT_SECRET") {
            self.security.jwt_secret = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Some(v) = lookup("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Metadata overrides
        let default_table = self.metadata.table.clone();
        if let Some(v) = lookup("METADATA_TABLE") {
            self.metadata.table = v;
        }
        if let Some(v) = lookup("METADATA_NAME_COLUMN") {
            self.metadata.name_column = v;
        }
        if let Some(v) = lookup("METADATA_DELETE_POLICY") {
            self.metadata.delete_policy = v.parse().unwrap_or(self.metadata.delete_policy);
        }
        if self.metadata.table != default_table {
            self.routes = RouteSettings::with_restricted(vec![self.metadata.table.clone(), "user".to_string()]);
        }

        if let Some(v) = lookup("DATA_API_ROUTES_FILE") {
            self.routes_file = Some(PathBuf::from(v));
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                prefix: "/data".to_string(),
            },
            database: DatabaseConfig {
                enable_query_logging: true,
                ..DatabaseConfig::default()
            },
            filter: FilterConfig {
                max_limit: Some(1000),
                debug_logging: true,
            },
            security: SecurityConfig {
                jwt_secret: None,
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
            metadata: MetadataConfig::default(),
            routes: RouteSettings::default(),
            routes_file: None,
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                prefix: "/data".to_string(),
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
                ..DatabaseConfig::default()
            },
            filter: FilterConfig {
                max_limit: Some(500),
                debug_logging: false,
            },
            security: SecurityConfig {
                jwt_secret: None,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            metadata: MetadataConfig::default(),
            routes: RouteSettings::default(),
            routes_file: None,
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                prefix: "/data".to_string(),
            },
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
                ..DatabaseConfig::default()
            },
            filter: FilterConfig {
                max_limit: Some(100),
                debug_logging: false,
            },
            security: SecurityConfig {
                jwt_secret: None,
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
            metadata: MetadataConfig::default(),
            routes: RouteSettings::default(),
            routes_file: None,
        }
    }
}
