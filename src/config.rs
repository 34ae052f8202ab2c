/// Configuration management for Shiftdesk
use crate::error::{DeskError, DeskResult};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub scheduling: SchedulingConfig,
    pub email: Option<EmailConfig>,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub token_ttl: i64,
}

/// Scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Fallback timezone for users whose stored timezone is not recognised
    pub default_timezone: String,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Periodic JSON backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub backup_dir: PathBuf,
    pub retain_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 24,
            backup_dir: PathBuf::from("./backups"),
            retain_days: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DeskResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("DESK_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("DESK_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| DeskError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("DESK_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("DESK_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("shiftdesk.sqlite"));

        let jwt_secret = env::var("DESK_JWT_SECRET")
            .map_err(|_| DeskError::Validation("JWT secret required".to_string()))?;
        let token_ttl = env::var("DESK_TOKEN_TTL_SECONDS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .unwrap_or(604800);

        let default_timezone =
            env::var("DESK_DEFAULT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());

        let email = if let Ok(smtp_url) = env::var("DESK_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("DESK_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("alerts@{}", hostname)),
            })
        } else {
            None
        };

        let backup = BackupConfig {
            enabled: env::var("DESK_BACKUP_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            interval_hours: env::var("DESK_BACKUP_INTERVAL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),
            backup_dir: env::var("DESK_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_directory.join("backups")),
            retain_days: env::var("DESK_BACKUP_RETAIN_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                token_ttl,
            },
            scheduling: SchedulingConfig { default_timezone },
            email,
            backup,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Local defaults with email and backups off
    pub fn with_defaults(jwt_secret: impl Into<String>) -> Self {
        let data_directory = PathBuf::from("./data");
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 5000,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                database: data_directory.join("shiftdesk.sqlite"),
                data_directory,
            },
            authentication: AuthConfig {
                jwt_secret: jwt_secret.into(),
                token_ttl: 604800,
            },
            scheduling: SchedulingConfig {
                default_timezone: "UTC".to_string(),
            },
            email: None,
            backup: BackupConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> DeskResult<()> {
        if self.service.hostname.is_empty() {
            return Err(DeskError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(DeskError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.scheduling.default_timezone.parse::<Tz>().is_err() {
            return Err(DeskError::Validation(format!(
                "Unknown default timezone: {}",
                self.scheduling.default_timezone
            )));
        }

        Ok(())
    }

    /// Parsed process-wide default timezone
    pub fn default_timezone(&self) -> Tz {
        self.scheduling.default_timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 5000,
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from("./data/shiftdesk.sqlite"),
            },
            authentication: AuthConfig {
                jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
                token_ttl: 3600,
            },
            scheduling: SchedulingConfig {
                default_timezone: "America/Chicago".to_string(),
            },
            email: None,
            backup: BackupConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn test_validate_accepts_sample() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timezone(), chrono_tz::America::Chicago);
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = sample();
        config.authentication.jwt_secret = "short".to_string();
        assert!(matches!(config.validate(), Err(DeskError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_timezone() {
        let mut config = sample();
        config.scheduling.default_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_config_default() {
        let config = BackupConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.interval_hours, 24);
        assert_eq!(config.retain_days, 30);
    }
}
