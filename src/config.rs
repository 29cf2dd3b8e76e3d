/// Configuration management for the FPA portal
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub registration: RegistrationConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL used in links sent by email
    pub public_url: String,
    pub organization_name: String,
    /// Take the client address from X-Forwarded-For / X-Real-IP.
    /// Only safe when a reverse proxy in front of the portal sets them.
    pub trust_proxy_headers: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub upload_directory: PathBuf,
    pub upload_limit: usize,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,
    /// Emails that receive the admin role when they register
    pub admin_emails: Vec<String>,
    /// Require a verified email before registering for conferences
    pub require_email_verification: bool,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Conference registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Default currency for new conferences
    pub currency: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub admin_rps: u32,
    pub burst_size: u32,
    /// Attempts per minute on login, register and password reset
    pub credential_attempts_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            authenticated_rps: 50,
            unauthenticated_rps: 10,
            admin_rps: 200,
            burst_size: 50,
            credential_attempts_per_minute: 20,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PortalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("FPA_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("FPA_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| PortalError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("FPA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        let organization_name = env::var("FPA_ORGANIZATION_NAME")
            .unwrap_or_else(|_| "Fiji Principals Association".to_string());

        let trust_proxy_headers = env_or("FPA_TRUST_PROXY_HEADERS", false);

        let data_directory: PathBuf = env::var("FPA_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("FPA_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("portal.sqlite"));
        let upload_directory = env::var("FPA_UPLOAD_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("uploads"));
        let upload_limit = env_or("FPA_UPLOAD_LIMIT", 10 * 1024 * 1024);

        let jwt_secret = env::var("FPA_JWT_SECRET")
            .map_err(|_| PortalError::Validation("FPA_JWT_SECRET is required".to_string()))?;

        let email = if let Ok(smtp_url) = env::var("FPA_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("FPA_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "noreply@fijiprincipals.org".to_string()),
            })
        } else {
            None
        };

        let defaults = RateLimitConfig::default();
        let format = match env::var("FPA_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                organization_name,
                trust_proxy_headers,
            },
            storage: StorageConfig {
                data_directory,
                database,
                upload_directory,
                upload_limit,
            },
            authentication: AuthConfig {
                jwt_secret,
                access_token_ttl_secs: env_or("FPA_ACCESS_TOKEN_TTL_SECS", 3600),
                refresh_token_ttl_days: env_or("FPA_REFRESH_TOKEN_TTL_DAYS", 30),
                admin_emails: env_list("FPA_ADMIN_EMAILS"),
                require_email_verification: env_or("FPA_REQUIRE_EMAIL_VERIFICATION", true),
            },
            email,
            registration: RegistrationConfig {
                currency: env::var("FPA_CURRENCY").unwrap_or_else(|_| "FJD".to_string()),
            },
            rate_limit: RateLimitConfig {
                enabled: env_or("FPA_RATE_LIMITS_ENABLED", defaults.enabled),
                authenticated_rps: env_or("FPA_RATE_LIMIT_AUTHENTICATED_RPS", defaults.authenticated_rps),
                unauthenticated_rps: env_or(
                    "FPA_RATE_LIMIT_UNAUTHENTICATED_RPS",
                    defaults.unauthenticated_rps,
                ),
                admin_rps: env_or("FPA_RATE_LIMIT_ADMIN_RPS", defaults.admin_rps),
                burst_size: env_or("FPA_RATE_LIMIT_BURST", defaults.burst_size),
                credential_attempts_per_minute: env_or(
                    "FPA_RATE_LIMIT_CREDENTIAL_PER_MINUTE",
                    defaults.credential_attempts_per_minute,
                ),
            },
            logging: LoggingConfig {
                level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "fpa_portal=debug,tower_http=info".to_string()),
                format,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.service.hostname.is_empty() {
            return Err(PortalError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(PortalError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.storage.upload_limit == 0 {
            return Err(PortalError::Validation(
                "Upload limit must be greater than zero".to_string(),
            ));
        }

        if self.authentication.access_token_ttl_secs <= 0
            || self.authentication.refresh_token_ttl_days <= 0
        {
            return Err(PortalError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether an email is on the bootstrap admin list
    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        let email = email.to_lowercase();
        self.authentication.admin_emails.iter().any(|e| *e == email)
    }

    /// Configuration suitable for tests: temporary paths, no email, rate limits off
    pub fn for_testing(data_directory: PathBuf) -> Self {
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                public_url: "http://localhost:8080".to_string(),
                organization_name: "Fiji Principals Association".to_string(),
                trust_proxy_headers: false,
            },
            storage: StorageConfig {
                database: data_directory.join("portal.sqlite"),
                upload_directory: data_directory.join("uploads"),
                data_directory,
                upload_limit: 1024 * 1024,
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
                access_token_ttl_secs: 3600,
                refresh_token_ttl_days: 30,
                admin_emails: vec!["admin@fpa.test".to_string()],
                require_email_verification: false,
            },
            email: None,
            registration: RegistrationConfig {
                currency: "FJD".to_string(),
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            logging: LoggingConfig {
                level: "fpa_portal=debug".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = ServerConfig::for_testing(PathBuf::from("./data"));
        assert!(config.validate().is_ok());

        config.authentication.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_upload_limit() {
        let mut config = ServerConfig::for_testing(PathBuf::from("./data"));
        config.storage.upload_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_admin_is_case_insensitive() {
        let config = ServerConfig::for_testing(PathBuf::from("./data"));
        assert!(config.is_bootstrap_admin("Admin@FPA.test"));
        assert!(!config.is_bootstrap_admin("member@fpa.test"));
    }
}
