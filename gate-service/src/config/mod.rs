pub mod routes;

use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::gate::{GateSettings, RedirectPlan};
use crate::services::policy::LockoutPolicy;
use crate::services::session::SessionSettings;

pub use routes::RouteTable;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub gate: GateSettingsConfig,
    pub security: SecurityConfig,
    pub two_factor: TwoFactorConfig,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub monitor_interval_seconds: u64,
    pub defer_until_verified: bool,
    /// Directory for per-console mirror files; in-memory mirrors when unset.
    pub mirror_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GateSettingsConfig {
    pub failed_redirect_seconds: u64,
    pub locked_redirect_seconds: u64,
    pub failed_redirect_path: String,
    pub locked_redirect_path: String,
    pub origin_timeout_seconds: u64,
    /// JSON route table overriding the built-in admin sections.
    pub routes_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Peers whose forwarding headers are believed.
    pub trusted_proxies: Vec<String>,
    pub lockout_max_failed_attempts: i64,
    pub lockout_window_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub code_window_seconds: u64,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

impl Default for GateConfig {
    /// Development defaults without a database URL.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "gate-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new(String::new()),
                max_connections: 10,
                min_connections: 1,
                acquire_timeout_seconds: 5,
            },
            session: SessionConfig {
                ttl_minutes: 120,
                monitor_interval_seconds: 60,
                defer_until_verified: false,
                mirror_dir: None,
            },
            gate: GateSettingsConfig {
                failed_redirect_seconds: 5,
                locked_redirect_seconds: 10,
                failed_redirect_path: "/login".to_string(),
                locked_redirect_path: "/account-locked".to_string(),
                origin_timeout_seconds: 5,
                routes_file: None,
            },
            security: SecurityConfig {
                allowed_origins: Vec::new(),
                trusted_proxies: Vec::new(),
                lockout_max_failed_attempts: 5,
                lockout_window_minutes: 15,
            },
            two_factor: TwoFactorConfig {
                code_window_seconds: 30,
                issuer: "Admin Console".to_string(),
            },
            smtp: None,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: parse(get_env("SMTP_PORT", Some("587"), false)?, "SMTP_PORT")?,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                from: get_env("SMTP_FROM", None, is_prod)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_HOST is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let config = GateConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("gate-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse(
                    get_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
                    "DATABASE_MAX_CONNECTIONS",
                )?,
                min_connections: parse(
                    get_env("DATABASE_MIN_CONNECTIONS", Some("1"), false)?,
                    "DATABASE_MIN_CONNECTIONS",
                )?,
                acquire_timeout_seconds: parse(
                    get_env("DATABASE_ACQUIRE_TIMEOUT_SECONDS", Some("5"), false)?,
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                )?,
            },
            session: SessionConfig {
                ttl_minutes: parse(
                    get_env("SESSION_TTL_MINUTES", Some("120"), false)?,
                    "SESSION_TTL_MINUTES",
                )?,
                monitor_interval_seconds: parse(
                    get_env("SESSION_MONITOR_INTERVAL_SECONDS", Some("60"), false)?,
                    "SESSION_MONITOR_INTERVAL_SECONDS",
                )?,
                defer_until_verified: get_env("SESSION_DEFER_UNTIL_VERIFIED", Some("false"), false)?
                    .parse()
                    .unwrap_or(false),
                mirror_dir: optional_env("SESSION_MIRROR_DIR").map(PathBuf::from),
            },
            gate: GateSettingsConfig {
                failed_redirect_seconds: parse(
                    get_env("GATE_FAILED_REDIRECT_SECONDS", Some("5"), false)?,
                    "GATE_FAILED_REDIRECT_SECONDS",
                )?,
                locked_redirect_seconds: parse(
                    get_env("GATE_LOCKED_REDIRECT_SECONDS", Some("10"), false)?,
                    "GATE_LOCKED_REDIRECT_SECONDS",
                )?,
                failed_redirect_path: get_env("GATE_FAILED_REDIRECT_PATH", Some("/login"), false)?,
                locked_redirect_path: get_env(
                    "GATE_LOCKED_REDIRECT_PATH",
                    Some("/account-locked"),
                    false,
                )?,
                origin_timeout_seconds: parse(
                    get_env("ORIGIN_TIMEOUT_SECONDS", Some("5"), false)?,
                    "ORIGIN_TIMEOUT_SECONDS",
                )?,
                routes_file: optional_env("GATE_ROUTES_FILE").map(PathBuf::from),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some(""), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                trusted_proxies: get_env("TRUSTED_PROXIES", Some(""), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                lockout_max_failed_attempts: parse(
                    get_env("LOCKOUT_MAX_FAILED_ATTEMPTS", Some("5"), false)?,
                    "LOCKOUT_MAX_FAILED_ATTEMPTS",
                )?,
                lockout_window_minutes: parse(
                    get_env("LOCKOUT_WINDOW_MINUTES", Some("15"), false)?,
                    "LOCKOUT_WINDOW_MINUTES",
                )?,
            },
            two_factor: TwoFactorConfig {
                code_window_seconds: parse(
                    get_env("TWO_FACTOR_CODE_WINDOW_SECONDS", Some("30"), false)?,
                    "TWO_FACTOR_CODE_WINDOW_SECONDS",
                )?,
                issuer: get_env("TWO_FACTOR_ISSUER", Some("Admin Console"), false)?,
            },
            smtp,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_MINUTES must be positive"
            )));
        }

        if self.session.monitor_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_MONITOR_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.two_factor.code_window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TWO_FACTOR_CODE_WINDOW_SECONDS must be positive"
            )));
        }

        if self.security.lockout_max_failed_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOCKOUT_MAX_FAILED_ATTEMPTS must be positive"
            )));
        }

        if self.security.trusted_proxies.iter().any(|p| p == "0.0.0.0/0" || p == "::/0") {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TRUSTED_PROXIES must not trust every peer"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*" || o == "0.0.0.0/0") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard allowed origin not permitted in production"
                )));
            }

            if self.security.allowed_origins.is_empty() {
                tracing::warn!("ALLOWED_ORIGINS is empty in production - every origin is accepted");
            }
        }

        Ok(())
    }
}

impl GateConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ttl: chrono::Duration::minutes(self.session.ttl_minutes),
            monitor_interval: Duration::from_secs(self.session.monitor_interval_seconds),
            defer_until_verified: self.session.defer_until_verified,
        }
    }

    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            failed_redirect: RedirectPlan {
                target: self.gate.failed_redirect_path.clone(),
                delay: Duration::from_secs(self.gate.failed_redirect_seconds),
            },
            locked_redirect: RedirectPlan {
                target: self.gate.locked_redirect_path.clone(),
                delay: Duration::from_secs(self.gate.locked_redirect_seconds),
            },
            origin_timeout: Duration::from_secs(self.gate.origin_timeout_seconds),
            ..GateSettings::default()
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failed_attempts: self.security.lockout_max_failed_attempts,
            window: chrono::Duration::minutes(self.security.lockout_window_minutes),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T>(value: String, key: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        GateConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = GateConfig::default();
        config.session.ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_origin_rejected_in_prod() {
        let mut config = GateConfig::default();
        config.environment = Environment::Prod;
        config.security.allowed_origins = vec!["0.0.0.0/0".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trust_everyone_proxy_rejected() {
        let mut config = GateConfig::default();
        config.security.trusted_proxies = vec!["10.0.0.0/8".to_string()];
        config.validate().unwrap();

        config.security.trusted_proxies.push("0.0.0.0/0".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let mut config = GateConfig::default();
        config.session.ttl_minutes = 30;
        config.gate.locked_redirect_seconds = 20;

        assert_eq!(config.session_settings().ttl, chrono::Duration::minutes(30));
        let gate = config.gate_settings();
        assert_eq!(gate.failed_redirect.target, "/login");
        assert_eq!(gate.locked_redirect.delay, Duration::from_secs(20));
        assert_eq!(config.lockout_policy().max_failed_attempts, 5);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
