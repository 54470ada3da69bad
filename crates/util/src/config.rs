use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{database_url, server_bind_address};

const DEFAULT_DELIMITER: u8 = b',';
const DEFAULT_CURRENCY: &str = "IDR";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_ISSUER_NAME: &str = "Payroll";
const DEFAULT_STORAGE_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Knobs for the import, replication and export paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollSettings {
    pub csv_delimiter: u8,
    pub currency: String,
    pub timezone: String,
    pub issuer_name: String,
    pub storage_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for PayrollSettings {
    fn default() -> Self {
        Self {
            csv_delimiter: DEFAULT_DELIMITER,
            currency: DEFAULT_CURRENCY.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            issuer_name: DEFAULT_ISSUER_NAME.to_string(),
            storage_retries: DEFAULT_STORAGE_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl PayrollSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let csv_delimiter = match env::var("PAYROLL_CSV_DELIMITER") {
            Ok(value) => parse_delimiter(&value)?,
            Err(_) => defaults.csv_delimiter,
        };

        let currency = env::var("PAYROLL_CURRENCY")
            .map(|value| value.trim().to_ascii_uppercase())
            .unwrap_or(defaults.currency);

        let timezone = env::var("PAYROLL_TIMEZONE").unwrap_or(defaults.timezone);
        let issuer_name = env::var("PAYROLL_ISSUER_NAME").unwrap_or(defaults.issuer_name);

        let storage_retries = match env::var("PAYROLL_STORAGE_RETRIES") {
            Ok(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber("PAYROLL_STORAGE_RETRIES", value))?,
            Err(_) => defaults.storage_retries,
        };

        let retry_backoff = match env::var("PAYROLL_RETRY_BACKOFF_MS") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidNumber("PAYROLL_RETRY_BACKOFF_MS", value))?,
            Err(_) => defaults.retry_backoff,
        };

        Ok(Self {
            csv_delimiter,
            currency,
            timezone,
            issuer_name,
            storage_retries,
            retry_backoff,
        })
    }
}

fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    let bytes = value.as_bytes();
    match bytes {
        [byte] if byte.is_ascii() && !matches!(byte, b'"' | b'\n' | b'\r') => Ok(*byte),
        _ => Err(ConfigError::InvalidDelimiter(value.to_string())),
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub payroll: PayrollSettings,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let payroll = PayrollSettings::from_env()?;

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            payroll,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidDelimiter(String),
    InvalidNumber(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidDelimiter(value) => write!(
                f,
                "PAYROLL_CSV_DELIMITER must be a single ASCII character other than a quote or newline (got {value:?})"
            ),
            Self::InvalidNumber(name, value) => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
