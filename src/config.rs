use std::env;
use std::time::Duration;

use crate::types::products;

/// Token lifetime and the window before expiry in which a replacement is issued.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub lifetime: Duration,
    pub renew_window: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(60),
            renew_window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Only purchases made for this application package are honoured.
    pub expected_package_name: String,
    pub ocr_scans_per_unit: i32,
    pub token_policy: TokenPolicy,
    pub verify_timeout: Duration,
    pub sentry_dsn: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "licensing.db".to_string(),
            port: 3000,
            expected_package_name: products::DEFAULT_EXPECTED_PACKAGE_NAME.to_string(),
            ocr_scans_per_unit: products::DEFAULT_OCR_SCANS_PER_UNIT,
            token_policy: TokenPolicy::default(),
            verify_timeout: Duration::from_secs(10),
            sentry_dsn: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{name} must be a valid number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let token_policy = TokenPolicy {
            lifetime: Duration::from_secs(parse_var("TOKEN_LIFETIME_SECS", 60)?),
            renew_window: Duration::from_secs(parse_var("TOKEN_RENEW_WINDOW_SECS", 5)?),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            port: parse_var("PORT", defaults.port)?,
            expected_package_name: env::var("EXPECTED_PACKAGE_NAME")
                .unwrap_or(defaults.expected_package_name),
            ocr_scans_per_unit: parse_var("OCR_SCANS_PER_UNIT", defaults.ocr_scans_per_unit)?,
            token_policy,
            verify_timeout: Duration::from_secs(parse_var("VERIFY_TIMEOUT_SECS", 10)?),
            sentry_dsn: env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty()),
        })
    }
}
