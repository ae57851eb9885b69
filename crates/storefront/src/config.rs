//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STRIDE_API_URL` - Base URL of the backing API (cart, payments, orders, profile)
//! - `STRIDE_API_KEY` - Client API key (high entropy, not a placeholder)
//!
//! ## Optional
//! - `STRIDE_CART_STORAGE_PATH` - Durable cart record (default: .stride/cart.json)
//! - `STRIDE_CURRENCY` - ISO 4217 currency (default: USD)
//! - `STRIDE_FREE_SHIPPING_THRESHOLD` - Subtotal for free shipping (default: 100.00)
//! - `STRIDE_FLAT_SHIPPING_FEE` - Shipping fee below the threshold (default: 9.99)
//! - `STRIDE_TAX_RATE` - Flat tax rate as a fraction (default: 0.08)
//! - `STRIDE_ORDER_SUBMIT_ATTEMPTS` - Order submission attempts after capture (default: 3)
//! - `STRIDE_ORDER_RETRY_DELAY_MS` - Delay between order submission attempts (default: 500)
//! - `STRIDE_HTTP_TIMEOUT_SECS` - HTTP request timeout (default: 15)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use stride_core::CurrencyCode;
use thiserror::Error;
use url::Url;

use crate::pricing::PricingRules;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront engine configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Backing API configuration
    pub api: ApiConfig,
    /// Where the durable cart record lives
    pub cart_storage_path: PathBuf,
    /// Shipping and tax rules
    pub pricing: PricingRules,
    /// Order submission retry policy
    pub order_retry: RetryPolicy,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Backing API configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.stride-footwear.com/v1/`
    pub base_url: Url,
    /// Client API key sent as a bearer token
    pub api_key: SecretString,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Bounded retry for calls that must eventually land (order submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api = ApiConfig::from_env()?;
        let cart_storage_path =
            PathBuf::from(get_env_or_default("STRIDE_CART_STORAGE_PATH", ".stride/cart.json"));
        let pricing = PricingRules {
            currency: parse_env("STRIDE_CURRENCY", "USD", CurrencyCode::from_str)?,
            free_shipping_threshold: parse_env(
                "STRIDE_FREE_SHIPPING_THRESHOLD",
                "100.00",
                Decimal::from_str,
            )?,
            flat_shipping_fee: parse_env("STRIDE_FLAT_SHIPPING_FEE", "9.99", Decimal::from_str)?,
            tax_rate: parse_env("STRIDE_TAX_RATE", "0.08", Decimal::from_str)?,
        };
        if pricing.tax_rate.is_sign_negative() || pricing.tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "STRIDE_TAX_RATE".to_string(),
                "must be a fraction in [0, 1)".to_string(),
            ));
        }

        let order_retry = RetryPolicy {
            max_attempts: parse_env("STRIDE_ORDER_SUBMIT_ATTEMPTS", "3", u32::from_str)?.max(1),
            delay: Duration::from_millis(parse_env(
                "STRIDE_ORDER_RETRY_DELAY_MS",
                "500",
                u64::from_str,
            )?),
        };

        Ok(Self {
            api,
            cart_storage_path,
            pricing,
            order_retry,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw_url = get_required_env("STRIDE_API_URL")?;
        let base_url = parse_base_url(&raw_url)
            .map_err(|e| ConfigError::InvalidEnvVar("STRIDE_API_URL".to_string(), e))?;
        let timeout = Duration::from_secs(parse_env(
            "STRIDE_HTTP_TIMEOUT_SECS",
            "15",
            u64::from_str,
        )?);

        Ok(Self {
            base_url,
            api_key: get_validated_secret("STRIDE_API_KEY")?,
            timeout,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse a base URL, forcing a trailing slash so relative joins keep the path.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.cannot_be_a_base() {
        return Err("must be an absolute http(s) URL".to_string());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) with the given parser.
fn parse_env<T, E: std::fmt::Display>(
    key: &str,
    default: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    parse(get_env_or_default(key, default).trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
