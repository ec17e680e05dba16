//! Backend configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPABASE_URL` - Base URL of the hosted backend project
//! - `SUPABASE_ANON_KEY` - Public API key of the project (high entropy)
//!
//! ## Optional
//! - `KUNDURA_STATE_DIR` - Local state directory (default: .kundura)
//! - `KUNDURA_NOTIFICATION_LIMIT` - Notifications shown in the bell (default: 10)
//! - `KUNDURA_REALTIME_HEARTBEAT_SECS` - Realtime heartbeat interval (default: 25)
//! - `KUNDURA_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 15)
//! - `KUNDURA_IMAGE_BUCKET` - Storage bucket for catalog images (default: product-images)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

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
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
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

/// Hosted backend and client configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abcd.supabase.co`
    pub url: Url,
    /// Public (anon) API key
    pub anon_key: SecretString,
    /// Directory for client-side state such as the view-count session id
    pub state_dir: PathBuf,
    /// How many notifications the bell shows
    pub notification_limit: usize,
    /// Realtime heartbeat interval
    pub heartbeat_interval: Duration,
    /// Timeout for every HTTP request
    pub request_timeout: Duration,
    /// Storage bucket for product, brand and slider images
    pub image_bucket: String,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("state_dir", &self.state_dir)
            .field("notification_limit", &self.notification_limit)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("request_timeout", &self.request_timeout)
            .field("image_bucket", &self.image_bucket)
            .field("sentry_dsn", &self.sentry_dsn.as_ref().map(|_| "[SET]"))
            .field("sentry_environment", &self.sentry_environment)
            .finish()
    }
}

impl BackendConfig {
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

        let url = get_required_env("SUPABASE_URL")?;
        let url = Url::parse(&url)
            .map_err(|e| ConfigError::InvalidEnvVar("SUPABASE_URL".to_string(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                "SUPABASE_URL".to_string(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let anon_key = get_validated_secret("SUPABASE_ANON_KEY")?;

        Ok(Self {
            url,
            anon_key,
            state_dir: PathBuf::from(get_env_or_default("KUNDURA_STATE_DIR", ".kundura")),
            notification_limit: get_parsed_env("KUNDURA_NOTIFICATION_LIMIT", 10)?,
            heartbeat_interval: Duration::from_secs(get_parsed_env(
                "KUNDURA_REALTIME_HEARTBEAT_SECS",
                25,
            )?),
            request_timeout: Duration::from_secs(get_parsed_env(
                "KUNDURA_REQUEST_TIMEOUT_SECS",
                15,
            )?),
            image_bucket: get_env_or_default("KUNDURA_IMAGE_BUCKET", "product-images"),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Configuration for a given project with every optional value defaulted.
    #[must_use]
    pub fn new(url: Url, anon_key: SecretString) -> Self {
        Self {
            url,
            anon_key,
            state_dir: PathBuf::from(".kundura"),
            notification_limit: 10,
            heartbeat_interval: Duration::from_secs(25),
            request_timeout: Duration::from_secs(15),
            image_bucket: "product-images".to_string(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Websocket URL of the realtime endpoint, without the API key.
    #[must_use]
    pub fn realtime_url(&self) -> Url {
        let mut url = self.url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // Only fails for cannot-be-a-base URLs, which from_env rejects
        let _ = url.set_scheme(scheme);
        url.set_path("/realtime/v1/websocket");
        url.set_query(Some("vsn=1.0.0"));
        url
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed into `T`, or `default` when unset.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
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
    let len = s.len() as f64;
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

    // Real API keys (JWTs) have high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
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
