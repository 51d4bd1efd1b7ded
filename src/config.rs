//! Runtime configuration: built-in defaults overlaid with `STOREFRONT_*`
//! environment variables, validated before anything else starts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationError};

const ENV_PREFIX: &str = "STOREFRONT";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8083/api/v1";
const DEFAULT_STORAGE_DIR: &str = ".storefront";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8090";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_SUBMISSION_RETRIES: u32 = 3;

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutConfig {
    /// Storefront REST API root, e.g. `https://shop.example.com/api/v1`
    #[validate(url)]
    pub api_base_url: String,

    /// Directory holding the persisted cart keys
    pub storage_dir: PathBuf,

    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    /// Failed submissions allowed before the shopper must reset
    #[validate(range(min = 1, max = 10))]
    pub max_submission_retries: u32,

    /// Publishable gateway key used when the backend does not send one
    #[serde(default)]
    pub gateway_key_id: Option<String>,

    /// Enables transparent token refresh when set
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Initial bearer token
    #[serde(default)]
    pub access_token: Option<String>,

    #[validate(custom = "validate_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub nats_url: Option<String>,

    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn validate_bind_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>().map(|_| ()).map_err(|_| ValidationError::new("invalid_socket_addr"))
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

impl CheckoutConfig {
    /// Defaults overlaid with `STOREFRONT_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    pub fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("api_base_url", DEFAULT_API_BASE_URL)?
            .set_default("storage_dir", DEFAULT_STORAGE_DIR)?
            .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS as i64)?
            .set_default("max_submission_retries", i64::from(DEFAULT_MAX_SUBMISSION_RETRIES))?
            .set_default("bind_addr", DEFAULT_BIND_ADDR)?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .set_default("log_json", false)?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let loaded: CheckoutConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountEvents {
        fn on_event(&self, _: &tracing::Event<'_>, _: Context<'_, S>) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CheckoutConfig::from_config(CheckoutConfig::defaults().unwrap().build().unwrap()).unwrap();
        assert_eq!(config.max_submission_retries, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert!(config.refresh_token.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn test_overrides_apply() {
        let built = CheckoutConfig::defaults().unwrap()
            .set_override("api_base_url", "https://shop.example.com/api").unwrap()
            .set_override("max_submission_retries", 5i64).unwrap()
            .set_override("nats_url", "nats://localhost:4222").unwrap()
            .build()
            .unwrap();
        let config = CheckoutConfig::from_config(built).unwrap();
        assert_eq!(config.api_base_url, "https://shop.example.com/api");
        assert_eq!(config.max_submission_retries, 5);
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
    }

    #[test]
    fn test_validation_failure() {
        let built = CheckoutConfig::defaults().unwrap()
            .set_override("api_base_url", "not a url").unwrap()
            .set_override("max_submission_retries", 0i64).unwrap()
            .set_override("bind_addr", "localhost").unwrap()
            .set_override("log_level", "loud").unwrap()
            .build()
            .unwrap();
        let Err(ConfigError::Validation(errors)) = CheckoutConfig::from_config(built) else { panic!("expected validation error") };
        let fields = errors.field_errors();
        for field in ["api_base_url", "max_submission_retries", "bind_addr", "log_level"] {
            assert!(fields.contains_key(field), "{field} should fail");
        }
    }

    #[test]
    fn test_loading_is_silent() {
        let events = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountEvents(events.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let _ = CheckoutConfig::load();
            let bad = CheckoutConfig::defaults().unwrap().set_override("log_level", "loud").unwrap().build().unwrap();
            assert!(CheckoutConfig::from_config(bad).is_err());
        });
        assert_eq!(events.load(Ordering::SeqCst), 0, "nothing may log before main installs tracing");
    }
}
