//! Logging and error tracking setup.
//!
//! Call [`init`] once at startup and keep the returned guard alive; dropping
//! it flushes pending Sentry events.

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::StorefrontConfig;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "stride_storefront=info";

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
///
/// Warnings and errors become events; info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Install the tracing subscriber and, when a DSN is configured, Sentry.
///
/// Sentry is initialized first so the tracing layer reports to it.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(
    config: &StorefrontConfig,
) -> Result<Option<sentry::ClientInitGuard>, tracing_subscriber::util::TryInitError> {
    let guard = init_sentry(config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::config::{ApiConfig, RetryPolicy};
    use crate::pricing::PricingRules;

    #[test]
    fn test_no_dsn_skips_sentry() {
        let config = StorefrontConfig {
            api: ApiConfig {
                base_url: "https://api.example.com/v1/".parse().unwrap(),
                api_key: SecretString::from("sk_test_8fJ2qLz9XvB4mN7pR1tY"),
                timeout: Duration::from_secs(5),
            },
            cart_storage_path: PathBuf::from("cart.json"),
            pricing: PricingRules::default(),
            order_retry: RetryPolicy::default(),
            sentry_dsn: None,
            sentry_environment: None,
        };
        assert!(init_sentry(&config).is_none());
    }
}
