//! Tracing setup for services embedding the cache

use crate::error::{CacheError, Result};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `directive` is added on top of `RUST_LOG` (e.g. `"classify_cache=info"`).
/// With `LOG_FORMAT=json` events are emitted in Cloud Logging format.
pub fn init_tracing(directive: &str) -> Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    if json_logging(std::env::var("LOG_FORMAT").ok().as_deref()) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .try_init()
            .map_err(|e| CacheError::Config(e.to_string()))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .map_err(|e| CacheError::Config(e.to_string()))
    }
}

fn json_logging(log_format: Option<&str>) -> bool {
    log_format == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_logging_only_for_json() {
        assert!(json_logging(Some("json")));
        assert!(!json_logging(Some("text")));
        assert!(!json_logging(None));
    }

    #[test]
    fn test_invalid_directive_is_config_error() {
        let err = init_tracing("classify_cache=notalevel").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
