use tracing_subscriber::{EnvFilter, fmt};

/// Installs the process-wide compact subscriber. `log_filter` comes from
/// configuration (already overridden by `RUST_LOG` when set); an unparsable
/// filter falls back to `info`. Safe to call more than once.
pub fn init_tracing(service_name: &str, log_filter: &str) {
    let (env_filter, filter_error) = match EnvFilter::try_new(log_filter) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err.to_string())),
    };

    let _ = fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .compact()
        .try_init();

    if let Some(error) = filter_error {
        tracing::warn!(log_filter, %error, "invalid log filter, using info");
    }
    tracing::info!(service = service_name, "tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_with_bad_filter_does_not_panic() {
        init_tracing("observability-test", "info");
        init_tracing("observability-test", "not a [valid filter");
    }
}
