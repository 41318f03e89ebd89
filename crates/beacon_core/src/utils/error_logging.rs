//! Error logging with miette formatting in tracing

/// Log an error at ERROR level using its Debug (miette) rendering
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let err = &$err;
        tracing::error!("{:?}", err);
    }};
    ($msg:expr, $err:expr) => {{
        let err = &$err;
        tracing::error!("{}: {:?}", $msg, err);
    }};
}

/// Log a failure that was contained and did not abort the caller
///
/// Used by fan-out code where one branch failing is expected and the
/// remaining branches still produce a result.
#[macro_export]
macro_rules! log_contained {
    ($what:expr, $err:expr) => {{
        let err = &$err;
        tracing::warn!(target: "beacon_core::contained", "{} failed: {}", $what, err);
    }};
}

/// Render an error and its source chain on one line
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        out.push_str(": ");
        out.push_str(&source.to_string());
        current = source.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_log_contained_emits_warning() {
        let err = crate::CoreError::transient("meta_ads", "fetch_metrics", "HTTP 503");
        crate::log_contained!("meta_ads", err);
        assert!(logs_contain("meta_ads failed"));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = crate::CoreError::ConfigurationError {
            config_path: "beacon.toml".to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: Box::new(io),
        };
        let rendered = error_chain(&err);
        assert!(rendered.starts_with("Configuration error"));
        assert!(rendered.ends_with("disk gone"));
    }
}
