//! Rejection counters for the verification layer.

use prometheus::{IntCounterVec, Opts, Registry};

/// `jose_errors{type}` counts JWS-level rejections, `http_errors{type}`
/// counts requests rejected before the body was parsed.
#[derive(Clone)]
pub struct WfeStats {
    jose_errors: IntCounterVec,
    http_errors: IntCounterVec,
}

impl WfeStats {
    /// Create counters and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let jose_errors = IntCounterVec::new(
            Opts::new("jose_errors", "Number of JOSE errors, labelled by type"),
            &["type"],
        )?;
        registry.register(Box::new(jose_errors.clone()))?;

        let http_errors = IntCounterVec::new(
            Opts::new("http_errors", "Number of HTTP request errors, labelled by type"),
            &["type"],
        )?;
        registry.register(Box::new(http_errors.clone()))?;

        Ok(Self {
            jose_errors,
            http_errors,
        })
    }

    pub fn jose_error(&self, kind: &str) {
        self.jose_errors.with_label_values(&[kind]).inc();
    }

    pub fn http_error(&self, kind: &str) {
        self.http_errors.with_label_values(&[kind]).inc();
    }

    pub fn jose_error_count(&self, kind: &str) -> u64 {
        self.jose_errors.with_label_values(&[kind]).get()
    }

    pub fn http_error_count(&self, kind: &str) -> u64 {
        self.http_errors.with_label_values(&[kind]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered_and_counted() {
        let registry = Registry::new();
        let stats = WfeStats::new(&registry).unwrap();

        stats.jose_error("JWSMultiSig");
        stats.jose_error("JWSMultiSig");
        stats.http_error("NoContentType");

        assert_eq!(stats.jose_error_count("JWSMultiSig"), 2);
        assert_eq!(stats.http_error_count("NoContentType"), 1);
        assert_eq!(stats.jose_error_count("JWSParseError"), 0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"jose_errors".to_string()));
        assert!(names.contains(&"http_errors".to_string()));

        // Registering twice into one registry is refused.
        assert!(WfeStats::new(&registry).is_err());
    }
}
