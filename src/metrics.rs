//! Prometheus metrics collection for blockip.
//!
//! - `blockip_rule_mutations_total{operation,outcome}` - rule engine mutations
//! - `blockip_auth_cache_lookups_total{result}` - authorization cache hits/misses
//! - `blockip_request_errors_total{code}` - errors returned to callers
//!
//! Recording is a no-op until [`init`] has run, so library users and tests
//! never need a registry.

use crate::error::ServiceError;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Rule mutations by operation and outcome.
pub static RULE_MUTATIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Authorization cache lookups (`hit` / `miss`).
pub static AUTH_CACHE_LOOKUPS: OnceLock<IntCounterVec> = OnceLock::new();

/// Errors surfaced to callers, by error code.
pub static REQUEST_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup; repeated calls keep the first registration.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(RULE_MUTATIONS, IntCounterVec::new(Opts::new("blockip_rule_mutations_total", "Rule mutations by operation and outcome"), &["operation", "outcome"]));
    register!(AUTH_CACHE_LOOKUPS, IntCounterVec::new(Opts::new("blockip_auth_cache_lookups_total", "Authorization cache lookups"), &["result"]));
    register!(REQUEST_ERRORS, IntCounterVec::new(Opts::new("blockip_request_errors_total", "Errors returned to callers by code"), &["code"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

/// Record a rule mutation. `outcome` is `ok` or the error code.
#[inline]
pub fn record_mutation<T>(operation: &str, result: &Result<T, ServiceError>) {
    if let Some(c) = RULE_MUTATIONS.get() {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.error_code(),
        };
        c.with_label_values(&[operation, outcome]).inc();
    }
}

#[inline]
pub fn record_cache_lookup(hit: bool) {
    if let Some(c) = AUTH_CACHE_LOOKUPS.get() {
        c.with_label_values(&[if hit { "hit" } else { "miss" }]).inc();
    }
}

#[inline]
pub fn record_request_error(error: &ServiceError) {
    if let Some(c) = REQUEST_ERRORS.get() {
        c.with_label_values(&[error.error_code()]).inc();
    }
}
