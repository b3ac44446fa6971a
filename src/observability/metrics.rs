//! # Metrics Collection
//!
//! Prometheus counters for issuance, replay, revocation and CRL activity.

use crate::config::ObservabilityConfig;
use crate::errors::{CertplaneError, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const CERTIFICATES_ISSUED: &str = "certplane_certificates_issued_total";
pub const TOKENS_REPLAYED: &str = "certplane_tokens_replayed_total";
pub const REVOCATIONS: &str = "certplane_revocations_total";
pub const CRL_GENERATIONS: &str = "certplane_crl_generations_total";

/// Metrics recorder that tracks authority metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a signed certificate
    pub fn record_certificate_issued(&self, provisioner_type: &str) {
        counter!(CERTIFICATES_ISSUED).increment(1);
        let labels = [("provisioner_type", provisioner_type.to_string())];
        counter!(CERTIFICATES_ISSUED, &labels).increment(1);
    }

    /// Record a one-time token presented a second time
    pub fn record_token_replayed(&self, provisioner: &str) {
        let labels = [("provisioner", provisioner.to_string())];
        counter!(TOKENS_REPLAYED, &labels).increment(1);
    }

    /// Record a committed revocation
    pub fn record_revocation(&self, source: &str) {
        counter!(REVOCATIONS).increment(1);
        let labels = [("source", source.to_string())];
        counter!(REVOCATIONS, &labels).increment(1);
    }

    /// Record a CRL rebuild
    pub fn record_crl_generated(&self, entries: usize) {
        counter!(CRL_GENERATIONS).increment(1);
        let labels = [("empty", (entries == 0).to_string())];
        counter!(CRL_GENERATIONS, &labels).increment(1);
    }

    pub fn register_authority_metrics(&self) {
        describe_counter!(CERTIFICATES_ISSUED, Unit::Count, "Certificates signed by the authority");
        describe_counter!(
            TOKENS_REPLAYED,
            Unit::Count,
            "One-time tokens rejected because they were already redeemed"
        );
        describe_counter!(REVOCATIONS, Unit::Count, "Certificates revoked");
        describe_counter!(CRL_GENERATIONS, Unit::Count, "Certificate revocation lists generated");
    }
}

/// Global metrics recorder instance
static METRICS: once_cell::sync::Lazy<Arc<RwLock<Option<MetricsRecorder>>>> =
    once_cell::sync::Lazy::new(|| Arc::new(RwLock::new(None)));

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        CertplaneError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            CertplaneError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    let recorder = MetricsRecorder::new();
    {
        let mut metrics = METRICS.write().await;
        *metrics = Some(recorder.clone());
    }
    recorder.register_authority_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

/// Get the global metrics recorder
pub async fn get_metrics() -> Option<MetricsRecorder> {
    METRICS.read().await.clone()
}

pub async fn record_certificate_issued(provisioner_type: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_certificate_issued(provisioner_type);
    }
}

pub async fn record_token_replayed(provisioner: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_token_replayed(provisioner);
    }
}

pub async fn record_revocation(source: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_revocation(source);
    }
}

pub async fn record_crl_generated(entries: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_crl_generated(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let recorder = MetricsRecorder::new();
        recorder.register_authority_metrics();
        recorder.record_certificate_issued("JWK");
        recorder.record_token_replayed("ops");
        recorder.record_revocation("acme");
        recorder.record_crl_generated(0);
    }

    #[tokio::test]
    async fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).await.is_ok());
        assert!(get_metrics().await.is_none());
    }

    #[tokio::test]
    async fn test_init_metrics_no_port() {
        let config =
            ObservabilityConfig { enable_metrics: true, metrics_port: 0, ..Default::default() };
        assert!(init_metrics(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_global_helpers_without_recorder() {
        record_certificate_issued("ACME").await;
        record_revocation("api").await;
    }
}
