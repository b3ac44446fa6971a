//! # Structured Logging
//!
//! The ACME span macro and the startup configuration summary.

/// Create a tracing span for ACME state machine operations
#[macro_export]
macro_rules! acme_span {
    ($operation:expr, $account_id:expr) => {
        tracing::info_span!(
            "acme_operation",
            operation = %$operation,
            account_id = %$account_id
        )
    };
    ($operation:expr, $account_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "acme_operation",
            operation = %$operation,
            account_id = %$account_id,
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        tls_enabled = config.server.tls.is_some(),
        storage_backend = ?config.database.backend,
        dev_mode = config.authority.dev_mode && !config.authority.has_ca_files(),
        crl_enabled = config.authority.crl.enabled,
        provisioners = config.provisioners.len(),
        acme_provisioner = %config.acme.provisioner,
        metrics_enabled = %config.observability.enable_metrics,
        "Certplane authority configuration"
    );
}
