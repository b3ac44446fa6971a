use std::net::SocketAddr;

use axum::{
    extract::connect_info::Connected,
    serve::{IncomingStream, Listener},
    Router,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{error, info, warn};

use crate::config::{build_server_config, ServerConfig};
use crate::errors::{CertplaneError, Result};

/// Per-connection data made available to handlers through `ConnectInfo`.
#[derive(Debug, Clone)]
pub struct TlsConnectInfo {
    pub remote_addr: SocketAddr,
    /// Leaf client certificate (DER) presented during the handshake
    pub peer_certificate: Option<Vec<u8>>,
}

impl Connected<IncomingStream<'_, TlsListener>> for TlsConnectInfo {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        let (_, session) = stream.io().get_ref();
        let peer_certificate =
            session.peer_certificates().and_then(|certs| certs.first()).map(|c| c.to_vec());
        Self { remote_addr: *stream.remote_addr(), peer_certificate }
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for TlsConnectInfo {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self { remote_addr: *stream.remote_addr(), peer_certificate: None }
    }
}

pub async fn start_api_server<F>(config: &ServerConfig, router: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| CertplaneError::config(format!("Invalid server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await.map_err(|e| CertplaneError::Io {
        source: e,
        context: format!("Failed to bind API server on {}", addr),
    })?;

    if let Some(tls_config) = config.tls.as_ref() {
        let (server_config, certificate_info) = build_server_config(tls_config)?;
        info!(
            address = %addr,
            subject = %certificate_info.subject,
            expires_at = %certificate_info.not_after,
            client_auth = ?tls_config.client_auth,
            "Starting HTTPS API server"
        );
        let tls_listener = TlsListener::new(listener, TlsAcceptor::from(server_config));
        axum::serve(
            tls_listener,
            router.into_make_service_with_connect_info::<TlsConnectInfo>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CertplaneError::Io { source: e, context: "HTTPS API server error".into() })?;
    } else {
        info!(address = %addr, "Starting HTTP API server");
        axum::serve(listener, router.into_make_service_with_connect_info::<TlsConnectInfo>())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CertplaneError::Io { source: e, context: "API server error".into() })?;
    }

    info!("API server shutdown completed");
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "API server shutdown listener failed");
    }
}

pub struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        Self { listener, acceptor }
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => match self.acceptor.accept(stream).await {
                    Ok(tls_stream) => return (tls_stream, addr),
                    Err(err) => {
                        warn!(error = %err, %addr, "TLS handshake failed");
                        continue;
                    }
                },
                Err(err) => {
                    if is_connection_error(&err) {
                        continue;
                    }
                    error!("HTTPS accept error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.listener.local_addr()
    }
}

fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
