use std::convert::Infallible;

use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::request::Parts,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{error::ApiError, server::TlsConnectInfo, AppState};
use crate::authority::{AuthorizeMethod, Credential, RevokeOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    #[serde(default)]
    pub serial: String,
    /// One-time token; when empty the client certificate authorizes the request
    #[serde(default)]
    pub ott: String,
    #[serde(default)]
    pub reason_code: i32,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub passive: bool,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub status: &'static str,
}

/// DER client certificate from the TLS handshake, if the client sent one.
#[derive(Debug, Clone, Default)]
pub struct ClientCertificate(pub Option<Vec<u8>>);

impl<S: Send + Sync> FromRequestParts<S> for ClientCertificate {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<TlsConnectInfo>>()
                .and_then(|ConnectInfo(info)| info.peer_certificate.clone()),
        ))
    }
}

/// `POST /revoke`
#[instrument(skip(state, client_cert, body), fields(serial = %body.serial), name = "api_revoke")]
pub async fn revoke(
    State(state): State<AppState>,
    client_cert: ClientCertificate,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let mut options = RevokeOptions {
        serial: body.serial,
        reason: body.reason,
        reason_code: body.reason_code,
        passive: body.passive,
        ..Default::default()
    };
    options.validate()?;

    let credential = if !body.ott.is_empty() {
        Credential::Token(body.ott)
    } else if let ClientCertificate(Some(der)) = client_cert {
        options.mtls = true;
        Credential::PeerCertificate(der)
    } else {
        return Err(ApiError::bad_request(
            "revocation requires a one-time token or a client certificate",
        ));
    };

    let granted = state
        .authority
        .authorize(&credential, AuthorizeMethod::Revoke { serial: &options.serial })
        .await?;
    options.provisioner_id = granted.provisioner().map(|p| p.id.clone());

    state.authority.revoke(&options).await?;
    info!(mtls = options.mtls, "Revocation request completed");
    Ok(Json(RevokeResponse { status: "ok" }))
}
