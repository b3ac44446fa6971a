use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::instrument;

use super::{error::ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CrlQuery {
    /// Present (with any value) to request PEM instead of DER
    pub pem: Option<String>,
}

/// `GET /crl`
#[instrument(skip(state), name = "api_get_crl")]
pub async fn get_crl(
    State(state): State<AppState>,
    Query(query): Query<CrlQuery>,
) -> Result<Response, ApiError> {
    if query.pem.is_some() {
        let pem = state.authority.get_certificate_revocation_list_pem().await?;
        return Ok((
            [
                (header::CONTENT_TYPE, "application/x-pem-file"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"crl.pem\""),
            ],
            pem,
        )
            .into_response());
    }

    let der = state.authority.get_certificate_revocation_list().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pkix-crl"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"crl.der\""),
        ],
        der,
    )
        .into_response())
}
