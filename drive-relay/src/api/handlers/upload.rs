//! HTTP handler for the upload endpoint.

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::upload::UploadResponse,
    drive::ServiceAccountAuth,
    errors::{Error, Result},
    upload,
};

/// Relay a multipart image upload to the configured Drive folder.
///
/// Mounted for every method: preflight probes get an empty 200 and anything other than POST gets
/// 405, both before credentials or the body are looked at.
#[instrument(skip_all, fields(method = %method))]
pub async fn upload_file(State(state): State<AppState>, method: Method, request: Request) -> Result<Response> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }
    if method != Method::POST {
        return Err(Error::MethodNotAllowed);
    }

    // Read on every request so a rotated key takes effect immediately
    let key = state.credentials.service_account_key()?;
    debug!(client_email = %key.client_email, "Loaded service account credentials");
    let auth = Arc::new(ServiceAccountAuth::new(key, state.config.drive.scopes.clone()));

    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|rejection| Error::Internal(anyhow::anyhow!(rejection.body_text())))?;

    let outcome = upload::relay(multipart, &state.config.upload, state.store.clone(), auth, state.clock.now()).await?;

    Ok(Json(UploadResponse::from(outcome)).into_response())
}
