//! Authentication stage: API-key lookup plus optional signature check.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use super::{buffer_request, AuthContext, STORE_TIMEOUT};
use crate::error::{ApiError, Result};
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolve the caller behind `X-API-Key`, reject disabled callers, verify
/// the request signature when enabled, and attach the caller to the request
/// scope for every later stage.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or(ApiError::InvalidApiKey)?;

    let lookup = tokio::time::timeout(STORE_TIMEOUT, state.client_repo.get_by_api_key(&api_key))
        .await
        .map_err(|_| ApiError::internal("client lookup timed out"))?;

    let client = match lookup {
        Ok(Some(client)) => client,
        Ok(None) => {
            warn!("authentication failed: unknown API key");
            return Err(ApiError::InvalidApiKey);
        }
        Err(err) => {
            error!(error = %err, "store error during authentication");
            return Err(err);
        }
    };

    if !client.is_active() {
        warn!(client_id = %client.id_hex(), "authentication failed: client disabled");
        return Err(ApiError::client_disabled(client.id_hex()));
    }

    if state.config.auth.enable_signature {
        let (body, restored) = buffer_request(request).await?;
        state.signature_verifier.verify(
            restored.method(),
            restored.uri().path(),
            restored.headers(),
            &body,
            &client.secret,
        )?;
        debug!(client_id = %client.id_hex(), "signature verified");
        request = restored;
    }

    debug!(client_id = %client.id_hex(), name = %client.name, "authenticated");
    request
        .extensions_mut()
        .insert(AuthContext { client, api_key });

    Ok(next.run(request).await)
}
