//! Direct-session credential issuance.
//!
//! In the peer-to-peer low-latency transport, audio and video bypass the
//! bridge entirely: the client exchanges a short-lived credential (minted
//! here against the engine's REST surface, roughly ten minutes of validity)
//! for a direct session with the engine. The bridge's only role in that mode
//! is issuance; it never relays packets. An expired credential is handled by
//! requesting a reissue, not by retrying the old one.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Request body for credential issuance.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialRequest {
    /// Voice identity override for the direct session
    #[serde(default)]
    pub voice: Option<String>,
}

/// Short-lived direct-session credential.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    /// Opaque credential accepted by the engine for a direct session
    pub credential: String,
    /// Unix timestamp after which the credential is no longer valid
    pub expires_at: u64,
}

/// Engine REST response shape for session minting.
#[derive(Debug, Deserialize)]
struct EngineSessionResponse {
    client_secret: EngineClientSecret,
}

#[derive(Debug, Deserialize)]
struct EngineClientSecret {
    value: String,
    expires_at: u64,
}

/// `POST /v1/credential` - mint a direct-session credential.
pub async fn issue_credential(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CredentialRequest>,
) -> AppResult<Json<CredentialResponse>> {
    let Some(rest_url) = state.config.engine_rest_url.as_deref() else {
        return Err(AppError::Configuration(
            "engine REST URL not configured; direct sessions unavailable".to_string(),
        ));
    };
    let Some(api_key) = state.config.engine_api_key.as_deref() else {
        return Err(AppError::Configuration(
            "engine API key not configured".to_string(),
        ));
    };

    let voice = request
        .voice
        .or_else(|| state.config.engine_voice.clone());

    let response = state
        .http
        .post(format!("{}/v1/sessions", rest_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&serde_json::json!({ "voice": voice }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Credential(format!(
            "engine returned {status}: {body}"
        )));
    }

    let session: EngineSessionResponse = response
        .json()
        .await
        .map_err(|e| AppError::Credential(format!("unparseable engine response: {e}")))?;

    info!(expires_at = session.client_secret.expires_at, "Issued direct-session credential");

    Ok(Json(CredentialResponse {
        credential: session.client_secret.value,
        expires_at: session.client_secret.expires_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_request_defaults() {
        let request: CredentialRequest = serde_json::from_str("{}").expect("deserialize");
        assert!(request.voice.is_none());
    }

    #[test]
    fn test_engine_response_parsing() {
        let json = r#"{"client_secret":{"value":"ek_abc","expires_at":1750000000}}"#;
        let parsed: EngineSessionResponse = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed.client_secret.value, "ek_abc");
        assert_eq!(parsed.client_secret.expires_at, 1750000000);
    }

    #[test]
    fn test_credential_response_serialization() {
        let response = CredentialResponse {
            credential: "ek_abc".to_string(),
            expires_at: 1750000000,
        };
        let json = serde_json::to_string(&response).expect("serialize");
        assert!(json.contains("ek_abc"));
        assert!(json.contains("1750000000"));
    }
}
