//! Handler for `token_created_queue` events.
//!
//! The auth service announces freshly issued tokens here. Each access token
//! is verified locally with the shared secret; the broker RPC path is never
//! involved.

use async_trait::async_trait;
use axum_helpers::JwtVerifier;
use messaging::{Envelope, EventHandler, ProcessingError};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Accepted shapes: `{"result": {...}}` or the payload itself.
#[derive(Deserialize)]
#[serde(untagged)]
enum TokenCreated {
    Wrapped { result: TokenPayload },
    Flat(TokenPayload),
}

impl TokenCreated {
    fn into_payload(self) -> TokenPayload {
        match self {
            TokenCreated::Wrapped { result } => result,
            TokenCreated::Flat(payload) => payload,
        }
    }
}

pub fn parse_token_created(body: &[u8]) -> Result<TokenPayload, ProcessingError> {
    let event: TokenCreated = serde_json::from_slice(body)?;
    Ok(event.into_payload())
}

pub struct TokenCreatedHandler {
    verifier: JwtVerifier,
}

impl TokenCreatedHandler {
    pub fn new(verifier: JwtVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl EventHandler for TokenCreatedHandler {
    async fn handle(&self, event: &Envelope) -> Result<(), ProcessingError> {
        debug!(bytes = event.body.len(), "Incoming token event");
        let payload = parse_token_created(&event.body)?;

        let claims = self
            .verifier
            .verify(&payload.access_token)
            .map_err(|e| ProcessingError::permanent_with_source("invalid access token", e))?;

        info!(
            user_id = claims.user_id().as_deref().unwrap_or("<unknown>"),
            email = payload.email.as_deref().unwrap_or(""),
            "Token is valid"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "token_created"
    }
}
