use super::config::JwtConfig;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Claims carried by access tokens issued by the auth service.
///
/// Only the fields this service reads are typed; everything else is kept
/// in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// User id as issued (string or number)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// `id` claim, falling back to `sub`.
    pub fn user_id(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => self.sub.clone(),
        }
    }
}

/// Local HMAC verification of access tokens, no broker round-trip.
///
/// Algorithms and whether `exp` must be present come from [`JwtConfig`];
/// an `exp` that is present is always checked.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation =
            Validation::new(config.algorithms.first().copied().unwrap_or(Algorithm::HS256));
        validation.algorithms = config.algorithms.clone();
        validation.required_spec_claims = if config.require_exp {
            HashSet::from(["exp".to_string()])
        } else {
            HashSet::new()
        };

        tracing::info!(
            algorithms = ?config.algorithms,
            require_exp = config.require_exp,
            "JWT verifier initialized"
        );
        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Verify the signature and decode claims
    pub fn verify(&self, token: &str) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
        let token_data = decode::<TokenClaims>(token, &self.key, &self.validation)?;
        Ok(token_data.claims)
    }
}
