//! Rules for verifying access tokens issued by the auth service.

use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or, env_required};
use jsonwebtoken::Algorithm;
use std::fmt;
use std::str::FromStr;

const MIN_SECRET_LEN: usize = 32;
const HMAC_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Shared HMAC secret plus the checks a token must pass.
///
/// Loaded from environment variables:
/// - `JWT_SECRET` (required, at least 32 characters)
/// - `JWT_ALGORITHMS` (default `HS256,HS384,HS512`; HMAC family only)
/// - `JWT_REQUIRE_EXP` (default `false`): the auth service may issue tokens
///   without `exp`; an `exp` that is present is always enforced
///
/// # Example
///
/// ```ignore
/// let config = JwtConfig::new(secret)?
///     .with_algorithms([Algorithm::HS256])
///     .requiring_exp();
/// let verifier = JwtVerifier::new(&config);
/// ```
#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithms: Vec<Algorithm>,
    pub require_exp: bool,
}

impl JwtConfig {
    /// Accepts every HMAC algorithm and does not require `exp`.
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(invalid(
                "JWT_SECRET",
                format!(
                    "must be at least {MIN_SECRET_LEN} characters (got {}). Generate one with: openssl rand -base64 32",
                    secret.len()
                ),
            ));
        }

        Ok(Self {
            secret,
            algorithms: HMAC_ALGORITHMS.to_vec(),
            require_exp: false,
        })
    }

    pub fn with_algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.algorithms = algorithms.into_iter().collect();
        self
    }

    pub fn requiring_exp(mut self) -> Self {
        self.require_exp = true;
        self
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"***")
            .field("algorithms", &self.algorithms)
            .field("require_exp", &self.require_exp)
            .finish()
    }
}

impl FromEnv for JwtConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let algorithms = parse_algorithms(&env_or_default("JWT_ALGORITHMS", "HS256,HS384,HS512"))?;
        let mut config = Self::new(env_required("JWT_SECRET")?)?.with_algorithms(algorithms);
        config.require_exp = env_parse_or("JWT_REQUIRE_EXP", false)?;
        Ok(config)
    }
}

/// Comma-separated algorithm names, restricted to what a shared secret can verify.
fn parse_algorithms(raw: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let algorithm = Algorithm::from_str(name)
            .map_err(|_| invalid("JWT_ALGORITHMS", format!("unknown algorithm '{name}'")))?;
        if !HMAC_ALGORITHMS.contains(&algorithm) {
            return Err(invalid(
                "JWT_ALGORITHMS",
                format!("'{name}' needs a key pair; only HS256, HS384 and HS512 work with JWT_SECRET"),
            ));
        }
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }

    if algorithms.is_empty() {
        return Err(invalid("JWT_ALGORITHMS", "at least one algorithm is required".to_string()));
    }
    Ok(algorithms)
}

fn invalid(key: &str, details: String) -> ConfigError {
    ConfigError::ParseError {
        key: key.to_string(),
        details,
    }
}
