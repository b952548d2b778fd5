use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use messaging::{Broker, CancellationToken, RpcClient, RpcError};
use std::sync::Arc;

/// Answers "is this bearer token valid?".
///
/// `Ok(false)` is a rejected token; `Err` is an infrastructure failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str, cancel: CancellationToken) -> Result<bool, RpcError>;
}

#[async_trait]
impl<B: Broker> TokenValidator for RpcClient<B> {
    async fn validate(&self, token: &str, cancel: CancellationToken) -> Result<bool, RpcError> {
        self.validate_with_cancel(token, cancel).await
    }
}

/// The bearer token accepted for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedToken(pub String);

/// State for [`rpc_auth_middleware`].
#[derive(Clone)]
pub struct AuthState {
    validator: Arc<dyn TokenValidator>,
    shutdown: CancellationToken,
}

impl AuthState {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            validator,
            shutdown: CancellationToken::new(),
        }
    }

    /// In-flight validations resolve as cancelled once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Token from `Authorization`, with a leading `Bearer` and surrounding
/// whitespace trimmed. `None` if the header is absent or blank.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer").unwrap_or(value).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Bearer authentication backed by the remote validator
///
/// - no token: 401 `No token provided`
/// - rejected: 401 `Invalid token`
/// - broker failure, timeout or cancellation: 503 `Service temporarily unavailable`
///
/// Inserts [`AuthenticatedToken`] into request extensions on success.
///
/// # Example
///
/// ```ignore
/// let auth = AuthState::new(Arc::new(rpc_client));
/// let protected = Router::new()
///     .route("/api/session", get(handler))
///     .layer(axum::middleware::from_fn_with_state(auth, rpc_auth_middleware));
/// ```
pub async fn rpc_auth_middleware(
    State(auth): State<AuthState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let Some(token) = extract_bearer_token(&headers) else {
        tracing::debug!("No bearer token in Authorization header");
        return Err((StatusCode::UNAUTHORIZED, "No token provided"));
    };

    match auth
        .validator
        .validate(&token, auth.shutdown.child_token())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("Token rejected by validator");
            return Err((StatusCode::UNAUTHORIZED, "Invalid token"));
        }
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "Token validation unavailable");
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            ));
        }
    }

    request.extensions_mut().insert(AuthenticatedToken(token));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, body::Body, routing::get};
    use http_body_util::BodyExt;
    use messaging::BrokerError;
    use mockall::predicate::eq;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn echo(Extension(token): Extension<AuthenticatedToken>) -> String {
        token.0
    }

    fn app(validator: MockTokenValidator) -> Router {
        let auth = AuthState::new(Arc::new(validator));
        Router::new()
            .route("/api/session", get(echo))
            .layer(axum::middleware::from_fn_with_state(
                auth,
                rpc_auth_middleware,
            ))
    }

    async fn call(app: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri("/api/session");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, "  Bearer   abc.def  ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, "abc.def".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let mut validator = MockTokenValidator::new();
        validator
            .expect_validate()
            .with(eq("good-token"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(true));

        let (status, body) = call(app(validator), Some("Bearer good-token")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "good-token");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let mut validator = MockTokenValidator::new();
        validator.expect_validate().never();

        let (status, body) = call(app(validator), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "No token provided");
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let mut validator = MockTokenValidator::new();
        validator.expect_validate().returning(|_, _| Ok(false));

        let (status, body) = call(app(validator), Some("Bearer bad")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid token");
    }

    #[tokio::test]
    async fn test_infrastructure_failures_are_unavailable() {
        let failures: Vec<fn() -> RpcError> = vec![
            || RpcError::Timeout(Duration::from_secs(10)),
            || RpcError::Broker(BrokerError::publish("channel closed")),
            || RpcError::Cancelled,
        ];

        for failure in failures {
            let mut validator = MockTokenValidator::new();
            validator
                .expect_validate()
                .returning(move |_, _| Err(failure()));

            let (status, body) = call(app(validator), Some("Bearer token")).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, "Service temporarily unavailable");
        }
    }

    #[tokio::test]
    async fn test_shutdown_token_is_propagated() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut validator = MockTokenValidator::new();
        validator
            .expect_validate()
            .returning(|_, cancel| {
                if cancel.is_cancelled() {
                    Err(RpcError::Cancelled)
                } else {
                    Ok(true)
                }
            });

        let auth = AuthState::new(Arc::new(validator)).with_shutdown(shutdown);
        let app = Router::new()
            .route("/api/session", get(echo))
            .layer(axum::middleware::from_fn_with_state(
                auth,
                rpc_auth_middleware,
            ));

        let (status, _) = call(app, Some("Bearer token")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
