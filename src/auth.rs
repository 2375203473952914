//! API-key gateway: resolves the caller's identity before a handler runs.
//!
//! The key is read from the `X-API-Key` header or the `api_key` query
//! parameter and looked up under the identity deadline. On success an
//! [`AuthContext`] is attached to the request extensions.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::user::{ProviderCredentials, UserRecord};
use crate::services::access::AccessMode;
use crate::services::deadline::with_deadline;
use crate::services::identity::IdentityStore;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Identity attached to a request by [`AuthLayer`]. `user` is `None` only on
/// routes where the key is optional and none was presented.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: Option<UserRecord>,
}

impl AuthContext {
    pub fn user(&self) -> Result<&UserRecord, AppError> {
        self.user
            .as_ref()
            .ok_or_else(|| AppError::Unauthorized("Missing API key".into()))
    }

    /// Provider credentials to use for `mode`; public access needs none.
    pub fn credentials_for(&self, mode: AccessMode) -> Result<Option<ProviderCredentials>, AppError> {
        match mode {
            AccessMode::Public => Ok(None),
            AccessMode::Private => {
                let user = self.user.as_ref().ok_or_else(|| {
                    AppError::Unauthorized("Private access requires an API key".into())
                })?;
                Ok(user.provider_credentials())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequirement {
    Required,
    /// Requests without a key pass through anonymously; a presented key must
    /// still be valid.
    Optional,
}

#[derive(Clone)]
pub struct AuthLayer {
    identity: Arc<IdentityStore>,
    timeout: Duration,
    requirement: KeyRequirement,
}

impl AuthLayer {
    pub fn required(identity: Arc<IdentityStore>, timeout: Duration) -> Self {
        Self {
            identity,
            timeout,
            requirement: KeyRequirement::Required,
        }
    }

    pub fn optional(identity: Arc<IdentityStore>, timeout: Duration) -> Self {
        Self {
            identity,
            timeout,
            requirement: KeyRequirement::Optional,
        }
    }
}

impl<S> tower::Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            identity: self.identity.clone(),
            timeout: self.timeout,
            requirement: self.requirement,
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    identity: Arc<IdentityStore>,
    timeout: Duration,
    requirement: KeyRequirement,
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

fn extract_api_key<B>(req: &axum::http::Request<B>) -> Option<String> {
    let from_header = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());

    from_header
        .or_else(|| {
            Query::<ApiKeyQuery>::try_from_uri(req.uri())
                .ok()
                .and_then(|Query(q)| q.api_key)
        })
        .filter(|k| !k.is_empty())
}

async fn resolve(
    identity: &IdentityStore,
    timeout: Duration,
    api_key: &str,
) -> Result<UserRecord, AppError> {
    match with_deadline(timeout, identity.get_user_by_api_key(api_key)).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(AppError::Forbidden("Invalid API key".into())),
        Err(elapsed) => {
            tracing::error!(error = %elapsed, "Identity lookup timed out");
            Err(elapsed.into())
        }
    }
}

impl<S, B> tower::Service<axum::http::Request<B>> for AuthService<S>
where
    S: tower::Service<axum::http::Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        let identity = self.identity.clone();
        let timeout = self.timeout;
        let requirement = self.requirement;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let user = match extract_api_key(&req) {
                Some(api_key) => match resolve(&identity, timeout, &api_key).await {
                    Ok(user) => Some(user),
                    Err(e) => return Ok(e.into_response()),
                },
                None if requirement == KeyRequirement::Required => {
                    return Ok(AppError::Unauthorized("Missing API key".into()).into_response());
                }
                None => None,
            };

            if let Some(user) = &user {
                tracing::debug!(user_id = %user.id, "Request authenticated");
            }
            req.extensions_mut().insert(AuthContext { user });
            inner.call(req).await
        })
    }
}
