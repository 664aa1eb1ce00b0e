use crate::error::AppError;
use crate::services::TokenMetadataCache;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// User ID extracted from JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    /// Display name from the auth provider's user metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub fn verify_token(secret: &str, token: &str) -> Result<(UserId, Claims), AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        AppError::Unauthorized
    })?;

    let user_id = Uuid::parse_str(&data.claims.sub).map_err(|e| {
        tracing::warn!("Invalid user_id UUID in token: {}", e);
        AppError::Unauthorized
    })?;
    Ok((UserId(user_id), data.claims))
}

/// HS256 token for `user_id`; used by tooling and tests.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    name: Option<&str>,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        name: name.map(str::to_string),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("sign token: {e}")))
}

/// JWT Authentication Middleware
pub struct JwtAuthMiddleware {
    secret: Arc<String>,
    metadata: TokenMetadataCache,
}

impl JwtAuthMiddleware {
    pub fn new(secret: impl Into<String>, metadata: TokenMetadataCache) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            metadata,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            secret: self.secret.clone(),
            metadata: self.metadata.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    secret: Arc<String>,
    metadata: TokenMetadataCache,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let secret = self.secret.clone();
        let metadata = self.metadata.clone();

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or(AppError::Unauthorized)?
                .to_string();

            let (user_id, claims) = verify_token(&secret, &token)?;
            metadata.observe(user_id.0, claims.name.as_deref()).await;
            req.extensions_mut().insert(user_id);

            service.call(req).await
        })
    }
}

/// FromRequest implementation for UserId
impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => ready(Err(AppError::Unauthorized.into())),
        }
    }
}
