// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JWT authentication middleware for service callers.
//!
//! The chat bridge calls `/internal/*` with a `bot` token; operators call
//! `/admin/*` with an `admin` token. Both are HS256 bearer tokens signed
//! with `JWT_SIGNING_KEY`.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Bot,
    Admin,
}

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (caller name, for logs)
    pub sub: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Authenticated caller extracted from the JWT.
#[derive(Debug, Clone)]
pub struct ServicePrincipal {
    pub subject: String,
    pub role: Role,
}

fn authenticate(request: &Request, signing_key: &[u8]) -> Result<ServicePrincipal, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let key = DecodingKey::from_secret(signing_key);
    let validation = Validation::new(Algorithm::HS256);

    let token_data =
        decode::<Claims>(token, &key, &validation).map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(ServicePrincipal {
        subject: token_data.claims.sub,
        role: token_data.claims.role,
    })
}

/// Middleware that requires a valid bot or admin token.
pub async fn require_service(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = authenticate(&request, &state.config.jwt_signing_key)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Middleware that requires an admin token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = authenticate(&request, &state.config.jwt_signing_key)?;
    if principal.role != Role::Admin {
        tracing::warn!(subject = %principal.subject, "Non-admin token on admin route");
        return Err(StatusCode::FORBIDDEN);
    }
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Create a service JWT.
pub fn create_jwt(subject: &str, role: Role, signing_key: &[u8]) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

    let claims = Claims {
        sub: subject.to_string(),
        role,
        iat: now,
        exp: now + 365 * 24 * 60 * 60, // 1 year
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}
