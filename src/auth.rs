//! Bearer-token authentication for the query endpoint.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Accepted API keys. Authentication is disabled when no key is configured.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    enabled: bool,
    tokens: HashSet<String>,
}

impl AuthConfig {
    /// Create a new AuthConfig from a list of API keys.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, String> {
        let mut valid_tokens = HashSet::new();
        for token in tokens {
            let trimmed = token.trim().to_string();
            if trimmed.is_empty() {
                return Err("Empty API key value in configuration".to_string());
            }
            valid_tokens.insert(trimmed);
        }
        let enabled = !valid_tokens.is_empty();
        Ok(Self {
            enabled,
            tokens: valid_tokens,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Reject requests without a valid `Authorization: Bearer <key>` header.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    let token = match extract_bearer_token(&request) {
        Ok(Some(token)) => token,
        Ok(None) => {
            warn!("Authentication failed: missing Authorization header");
            return unauthorized_response("Missing API key");
        }
        Err(msg) => {
            warn!("Authentication failed: invalid header format");
            return unauthorized_response(msg);
        }
    };

    if verify_token(&auth_config, token) {
        next.run(request).await
    } else {
        warn!(token_prefix = %mask_token(token), "Authentication failed: invalid API key");
        unauthorized_response("Invalid API key")
    }
}

fn extract_bearer_token(request: &Request<Body>) -> Result<Option<&str>, &'static str> {
    let Some(auth_header) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;

    let Some((scheme, token)) = auth_str.split_once(' ') else {
        return Err("Invalid authentication scheme");
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err("Invalid authentication scheme");
    }

    let token = token.trim();
    if token.is_empty() {
        return Err("Bearer token is empty");
    }

    Ok(Some(token))
}

fn verify_token(config: &AuthConfig, provided: &str) -> bool {
    let mut found = false;
    for expected in &config.tokens {
        if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            found = true;
        }
    }
    found
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_token(token: &str) -> String {
    match token.char_indices().nth(3) {
        Some((idx, _)) => format!("{}***", &token[..idx]),
        None => "***".to_string(),
    }
}

fn unauthorized_response(message: &str) -> Response {
    #[derive(Serialize)]
    struct ErrorResponse<'a> {
        success: bool,
        error: &'a str,
        error_type: &'static str,
    }

    let body = ErrorResponse {
        success: false,
        error: message,
        error_type: "AuthenticationError",
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
