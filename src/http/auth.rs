//! HTTP Basic authentication step.
//!
//! Credential checking itself is opaque to the gateway: an [`Authenticator`]
//! receives either a token (in the username slot) or a username/password
//! pair and answers with the authenticated [`Principal`], if any.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pipeline::{Flow, RequestContext, RequestStep};
use super::response;

/// The authenticated caller, available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
}

/// Verifies credentials presented by a caller.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `username_or_token` holds a bearer token or a username; `password`
    /// is ignored for tokens.
    async fn verify(&self, username_or_token: &str, password: &str) -> Option<Principal>;
}

/// Rejects requests without valid Basic credentials.
pub struct AuthStep {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthStep {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl RequestStep for AuthStep {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request) -> Flow {
        let credentials = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic);

        let Some((username_or_token, password)) = credentials else {
            debug!(route = %ctx.route_key, "Missing or malformed credentials");
            return Flow::Respond(response::unauthorized());
        };

        match self.authenticator.verify(&username_or_token, &password).await {
            Some(principal) => {
                request.extensions_mut().insert(principal);
                Flow::Continue
            }
            None => {
                debug!(route = %ctx.route_key, "Credentials rejected");
                Flow::Respond(response::unauthorized())
            }
        }
    }
}

/// Decode `Basic base64(user:password)` into its two halves.
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;

    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), password.to_string()))
}
