use std::collections::HashMap;
use std::fmt::{self, Display};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use derive_more::From;

use crate::server::ApiError;
use crate::state::State;

/// An opaque user identifier handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, From)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Maps bearer tokens to the users they were issued for.
pub struct Identity {
    tokens: HashMap<String, UserId>,
}

impl Identity {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        let tokens = tokens
            .iter()
            .map(|(token, user)| (token.clone(), UserId::from(user.clone())))
            .collect();

        Self { tokens }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<UserId> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;

        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        self.tokens.get(token.trim()).cloned()
    }
}

/// The authenticated user making the request.
///
/// Rejects the request with `401 Unauthorized` if no valid token was supplied.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

#[async_trait]
impl FromRequestParts<State> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        state
            .identity
            .authenticate(&parts.headers)
            .map(Caller)
            .ok_or_else(|| ApiError::unauthorized("a valid bearer token is required"))
    }
}
