//! Identity gateway.
//!
//! Identity issuance lives outside this engine. The gateway only resolves a
//! bearer token to a [`Caller`]; every authorization decision is made by the
//! reducers against that caller.

mod extract;

pub use extract::AuthenticatedCaller;

use crate::config::IdentityConfig;
use crate::types::Caller;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves bearer tokens to callers.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// The caller behind `token`, or `None` when the token is unknown
    async fn resolve(&self, token: &str) -> Option<Caller>;
}

/// Token table seeded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityGateway {
    tokens: HashMap<String, Caller>,
}

impl StaticIdentityGateway {
    /// Creates an empty gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway holding every grant in `config`
    #[must_use]
    pub fn from_config(config: &IdentityConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|grant| (grant.token.clone(), grant.caller))
            .collect();
        Self { tokens }
    }

    /// Register a token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, caller: Caller) -> Self {
        self.tokens.insert(token.into(), caller);
        self
    }
}

#[async_trait]
impl IdentityGateway for StaticIdentityGateway {
    async fn resolve(&self, token: &str) -> Option<Caller> {
        self.tokens.get(token).copied()
    }
}
