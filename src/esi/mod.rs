//! Upstream market API integration: the bounded-concurrency HTTP client,
//! wire DTOs, name resolution, and the market-history cache.

pub mod client;
pub mod dto;
pub mod history;
pub mod names;

pub use client::{AuthError, EsiClient};
pub use history::HistoryCache;
pub use names::NameService;

/// Yields a currently-valid access token for authenticated endpoints.
/// The SSO handshake and refresh flow live outside this crate; anything
/// that can produce a bearer token can drive the dashboard.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

/// Fixed token, used by tests and by deployments that refresh out-of-band.
pub struct StaticToken(pub String);

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}
