//! Bounded-concurrency HTTP client for the upstream market API.
//!
//! The API pages via an `X-Pages` response header, revalidates with ETags,
//! rate limits with `Retry-After`, and advertises an error budget through
//! `X-ESI-Error-Limit-Remain` / `X-ESI-Error-Limit-Reset`. One counting
//! semaphore is the sole global admission control for outbound requests.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 250;
const RETRY_AFTER_CEILING_SECS: u64 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const PAGE_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BUDGET_FLOOR: i64 = 5;
const NAME_BATCH_LIMIT: usize = 1000;

/// A 401 from upstream. Never retried; the boundary surfaces it verbatim
/// so the caller can re-run the SSO flow.
#[derive(Debug)]
pub struct AuthError {
    pub body: String,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unauthorized: {}", self.body)
    }
}

impl std::error::Error for AuthError {}

struct CachedBody {
    etag: String,
    body: String,
}

pub struct EsiClient {
    http: Client,
    base_url: String,
    semaphore: Semaphore,
    // ETag replay store, keyed by the exact request URL so a 304 can never
    // be answered with the body of a different resource.
    etags: Mutex<HashMap<String, CachedBody>>,
    // Set when the upstream error budget runs low; requests hold here.
    backoff_until: Mutex<Option<Instant>>,
}

impl EsiClient {
    pub fn new(base_url: &str, user_agent: &str, max_concurrent: usize) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            semaphore: Semaphore::new(max_concurrent.max(1)),
            etags: Mutex::new(HashMap::new()),
            backoff_until: Mutex::new(None),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Single GET returning the response body. 204 yields an empty string.
    pub async fn get(&self, url: &str) -> Result<String> {
        let (body, _) = self.fetch(url, None, REQUEST_TIMEOUT).await?;
        Ok(body)
    }

    /// GET with a bearer token.
    pub async fn get_auth(&self, url: &str, token: &str) -> Result<String> {
        let (body, _) = self.fetch(url, Some(token), REQUEST_TIMEOUT).await?;
        Ok(body)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get(url).await?;
        serde_json::from_str(&body).with_context(|| format!("failed to parse response from {}", url))
    }

    pub async fn get_auth_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let body = self.get_auth(url, token).await?;
        serde_json::from_str(&body).with_context(|| format!("failed to parse response from {}", url))
    }

    /// POST a JSON body, for the batch name-resolution endpoint.
    pub async fn post(&self, url: &str, body: &Value) -> Result<String> {
        let _permit = self.semaphore.acquire().await.context("semaphore closed")?;
        self.hold_for_error_budget().await;

        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .post(url)
                .timeout(REQUEST_TIMEOUT)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    self.observe_error_budget(resp.headers());
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(anyhow!(AuthError { body }));
                    }
                    if status.is_success() {
                        return Ok(resp.text().await.unwrap_or_default());
                    }
                    if !Self::is_transient(status) {
                        let text = resp.text().await.unwrap_or_default();
                        bail!("POST {} failed with {}: {}", url, status, text);
                    }
                    let retry_after = Self::retry_after(&resp);
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        bail!("POST {} failed with {} after {} retries", url, status, MAX_RETRIES);
                    }
                    sleep(retry_after.unwrap_or_else(|| Self::backoff_delay(attempt))).await;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(anyhow!(e).context(format!("POST {} failed", url)));
                    }
                    sleep(Self::backoff_delay(attempt)).await;
                }
            }
        }
    }

    /// Fetch every page of a paginated resource. Page 1 is probed first
    /// (longer timeout) to learn the page count from `X-Pages`; the tail
    /// pages are then fetched in parallel under the shared semaphore.
    /// A failed tail page is logged and omitted rather than failing the
    /// whole fetch.
    pub async fn get_paginated(&self, url: &str) -> Result<Vec<String>> {
        self.get_paginated_with(url, None).await
    }

    /// Paginated fetch with a bearer token.
    pub async fn get_paginated_auth(&self, url: &str, token: &str) -> Result<Vec<String>> {
        self.get_paginated_with(url, Some(token)).await
    }

    async fn get_paginated_with(&self, url: &str, token: Option<&str>) -> Result<Vec<String>> {
        let (first, pages) = self.fetch(url, token, PAGE_PROBE_TIMEOUT).await?;
        if first.is_empty() {
            return Ok(Vec::new());
        }
        let pages = pages.unwrap_or(1);
        let mut bodies = vec![first];
        if pages <= 1 {
            return Ok(bodies);
        }

        let tail = futures_util::future::join_all((2..=pages).map(|page| {
            let page_url = Self::with_page(url, page);
            async move {
                let result = self.fetch(&page_url, token, REQUEST_TIMEOUT).await;
                (page, result)
            }
        }))
        .await;

        for (page, result) in tail {
            match result {
                Ok((body, _)) if !body.is_empty() => bodies.push(body),
                Ok(_) => {}
                Err(e) => warn!(url, page, error = %e, "page fetch failed, omitting"),
            }
        }
        Ok(bodies)
    }

    /// Paginated fetch where every page is a JSON array of `T`. Pages that
    /// fail to parse are logged and skipped; a fully failed fetch still
    /// yields an empty list at the scanner level, not an error.
    pub async fn get_paginated_json<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let bodies = self.get_paginated(url).await?;
        self.parse_pages(url, bodies)
    }

    /// Authenticated variant of `get_paginated_json`.
    pub async fn get_paginated_json_auth<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<Vec<T>> {
        let bodies = self.get_paginated_auth(url, token).await?;
        self.parse_pages(url, bodies)
    }

    fn parse_pages<T: DeserializeOwned>(&self, url: &str, bodies: Vec<String>) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for body in bodies {
            match serde_json::from_str::<Vec<T>>(&body) {
                Ok(mut items) => out.append(&mut items),
                Err(e) => warn!(url, error = %e, "failed to parse page, omitting"),
            }
        }
        Ok(out)
    }

    /// Resolve ids to display names, batched at the upstream limit.
    pub async fn resolve_names(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        #[derive(serde::Deserialize)]
        struct NameRef {
            id: i64,
            name: String,
        }

        let url = self.url("universe/names/");
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(NAME_BATCH_LIMIT) {
            let body = Value::from(chunk.to_vec());
            let text = self
                .post(&url, &body)
                .await
                .context("name resolution batch failed")?;
            let names: Vec<NameRef> =
                serde_json::from_str(&text).context("failed to parse name resolution response")?;
            for n in names {
                out.insert(n.id, n.name);
            }
        }
        Ok(out)
    }

    /// One GET with retry, backoff, ETag revalidation, and error-budget
    /// tracking. Returns the body and the `X-Pages` count when present.
    async fn fetch(
        &self,
        url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<(String, Option<u32>)> {
        let _permit = self.semaphore.acquire().await.context("semaphore closed")?;
        self.hold_for_error_budget().await;

        let mut attempt = 0u32;
        loop {
            let mut req = self.http.get(url).timeout(timeout);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            let etag = self.etags.lock().get(url).map(|c| c.etag.clone());
            if let Some(etag) = &etag {
                req = req.header(header::IF_NONE_MATCH, etag.clone());
            }

            match req.send().await {
                Ok(resp) => {
                    self.observe_error_budget(resp.headers());
                    let status = resp.status();

                    if status == StatusCode::UNAUTHORIZED {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(anyhow!(AuthError { body }));
                    }
                    if status == StatusCode::NO_CONTENT {
                        return Ok((String::new(), None));
                    }
                    if status == StatusCode::NOT_MODIFIED {
                        // Replay only our own stored body for this URL.
                        if let Some(cached) = self.etags.lock().get(url) {
                            debug!(url, "etag revalidated");
                            return Ok((cached.body.clone(), Self::pages(resp.headers())));
                        }
                        bail!("304 for {} without a cached body", url);
                    }
                    if status.is_success() {
                        let pages = Self::pages(resp.headers());
                        let new_etag = resp
                            .headers()
                            .get(header::ETAG)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body = resp.text().await.context("failed to read response body")?;
                        if let Some(etag) = new_etag {
                            self.etags.lock().insert(
                                url.to_string(),
                                CachedBody {
                                    etag,
                                    body: body.clone(),
                                },
                            );
                        }
                        return Ok((body, pages));
                    }

                    if !Self::is_transient(status) {
                        let text = resp.text().await.unwrap_or_default();
                        bail!("GET {} failed with {}: {}", url, status, text);
                    }

                    let retry_after = Self::retry_after(&resp);
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        bail!("GET {} failed with {} after {} retries", url, status, MAX_RETRIES);
                    }
                    let delay = retry_after.unwrap_or_else(|| Self::backoff_delay(attempt));
                    debug!(url, %status, attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay).await;
                }
                Err(e) => {
                    // Connection errors and timeouts are transient.
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(anyhow!(e).context(format!("GET {} failed", url)));
                    }
                    sleep(Self::backoff_delay(attempt)).await;
                }
            }
        }
    }

    fn is_transient(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Exponential backoff 250ms, 500ms, 1s with ±20% jitter.
    fn backoff_delay(attempt: u32) -> Duration {
        let base = INITIAL_BACKOFF_MS << (attempt.saturating_sub(1)).min(2);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_millis((base as f64 * jitter) as u64)
    }

    fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
        let secs = resp
            .headers()
            .get(header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .parse::<u64>()
            .ok()?;
        Some(Duration::from_secs(secs.min(RETRY_AFTER_CEILING_SECS)))
    }

    fn pages(headers: &header::HeaderMap) -> Option<u32> {
        headers
            .get("x-pages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Adaptive throttle: when the advertised error budget runs low, pause
    /// new requests until the budget window resets.
    fn observe_error_budget(&self, headers: &header::HeaderMap) {
        let remain = headers
            .get("x-esi-error-limit-remain")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let reset = headers
            .get("x-esi-error-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let (Some(remain), Some(reset)) = (remain, reset) {
            if remain < ERROR_BUDGET_FLOOR {
                warn!(remain, reset, "error budget low, throttling");
                *self.backoff_until.lock() = Some(Instant::now() + Duration::from_secs(reset));
            }
        }
    }

    async fn hold_for_error_budget(&self) {
        let until = *self.backoff_until.lock();
        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                sleep(until - now).await;
            }
            *self.backoff_until.lock() = None;
        }
    }

    fn with_page(url: &str, page: u32) -> String {
        if url.contains('?') {
            format!("{}&page={}", url, page)
        } else {
            format!("{}?page={}", url, page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_building() {
        assert_eq!(
            EsiClient::with_page("https://x/orders/", 2),
            "https://x/orders/?page=2"
        );
        assert_eq!(
            EsiClient::with_page("https://x/orders/?order_type=sell", 3),
            "https://x/orders/?order_type=sell&page=3"
        );
    }

    #[test]
    fn test_backoff_schedule() {
        // ±20% jitter around 250ms, 500ms, 1s; later attempts stay capped.
        for (attempt, base) in [(1u32, 250u64), (2, 500), (3, 1000), (4, 1000)] {
            let d = EsiClient::backoff_delay(attempt).as_millis() as u64;
            assert!(
                d >= base * 8 / 10 && d <= base * 12 / 10,
                "attempt {} gave {}ms, expected around {}ms",
                attempt,
                d,
                base
            );
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(EsiClient::is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(EsiClient::is_transient(StatusCode::BAD_GATEWAY));
        assert!(EsiClient::is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!EsiClient::is_transient(StatusCode::BAD_REQUEST));
        assert!(!EsiClient::is_transient(StatusCode::UNAUTHORIZED));
        assert!(!EsiClient::is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_url_join() {
        let client = EsiClient::new("https://esi.example/latest/", "test", 1).unwrap();
        assert_eq!(
            client.url("/markets/10000002/orders/"),
            "https://esi.example/latest/markets/10000002/orders/"
        );
    }
}
