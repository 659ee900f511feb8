// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fetching artifacts from plain HTTP origins.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use http::header::CACHE_CONTROL;
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;

use crate::store::ByteStream;

/// An outbound fetch, with caching hints for anything between us and the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub url: String,
    pub headers: HeaderMap,
    /// Seconds a cached copy stays fresh.
    pub cache_ttl: u64,
    /// Cache responses of every status class, not just successes.
    ///
    /// Advisory: it is meant for a caching edge in front of the origin.
    /// [`ReqwestOrigin`] fetches directly, so it only logs the hint.
    pub cache_everything: bool,
}

pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("fetching {url}: {source}")]
pub struct OriginError {
    pub url: String,
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, OriginError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestOrigin {
    client: reqwest::Client, // cheaply cloneable (Arc<...> internally), see docs
}

impl ReqwestOrigin {
    pub fn new() -> Result<Self, reqwest::Error> {
        // Redirects are the client's business; 3xx responses are passed along.
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Origin for ReqwestOrigin {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, OriginError> {
        let OriginRequest {
            url,
            headers,
            cache_ttl,
            cache_everything,
        } = request;

        let headers = with_cache_ttl(headers, cache_ttl);
        debug!("origin: requesting {url} (ttl {cache_ttl}s, cache everything: {cache_everything})");

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| OriginError {
                url: url.clone(),
                source: Box::new(e),
            })?;

        debug!("origin: response from {url}: {}", response.status());

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(OriginResponse {
            status,
            headers,
            body: Some(body),
        })
    }
}

/// Adds the TTL hint to outbound `headers`.
fn with_cache_ttl(mut headers: HeaderMap, cache_ttl: u64) -> HeaderMap {
    if let Ok(value) = HeaderValue::try_from(format!("max-age={cache_ttl}")) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers
}
