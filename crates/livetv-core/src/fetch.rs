use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, Proxy, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::ResolveError;
use crate::plugin::ByteStream;

/// Per-request knobs for [`HttpFetcher`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Upstream proxy (`http://`, `https://`, `socks5://`).
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub follow_redirects: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxy(mut self, proxy: Option<&str>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty()).map(str::to_string);
        self
    }

    pub fn with_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.headers.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn following(mut self) -> Self {
        self.follow_redirects = true;
        self
    }
}

/// Upstream response with the bits resolution cares about pulled out.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub location: Option<String>,
    /// Lowercased `Content-Type`, empty when absent.
    pub content_type: String,
    pub content_length: Option<u64>,
    inner: Response,
}

impl FetchResponse {
    fn from_response(response: Response) -> Self {
        let headers = response.headers();
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self {
            status: response.status(),
            final_url: response.url().to_string(),
            location,
            content_type,
            content_length: response.content_length(),
            inner: response,
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.location.is_some()
    }

    pub fn is_playlist(&self) -> bool {
        self.content_type.contains("mpegurl") || self.content_type.starts_with("text/")
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Reads the body, refusing anything larger than `max` bytes.
    ///
    /// A declared `Content-Length` above the limit is rejected before any of
    /// the body is read.
    pub async fn read_limited(self, max: u64) -> Result<String, ResolveError> {
        let url = self.final_url;
        if let Some(length) = self.content_length {
            if length > max {
                return Err(ResolveError::ContentTooLarge { url, length });
            }
        }

        let mut response = self.inner;
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResolveError::fetch(&url, &e))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > max {
                return Err(ResolveError::ContentTooLarge {
                    url,
                    length: body.len() as u64,
                });
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// The body as it arrives, already decompressed.
    pub fn into_stream(self) -> ByteStream {
        self.inner
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(io::Error::other))
            .boxed()
    }
}

/// Shared HTTP facility for all plugins.
///
/// Clients are built lazily per upstream proxy and redirect policy and share
/// one cookie jar, so cookies set early in a redirect chain are replayed on
/// later hops. Certificate verification is relaxed for upstream sources.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    clients: Arc<DashMap<(Option<String>, bool), Client>>,
    jar: Arc<Jar>,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            jar: Arc::new(Jar::default()),
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
        }
    }

    fn builder(&self, follow_redirects: bool) -> reqwest::ClientBuilder {
        let policy = if follow_redirects {
            redirect::Policy::limited(10)
        } else {
            redirect::Policy::none()
        };
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(20)
            .gzip(true)
            .user_agent(self.user_agent.clone())
            .cookie_provider(self.jar.clone())
            .danger_accept_invalid_certs(true)
            .redirect(policy)
    }

    pub fn client(&self, proxy: Option<&str>, follow_redirects: bool) -> Result<Client, ResolveError> {
        let key = (proxy.map(str::to_string), follow_redirects);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let client = match proxy {
            None => self
                .builder(follow_redirects)
                .build()
                .expect("Failed to build HTTP client"),
            Some(proxy_url) => {
                let proxy = Proxy::all(proxy_url)
                    .map_err(|e| ResolveError::invalid_url(proxy_url, e))?;
                self.builder(follow_redirects)
                    .proxy(proxy)
                    .build()
                    .map_err(|e| ResolveError::invalid_url(proxy_url, e))?
            }
        };
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse, ResolveError> {
        let client = self.client(options.proxy.as_deref(), options.follow_redirects)?;
        let request = client.get(url).headers(header_map(&options.headers));
        debug!(url, proxy = ?options.proxy, follow = options.follow_redirects, "Fetching upstream");
        match request.send().await {
            Ok(response) => Ok(FetchResponse::from_response(response)),
            Err(e) => {
                warn!(url, error = %e, timeout = e.is_timeout(), "Upstream fetch failed");
                Err(ResolveError::fetch(url, &e))
            }
        }
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        options: &RequestOptions,
    ) -> Result<FetchResponse, ResolveError> {
        let client = self.client(options.proxy.as_deref(), options.follow_redirects)?;
        let response = client
            .post(url)
            .headers(header_map(&options.headers))
            .json(body)
            .send()
            .await
            .map_err(|e| ResolveError::fetch(url, &e))?;
        Ok(FetchResponse::from_response(response))
    }

    /// GET that follows redirects and reads a size-limited text body.
    pub async fn get_page(
        &self,
        url: &str,
        options: &RequestOptions,
        max: u64,
    ) -> Result<Page, ResolveError> {
        let response = self.get(url, &options.clone().following()).await?;
        let status = response.status;
        let final_url = response.final_url.clone();
        let content_type = response.content_type.clone();
        let body = response.read_limited(max).await?;
        Ok(Page {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

/// A fully read text response.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: String,
    pub body: String,
}

impl Page {
    pub fn is_playlist(&self) -> bool {
        self.content_type.contains("mpegurl") || self.content_type.starts_with("text/")
    }
}

/// Converts a header list, silently dropping names or values that are not
/// valid on the wire.
pub fn header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!(header = %name, "Skipping invalid header"),
        }
    }
    map
}
