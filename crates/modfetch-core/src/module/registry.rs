//! Registry client.
//!
//! One HTTP session is shared by every resolve and install in the process.
//! JSON documents are cached by URL for the session's lifetime, and concurrent
//! requests for the same URL collapse into a single network call.

use super::catalog::{RegistrationIndex, RegistrationPage, ServiceIndex};
use super::error::ModError;
use crate::version::USER_AGENT;
use bytes::Bytes;
use moka::future::Cache;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

/// Maximum number of cached registry documents.
const DOCUMENT_CACHE_CAPACITY: u64 = 4096;

static SHARED: Mutex<Option<RegistryClient>> = Mutex::new(None);

struct Session {
    http: Client,
    timeout: Duration,
    documents: Cache<String, Bytes>,
    requests: AtomicUsize,
}

/// Registry client. Cloning is cheap and shares the session.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<Session>,
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("timeout", &self.inner.timeout)
            .field("cached_documents", &self.inner.documents.entry_count())
            .field("requests", &self.network_requests())
            .finish()
    }
}

impl RegistryClient {
    /// Create a client with its own session.
    ///
    /// `timeout` bounds each document request and the connect phase of
    /// downloads. Download bodies are not time-limited.
    pub fn new(timeout: Duration) -> Result<Self, ModError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ModError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Session {
                http,
                timeout,
                documents: Cache::builder().max_capacity(DOCUMENT_CACHE_CAPACITY).build(),
                requests: AtomicUsize::new(0),
            }),
        })
    }

    /// The process-wide client, created on first use.
    ///
    /// Every later call must ask for the same `timeout`; a different one is an
    /// error until [`RegistryClient::reset_shared`] drops the session.
    pub fn shared(timeout: Duration) -> Result<Self, ModError> {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = shared.as_ref() {
            if client.timeout() != timeout {
                return Err(ModError::invariant(format!(
                    "Shared registry session already uses a {:?} timeout, not {timeout:?}",
                    client.timeout()
                )));
            }
            return Ok(client.clone());
        }
        let client = Self::new(timeout)?;
        *shared = Some(client.clone());
        Ok(client)
    }

    /// Drop the process-wide client. The next [`RegistryClient::shared`]
    /// call starts a fresh session with an empty cache.
    pub fn reset_shared() {
        SHARED.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Whether two handles share a session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Forget every cached document.
    pub fn clear_cache(&self) {
        self.inner.documents.invalidate_all();
    }

    /// Number of HTTP requests actually sent by this session.
    #[must_use]
    pub fn network_requests(&self) -> usize {
        self.inner.requests.load(Ordering::Relaxed)
    }

    /// Fetch and decode a JSON document, served from the cache when possible.
    pub async fn fetch_document<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<T, ModError> {
        let session = Arc::clone(&self.inner);
        let key = url.to_string();
        let load = self
            .inner
            .documents
            .try_get_with(key.clone(), async move { session.get_bytes(&key).await });

        let body = tokio::select! {
            biased;
            () = token.cancelled() => return Err(ModError::cancelled()),
            result = load => result.map_err(|e| (*e).clone())?,
        };

        serde_json::from_slice(&body)
            .map_err(|e| ModError::transport(format!("Invalid JSON from {url}: {e}")))
    }

    /// Locate the registrations base URL from a service index.
    pub async fn registration_base(
        &self,
        source: &str,
        token: &CancellationToken,
    ) -> Result<String, ModError> {
        Url::parse(source)
            .map_err(|e| ModError::transport(format!("Invalid registry URL '{source}': {e}")))?;

        let index: ServiceIndex = self.fetch_document(source, token).await?;
        let base = index.registrations_base().ok_or_else(|| {
            ModError::transport(format!(
                "Service index at {source} has no RegistrationsBaseUrl resource"
            ))
        })?;
        Ok(base.trim_end_matches('/').to_string())
    }

    /// Fetch the registration index for `name`.
    pub async fn fetch_registration(
        &self,
        source: &str,
        name: &str,
        token: &CancellationToken,
    ) -> Result<(String, RegistrationIndex), ModError> {
        let base = self.registration_base(source, token).await?;
        let url = registration_url(&base, name);
        let index = self.fetch_document(&url, token).await?;
        Ok((url, index))
    }

    /// Fetch the full contents of a non-inlined registration page.
    pub async fn fetch_page(
        &self,
        page: &RegistrationPage,
        token: &CancellationToken,
    ) -> Result<RegistrationPage, ModError> {
        trace!(page = %page.id, lower = %page.lower, upper = %page.upper, "Fetching registration page");
        self.fetch_document(&page.id, token).await
    }

    /// Start a package download. The caller streams the body.
    pub async fn download(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Response, ModError> {
        debug!(url, "Downloading package");
        self.inner.requests.fetch_add(1, Ordering::Relaxed);

        let send = self.inner.http.get(url).send();
        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(ModError::cancelled()),
            result = send => result.map_err(|e| ModError::from(e).context(format!("Failed to download '{url}'")))?,
        };
        check_status(url, response)
    }
}

impl Session {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, ModError> {
        debug!(url, "GET");
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let response = check_status(url, response)?;
        Ok(response.bytes().await?)
    }
}

fn check_status(url: &str, response: Response) -> Result<Response, ModError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ModError::not_found_url(url));
    }
    if !status.is_success() {
        return Err(ModError::transport(format!(
            "Registry returned status {status} for {url}"
        )));
    }
    Ok(response)
}

/// Registration index URL: `{base}/{lowercase name}/index.json`.
#[must_use]
pub fn registration_url(base: &str, name: &str) -> String {
    format!(
        "{}/{}/index.json",
        base.trim_end_matches('/'),
        name.to_ascii_lowercase()
    )
}
