//! Registry HTTP protocol client.
//!
//! A registry serves package archives at
//! `GET {registry}/packages/{name}/{version}/download` (200 + ZIP body, 404
//! when missing) and answers existence probes with `HEAD` on the same URL.
//!
//! The client is injected behind [`DependencyHttpClient`] so tests can
//! substitute an in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("package not found: {name}@{version} at {registry}")]
    NotFound {
        registry: String,
        name: String,
        version: String,
    },
    #[error("registry returned HTTP {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Build the download URL for a package version.
pub fn download_url(registry: &str, name: &str, version: &str) -> String {
    format!(
        "{}/packages/{}/{}/download",
        registry.trim_end_matches('/'),
        name,
        version
    )
}

/// The HTTP surface the fetchers depend on.
#[async_trait]
pub trait DependencyHttpClient: Send + Sync {
    /// Download the ZIP archive for `name@version`.
    async fn download_package(
        &self,
        registry: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, RegistryError>;

    /// Probe whether `name@version` exists.
    ///
    /// `Ok(true)` for 200, `Ok(false)` for 404; any other status is a
    /// transient error.
    async fn package_exists(
        &self,
        registry: &str,
        name: &str,
        version: &str,
    ) -> Result<bool, RegistryError>;
}

/// reqwest-backed registry client.
pub struct HttpRegistryClient {
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DependencyHttpClient for HttpRegistryClient {
    async fn download_package(
        &self,
        registry: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = download_url(registry, name, version);
        tracing::debug!("downloading {}", url);

        let resp = self.client.get(&url).send().await?;
        match resp.status().as_u16() {
            200 => Ok(resp.bytes().await?.to_vec()),
            404 => Err(RegistryError::NotFound {
                registry: registry.to_string(),
                name: name.to_string(),
                version: version.to_string(),
            }),
            status => Err(RegistryError::UnexpectedStatus { url, status }),
        }
    }

    async fn package_exists(
        &self,
        registry: &str,
        name: &str,
        version: &str,
    ) -> Result<bool, RegistryError> {
        let url = download_url(registry, name, version);
        let resp = self.client.head(&url).send().await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(RegistryError::UnexpectedStatus { url, status }),
        }
    }
}

/// In-memory registry for tests.
///
/// Keyed by `(name, version)`; the stored bytes are returned verbatim from
/// `download_package`.
#[derive(Default)]
pub struct MemoryRegistry {
    packages: HashMap<(String, String), Vec<u8>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, name: &str, version: &str, archive: Vec<u8>) {
        self.packages
            .insert((name.to_string(), version.to_string()), archive);
    }
}

#[async_trait]
impl DependencyHttpClient for MemoryRegistry {
    async fn download_package(
        &self,
        registry: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        self.packages
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                registry: registry.to_string(),
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn package_exists(
        &self,
        _registry: &str,
        name: &str,
        version: &str,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .packages
            .contains_key(&(name.to_string(), version.to_string())))
    }
}
