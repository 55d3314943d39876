//! Icinga 2 API client side: status verification, event streams, and the
//! connection supervisor that ties them together.

mod event;
mod stream;
mod supervisor;
mod verifier;

pub use event::status_change_from_icinga;
pub use stream::{EventStreamReader, StreamConnector};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, StreamLossNotifier, SupervisorHandle, SupervisorInput,
    transition,
};
pub use verifier::{HealthProbe, StatusVerifier, check_status_body};

use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use tracing::{error, info};

use crate::config::IcingaConfig;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated handle on the Icinga 2 API.
///
/// Cheap to clone; all clones share one connection pool. The underlying
/// client has no overall request timeout because the event stream never
/// completes. Bounded requests set their own timeout.
#[derive(Clone)]
pub struct IcingaClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl IcingaClient {
    /// Build a client for `base_url` (`https://host:port`).
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        ca_certificate: Option<&[u8]>,
        use_system_proxy: bool,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(Self::default_headers());

        if !use_system_proxy {
            builder = builder.no_proxy();
        }

        if let Some(pem) = ca_certificate {
            let certificate = reqwest::Certificate::from_pem(pem)
                .map_err(|e| Error::config(format!("Invalid Icinga CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Build a client from the `[icinga]` section.
    ///
    /// An unreadable certificate file is logged and the client falls back to
    /// the default trust roots, so the failure shows up as a TLS error on the
    /// status probe rather than preventing startup.
    pub fn from_config(config: &IcingaConfig) -> Result<Self> {
        let certificate = config
            .certificate_path
            .as_deref()
            .and_then(Self::load_certificate);

        Self::new(
            config.base_url(),
            &config.username,
            &config.password,
            certificate.as_deref(),
            config.use_system_proxy,
        )
    }

    fn load_certificate(path: &Path) -> Option<Vec<u8>> {
        match std::fs::read(path) {
            Ok(pem) => {
                info!(path = %path.display(), "Loaded Icinga CA certificate");
                Some(pem)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load Icinga CA certificate");
                None
            }
        }
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }
}

impl std::fmt::Debug for IcingaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcingaClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
