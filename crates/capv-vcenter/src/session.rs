//! Session cache shared by every reconcile pass
//!
//! One logged-in client is kept per vCenter server. A cached session is
//! checked before reuse and replaced when vCenter no longer accepts it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capv_common::retry::{retry_with_backoff, RetryConfig};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{Connector, Credentials, ModuleProvider, VCenterClient, VCenterError};

/// Timeout for a single vCenter request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for the shared HTTP client
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Accept any certificate presented by vCenter
    pub insecure_skip_tls_verify: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Login retry budget
    pub login_retry: RetryConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            insecure_skip_tls_verify: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            login_retry: RetryConfig::default(),
        }
    }
}

/// Caches one authenticated [`VCenterClient`] per server
pub struct SessionManager {
    http: reqwest::Client,
    credentials: Credentials,
    login_retry: RetryConfig,
    sessions: DashMap<String, Arc<VCenterClient>>,
}

impl SessionManager {
    /// Build the shared HTTP client
    pub fn new(credentials: Credentials, options: SessionOptions) -> Result<Self, VCenterError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_tls_verify)
            .timeout(options.request_timeout)
            .build()
            .map_err(|source| VCenterError::Http {
                server: String::new(),
                source,
            })?;
        Ok(Self {
            http,
            credentials,
            login_retry: options.login_retry,
            sessions: DashMap::new(),
        })
    }

    /// Logged-in client for `server`, reusing a live cached session
    pub async fn session(&self, server: &str) -> Result<Arc<VCenterClient>, VCenterError> {
        let cached = self.sessions.get(server).map(|entry| entry.value().clone());
        if let Some(client) = cached {
            if client.is_active().await? {
                return Ok(client);
            }
            debug!(server, "Cached vCenter session expired");
            self.sessions.remove(server);
        }

        let client = retry_with_backoff(
            &self.login_retry,
            "vcenter_login",
            VCenterError::is_retryable,
            || VCenterClient::login(self.http.clone(), server, &self.credentials),
        )
        .await?;

        info!(server, "Logged in to vCenter");
        let client = Arc::new(client);
        self.sessions.insert(server.to_string(), client.clone());
        Ok(client)
    }

    /// Number of cached sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is cached
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Log out of every cached session
    pub async fn logout_all(&self) {
        let clients: Vec<Arc<VCenterClient>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        for client in clients {
            if let Err(e) = client.logout().await {
                debug!(server = client.server(), error = %e, "vCenter logout failed");
            }
        }
    }
}

#[async_trait]
impl Connector for SessionManager {
    async fn connect(&self, server: &str) -> Result<Arc<dyn ModuleProvider>, VCenterError> {
        let client: Arc<dyn ModuleProvider> = self.session(server).await?;
        Ok(client)
    }
}
