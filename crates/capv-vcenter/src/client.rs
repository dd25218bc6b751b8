//! REST calls against a single vCenter with an established session

use async_trait::async_trait;
use capv_common::crd::VCenterVersion;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{ComputeCluster, Credentials, ModuleProvider, VCenterError};

/// Header carrying the session token
pub const SESSION_HEADER: &str = "vmware-api-session-id";

#[derive(Debug, Deserialize)]
struct VersionInfo {
    version: String,
}

/// Entry of `GET /api/vcenter/cluster`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClusterSummary {
    /// Managed object id, e.g. `domain-c8`
    pub cluster: String,
    /// Inventory name
    pub name: String,
}

/// Entry of `GET /api/vcenter/resource-pool`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ResourcePoolSummary {
    /// Managed object id, e.g. `resgroup-9`
    pub resource_pool: String,
    /// Inventory name
    pub name: String,
}

/// Entry of `GET /api/vcenter/cluster/modules`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ModuleSummary {
    /// Compute cluster the module belongs to
    pub cluster: String,
    /// Module identifier
    pub module: String,
}

#[derive(Debug, Deserialize)]
struct ModuleList {
    #[serde(default)]
    summaries: Vec<ModuleSummary>,
}

#[derive(Debug, Serialize)]
struct CreateModuleSpec<'a> {
    cluster: &'a str,
}

/// Resource pool path split into the parts used for lookup
///
/// `/DC0/host/C0/Resources/pool` names pool `pool` inside cluster `C0`.
#[derive(Debug, Default, PartialEq)]
struct PoolPath {
    name: Option<String>,
    cluster: Option<String>,
}

impl PoolPath {
    fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(name) = segments.last() else {
            return Self::default();
        };
        let cluster = segments
            .iter()
            .position(|s| *s == "host")
            .filter(|i| i + 1 < segments.len() - 1)
            .map(|i| segments[i + 1].to_string());
        Self {
            name: Some(name.to_string()),
            cluster,
        }
    }
}

/// Client for one vCenter, bound to a session token
#[derive(Clone)]
pub struct VCenterClient {
    http: reqwest::Client,
    base_url: String,
    server: String,
    token: String,
}

impl std::fmt::Debug for VCenterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VCenterClient")
            .field("server", &self.server)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// `https://` is assumed when the server has no scheme
pub fn base_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}

impl VCenterClient {
    /// Create a session with basic auth
    #[instrument(skip_all, fields(server = %server))]
    pub async fn login(
        http: reqwest::Client,
        server: &str,
        credentials: &Credentials,
    ) -> Result<Self, VCenterError> {
        let base_url = base_url(server);
        let response = http
            .post(format!("{}/api/session", base_url))
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|source| VCenterError::Http {
                server: server.to_string(),
                source,
            })?;

        let response = check(server, "create session", response).await?;
        let token: String = decode(server, "create session", response).await?;
        debug!("vCenter session established");

        Ok(Self {
            http,
            base_url,
            server: server.to_string(),
            token,
        })
    }

    /// Server this client talks to
    pub fn server(&self) -> &str {
        &self.server
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(SESSION_HEADER, &self.token)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, VCenterError> {
        let response = request.send().await.map_err(|source| VCenterError::Http {
            server: self.server.clone(),
            source,
        })?;
        check(&self.server, operation, response).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, VCenterError> {
        let response = self.send(operation, request).await?;
        decode(&self.server, operation, response).await
    }

    /// Whether the session token is still accepted
    pub async fn is_active(&self) -> Result<bool, VCenterError> {
        match self
            .send("get session", self.request(Method::GET, "/api/session"))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_unauthenticated() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the session on the server side
    pub async fn logout(&self) -> Result<(), VCenterError> {
        self.send("delete session", self.request(Method::DELETE, "/api/session"))
            .await
            .map(|_| ())
    }

    /// List compute clusters
    pub async fn list_clusters(&self) -> Result<Vec<ClusterSummary>, VCenterError> {
        self.get_json("list clusters", self.request(Method::GET, "/api/vcenter/cluster"))
            .await
    }

    /// List resource pools filtered by name and owning cluster
    pub async fn list_resource_pools(
        &self,
        name: Option<&str>,
        cluster: Option<&str>,
    ) -> Result<Vec<ResourcePoolSummary>, VCenterError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(name) = name {
            query.push(("names", name));
        }
        if let Some(cluster) = cluster {
            query.push(("clusters", cluster));
        }
        self.get_json(
            "list resource pools",
            self.request(Method::GET, "/api/vcenter/resource-pool")
                .query(&query),
        )
        .await
    }

    /// List all cluster modules
    pub async fn list_modules(&self) -> Result<Vec<ModuleSummary>, VCenterError> {
        let list: ModuleList = self
            .get_json(
                "list cluster modules",
                self.request(Method::GET, "/api/vcenter/cluster/modules"),
            )
            .await?;
        Ok(list.summaries)
    }
}

#[async_trait]
impl ModuleProvider for VCenterClient {
    async fn version(&self) -> Result<VCenterVersion, VCenterError> {
        let info: VersionInfo = self
            .get_json(
                "get version",
                self.request(Method::GET, "/api/appliance/system/version"),
            )
            .await?;
        Ok(VCenterVersion::new(info.version))
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn compute_cluster(&self, resource_pool: &str) -> Result<ComputeCluster, VCenterError> {
        let path = PoolPath::parse(resource_pool);
        let clusters = self.list_clusters().await?;

        let Some(name) = path.name.as_deref() else {
            // No pool configured: only unambiguous with a single compute cluster
            return match clusters.as_slice() {
                [only] => Ok(ComputeCluster::Cluster(only.cluster.clone())),
                _ => Err(VCenterError::NotFound {
                    server: self.server.clone(),
                    what: "default resource pool".to_string(),
                }),
            };
        };

        let candidates = clusters
            .iter()
            .filter(|c| path.cluster.as_deref().map_or(true, |n| n == c.name));
        for cluster in candidates {
            let pools = self
                .list_resource_pools(Some(name), Some(&cluster.cluster))
                .await?;
            if !pools.is_empty() {
                debug!(cluster = %cluster.cluster, resource_pool = %name, "Resolved compute cluster");
                return Ok(ComputeCluster::Cluster(cluster.cluster.clone()));
            }
        }

        let not_found = || VCenterError::NotFound {
            server: self.server.clone(),
            what: format!("resource pool {}", resource_pool),
        };

        // A path through a compute cluster that does not own the pool is a lookup failure
        if path
            .cluster
            .as_deref()
            .is_some_and(|n| clusters.iter().any(|c| c.name == n))
        {
            return Err(not_found());
        }

        // Only a pool no compute cluster owns is unsupported (standalone host)
        let mut owned = Vec::new();
        for cluster in &clusters {
            owned.extend(
                self.list_resource_pools(Some(name), Some(&cluster.cluster))
                    .await?
                    .into_iter()
                    .map(|p| p.resource_pool),
            );
        }
        self.list_resource_pools(Some(name), None)
            .await?
            .into_iter()
            .find(|pool| !owned.contains(&pool.resource_pool))
            .map(|pool| ComputeCluster::Unsupported(pool.resource_pool))
            .ok_or_else(not_found)
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn create_module(&self, cluster: &str) -> Result<String, VCenterError> {
        let module: String = self
            .get_json(
                "create cluster module",
                self.request(Method::POST, "/api/vcenter/cluster/modules")
                    .json(&CreateModuleSpec { cluster }),
            )
            .await?;
        debug!(module = %module, "Created cluster module");
        Ok(module)
    }

    async fn module_exists(&self, module: &str, cluster: &str) -> Result<bool, VCenterError> {
        Ok(self
            .list_modules()
            .await?
            .iter()
            .any(|m| m.module == module && m.cluster == cluster))
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn delete_module(&self, module: &str) -> Result<(), VCenterError> {
        let path = format!("/api/vcenter/cluster/modules/{}", module);
        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|source| VCenterError::Http {
                server: self.server.clone(),
                source,
            })?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(module = %module, "Cluster module already gone");
            return Ok(());
        }
        check(&self.server, "delete cluster module", response).await?;
        Ok(())
    }
}

async fn check(server: &str, operation: &str, response: Response) -> Result<Response, VCenterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(VCenterError::status(server, operation, status, body))
}

async fn decode<T: DeserializeOwned>(
    server: &str,
    operation: &str,
    response: Response,
) -> Result<T, VCenterError> {
    response.json().await.map_err(|e| VCenterError::Decode {
        server: server.to_string(),
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_path_parsing() {
        assert_eq!(PoolPath::parse(""), PoolPath::default());
        assert_eq!(
            PoolPath::parse("Resources"),
            PoolPath {
                name: Some("Resources".into()),
                cluster: None
            }
        );
        assert_eq!(
            PoolPath::parse("/DC0/host/DC0_C0/Resources"),
            PoolPath {
                name: Some("Resources".into()),
                cluster: Some("DC0_C0".into())
            }
        );
        assert_eq!(
            PoolPath::parse("/DC0/host/DC0_C0/Resources/team-a"),
            PoolPath {
                name: Some("team-a".into()),
                cluster: Some("DC0_C0".into())
            }
        );
    }

    #[test]
    fn base_url_defaults_to_https() {
        assert_eq!(base_url("vc.example.com"), "https://vc.example.com");
        assert_eq!(base_url("http://127.0.0.1:8989/"), "http://127.0.0.1:8989");
    }
}
