//! Kubernetes API client utilities.
//!
//! This module provides a lightweight client for the custom-resource endpoints
//! that back resource claims. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering credentials from `CLAIMCHAIN_API_TOKEN` or the in-cluster
//!   service-account token
//! - Validating the API base URL for safety
//! - Building namespaced claim paths for a given API group and version
//!
//! The primary entry point is [`KubeClient`]. Create an instance via
//! [`KubeClient::from_env`], and then build requests with
//! [`KubeClient::request`].
//!
//! # Example
//!
//! ```ignore
//! use claimchain_api::{ClaimApi, KubeClient};
//! use claimchain_types::ClaimKind;
//!
//! async fn read_vcluster() -> anyhow::Result<()> {
//!     let client = KubeClient::from_env(None)?;
//!     let api = ClaimApi::new("platform.claimchain.io", "v1alpha1");
//!     let path = api.object_path(ClaimKind::VCluster, "default", "order-api-vcluster");
//!     let res = client.request(reqwest::Method::GET, &path).send().await?;
//!     println!("status: {}", res.status());
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result, anyhow};
use claimchain_types::ClaimKind;
use reqwest::{Certificate, Client, RequestBuilder, Url, header};
use tracing::{debug, warn};

/// Environment variable overriding the API server base URL.
pub const API_BASE_ENV: &str = "CLAIMCHAIN_API_BASE";
/// Environment variable carrying a bearer token.
pub const API_TOKEN_ENV: &str = "CLAIMCHAIN_API_TOKEN";
/// API server address when running inside a cluster.
pub const IN_CLUSTER_BASE_URL: &str = "https://kubernetes.default.svc";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for API server access.
///
/// The client pre-configures default headers and builds requests against a
/// validated base URL.
pub struct KubeClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl KubeClient {
    /// Construct a [`KubeClient`] from the environment.
    ///
    /// Resolution order for the base URL:
    /// - `CLAIMCHAIN_API_BASE` environment variable
    /// - `configured_base`, usually from the config file
    /// - the in-cluster API server address
    ///
    /// Resolution order for authentication:
    /// - `CLAIMCHAIN_API_TOKEN` environment variable
    /// - the mounted service-account token
    pub fn from_env(configured_base: Option<&str>) -> Result<Self> {
        let base_url = env::var(API_BASE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| configured_base.map(str::to_string))
            .unwrap_or_else(|| IN_CLUSTER_BASE_URL.to_string());
        let api_token = env::var(API_TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| read_token_file(&Path::new(SERVICE_ACCOUNT_DIR).join("token")));
        let ca_bundle = fs::read(Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt")).ok();

        Self::new(base_url, api_token, ca_bundle.as_deref())
    }

    /// Construct a client for an explicit base URL and optional bearer token.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>, ca_bundle_pem: Option<&[u8]>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Some(api_token) = api_token {
            let authorization_header_value = format!("Bearer {}", api_token.trim());
            let mut value =
                header::HeaderValue::from_str(&authorization_header_value).context("API token is not a valid header value")?;
            value.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, value);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let mut builder = Client::builder().default_headers(default_headers).timeout(Duration::from_secs(30));
        if let Some(pem) = ca_bundle_pem {
            match Certificate::from_pem(pem) {
                Ok(certificate) => builder = builder.add_root_certificate(certificate),
                Err(error) => warn!(%error, "ignoring unreadable cluster CA bundle"),
            }
        }
        let http = builder.build().context("build http client")?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("claimchain/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    ///
    /// The resulting request includes the configured User-Agent and base
    /// headers, and is resolved relative to `self.base_url`.
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }
}

/// REST layout of the claim custom resources for one API group and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimApi {
    pub group: String,
    pub version: String,
}

impl ClaimApi {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// `apiVersion` field written into claim bodies.
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    /// Path of the namespaced collection for `kind`.
    pub fn collection_path(&self, kind: ClaimKind, namespace: &str) -> String {
        format!("/apis/{}/{}/namespaces/{}/{}", self.group, self.version, namespace, kind.plural())
    }

    /// Path of a single claim object.
    pub fn object_path(&self, kind: ClaimKind, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(kind, namespace), name)
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<()> {
    let parsed_base_url = Url::parse(base).map_err(|e| anyhow!("Invalid {} URL '{}': {}", API_BASE_ENV, base, e))?;

    let host_name = parsed_base_url
        .host_str()
        .ok_or_else(|| anyhow!("{} must include a host", API_BASE_ENV))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(anyhow!(
            "{} must use https for non-localhost hosts; got '{}://'",
            API_BASE_ENV,
            parsed_base_url.scheme()
        ));
    }

    Ok(())
}

/// Reads a token file, ignoring missing or blank files.
fn read_token_file(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let token = content.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_may_use_plain_http() {
        assert!(validate_base_url("http://127.0.0.1:8001").is_ok());
        assert!(validate_base_url("http://localhost:6443").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        assert!(validate_base_url("https://api.cluster.example.com:6443").is_ok());
        let error = validate_base_url("http://api.cluster.example.com").unwrap_err();
        assert!(error.to_string().contains("must use https"));
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn builds_namespaced_claim_paths() {
        let api = ClaimApi::new("platform.claimchain.io", "v1alpha1");
        assert_eq!(api.api_version(), "platform.claimchain.io/v1alpha1");
        assert_eq!(
            api.object_path(ClaimKind::AppContainer, "team-a", "order-api"),
            "/apis/platform.claimchain.io/v1alpha1/namespaces/team-a/appcontainerclaims/order-api"
        );
    }

    #[test]
    fn env_base_overrides_configured_base() {
        temp_env::with_vars(
            [(API_BASE_ENV, Some("http://localhost:8001/")), (API_TOKEN_ENV, Some("abc"))],
            || {
                let client = KubeClient::from_env(Some("https://ignored.example.com")).unwrap();
                assert_eq!(client.base_url, "http://localhost:8001");
            },
        );
    }

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        fs::write(&path, "  sa-token\n").unwrap();
        assert_eq!(read_token_file(&path).as_deref(), Some("sa-token"));

        fs::write(&path, "\n").unwrap();
        assert_eq!(read_token_file(&path), None);
        assert_eq!(read_token_file(&dir.path().join("missing")), None);
    }
}
