//! HTTP transport for the STACKIT compute API
//!
//! Authenticates with the service-account key flow: a self-signed RS256 JWT
//! is exchanged at the token endpoint for a short-lived access token, which
//! is cached until shortly before expiry. Compute calls are plain JSON over
//! `https://iaas.api.<region>.stackit.cloud`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{ComputeClient, ComputeError, CreateServerPayload, Nic, Server};
use crate::config::DriverConfig;
use crate::credentials::{Credentials, ServiceAccountKey};
use crate::error::Error;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME: Duration = Duration::from_secs(600);

// Refresh this long before the cached token actually expires.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    aud: String,
    iat: u64,
    exp: u64,
    jti: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    items: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct NicList {
    #[serde(default)]
    items: Vec<Nic>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: SystemTime,
}

impl CachedToken {
    fn is_usable(&self, now: SystemTime) -> bool {
        match self.expires_at.duration_since(now) {
            Ok(remaining) => remaining > TOKEN_EXPIRY_SKEW,
            Err(_) => false,
        }
    }
}

/// Compute client speaking HTTP/JSON to the STACKIT IaaS API.
pub struct HttpComputeClient {
    http: reqwest::Client,
    config: DriverConfig,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for HttpComputeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpComputeClient")
            .field("config", &self.config)
            .field("key_id", &self.key.id)
            .finish_non_exhaustive()
    }
}

impl HttpComputeClient {
    /// Build a client bound to one credential bundle.
    ///
    /// Unusable key material (the RSA PEM does not parse) fails with
    /// [`Error::Unauthenticated`]; a transport construction failure fails
    /// with [`Error::Internal`]. Both are sticky once this client is bound
    /// into a driver.
    pub fn new(credentials: &Credentials, config: DriverConfig) -> Result<Self, Error> {
        let key = credentials.service_account_key.clone();
        let encoding_key = EncodingKey::from_rsa_pem(key.credentials.private_key.as_bytes())
            .map_err(|e| {
                Error::unauthenticated(format!(
                    "service account key {} has unusable private key material: {}",
                    key.id, e
                ))
            })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            key,
            encoding_key,
            token: Mutex::new(None),
        })
    }

    fn servers_url(&self, project_id: &str, region: &str) -> String {
        format!(
            "{}/v1/projects/{}/regions/{}/servers",
            self.config.iaas_base_url(region),
            project_id,
            region
        )
    }

    fn nic_url(&self, project_id: &str, region: &str, network_id: &str, nic_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/regions/{}/networks/{}/nics/{}",
            self.config.iaas_base_url(region),
            project_id,
            region,
            network_id,
            nic_id
        )
    }

    fn build_assertion(&self, now: SystemTime) -> Result<String, ComputeError> {
        let iat = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ComputeError::Transport(format!("system clock error: {}", e)))?
            .as_secs();

        let claims = Claims {
            iss: self.key.credentials.iss.clone(),
            sub: self.key.credentials.sub.clone(),
            aud: self.key.credentials.aud.clone(),
            iat,
            exp: iat + TOKEN_LIFETIME.as_secs(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key.credentials.kid.clone());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ComputeError::Transport(format!("failed to sign token assertion: {}", e)))
    }

    async fn bearer_token(&self) -> Result<String, ComputeError> {
        let mut cached = self.token.lock().await;
        let now = SystemTime::now();
        if let Some(token) = cached.as_ref() {
            if token.is_usable(now) {
                return Ok(token.access_token.clone());
            }
        }

        let assertion = self.build_assertion(now)?;
        let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ComputeError::Transport(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ComputeError::Api {
                status: status.as_u16(),
                message: format!("token exchange failed: {}", message),
            });
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| ComputeError::Transport(format!("malformed token response: {}", e)))?;

        debug!(expires_in = token.expires_in, "Refreshed access token");
        let entry = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + Duration::from_secs(token.expires_in),
        };
        *cached = Some(entry);
        Ok(token.access_token)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, ComputeError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ComputeError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ComputeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    fn transport(what: &str, err: reqwest::Error) -> ComputeError {
        ComputeError::Transport(format!("{}: {}", what, err))
    }
}

#[async_trait]
impl ComputeClient for HttpComputeClient {
    async fn create_server(
        &self,
        project_id: &str,
        region: &str,
        payload: &CreateServerPayload,
    ) -> Result<Server, ComputeError> {
        let token = self.bearer_token().await?;
        let url = self.servers_url(project_id, region);
        debug!(server = %payload.name, %url, "Creating server");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| Self::transport("create server", e))?;

        Self::check(response, &format!("server {}", payload.name))
            .await?
            .json()
            .await
            .map_err(|e| Self::transport("decode create response", e))
    }

    async fn get_server(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<Server, ComputeError> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}", self.servers_url(project_id, region), server_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::transport("get server", e))?;

        Self::check(response, &format!("server {}", server_id))
            .await?
            .json()
            .await
            .map_err(|e| Self::transport("decode server", e))
    }

    async fn delete_server(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<(), ComputeError> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}", self.servers_url(project_id, region), server_id);
        debug!(server = %server_id, "Deleting server");

        let response = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::transport("delete server", e))?;

        Self::check(response, &format!("server {}", server_id)).await?;
        Ok(())
    }

    async fn list_servers(
        &self,
        project_id: &str,
        region: &str,
        label_selector: &str,
    ) -> Result<Vec<Server>, ComputeError> {
        let token = self.bearer_token().await?;
        let url = self.servers_url(project_id, region);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("label_selector", label_selector)])
            .send()
            .await
            .map_err(|e| Self::transport("list servers", e))?;

        let list: ServerList = Self::check(response, "server list")
            .await?
            .json()
            .await
            .map_err(|e| Self::transport("decode server list", e))?;
        Ok(list.items)
    }

    async fn get_server_nics(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<Vec<Nic>, ComputeError> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}/nics", self.servers_url(project_id, region), server_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Self::transport("list server nics", e))?;

        let list: NicList = Self::check(response, &format!("nics of server {}", server_id))
            .await?
            .json()
            .await
            .map_err(|e| Self::transport("decode nic list", e))?;
        Ok(list.items)
    }

    async fn update_nic_allowed_addresses(
        &self,
        project_id: &str,
        region: &str,
        network_id: &str,
        nic_id: &str,
        addresses: &[String],
    ) -> Result<Nic, ComputeError> {
        let token = self.bearer_token().await?;
        let url = self.nic_url(project_id, region, network_id, nic_id);
        debug!(nic = %nic_id, count = addresses.len(), "Updating allowed addresses");

        let body = serde_json::json!({ "allowedAddresses": addresses });
        let response = self
            .http
            .patch(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport("update nic", e))?;

        Self::check(response, &format!("nic {}", nic_id))
            .await?
            .json()
            .await
            .map_err(|e| Self::transport("decode nic", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::test_fixtures::sample_credentials;

    #[test]
    fn construction_rejects_placeholder_pem_as_unauthenticated() {
        // The fixture key carries a placeholder PEM that is not a real RSA key.
        let err = HttpComputeClient::new(&sample_credentials(), DriverConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
        assert!(err.to_string().contains("key-1"));
    }

    #[test]
    fn cached_token_expiry_honors_skew() {
        let now = SystemTime::now();
        let fresh = CachedToken {
            access_token: "t".into(),
            expires_at: now + Duration::from_secs(300),
        };
        assert!(fresh.is_usable(now));

        let nearly_expired = CachedToken {
            access_token: "t".into(),
            expires_at: now + Duration::from_secs(10),
        };
        assert!(!nearly_expired.is_usable(now));

        let expired = CachedToken {
            access_token: "t".into(),
            expires_at: now - Duration::from_secs(1),
        };
        assert!(!expired.is_usable(now));
    }

    #[test]
    fn server_list_decodes_with_missing_items() {
        let list: ServerList = serde_json::from_str("{}").unwrap();
        assert!(list.items.is_empty());
    }

    #[test]
    fn urls_are_scoped_by_project_and_region() {
        // Build the URL parts without a client; construction needs a real key.
        let config = DriverConfig::default();
        let base = config.iaas_base_url("eu01");
        assert_eq!(base, "https://iaas.api.eu01.stackit.cloud");

        let config = DriverConfig {
            iaas_endpoint: Some("http://localhost:9000".into()),
            ..Default::default()
        };
        assert_eq!(config.iaas_base_url("eu01"), "http://localhost:9000");
    }
}
