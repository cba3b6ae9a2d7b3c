//! Compute client abstraction
//!
//! One trait covers every transport that can drive the STACKIT compute API:
//! the [`http::HttpComputeClient`] in production and a mock in tests. The
//! driver depends only on this trait and receives the implementation by
//! constructor injection, so no compute or auth state is ever global.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::spec::NetworkAttachment;

/// Client-layer error. The driver classifies these into the orchestrator
/// taxonomy exactly once, at its own boundary; this layer never retries.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The addressed resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The API answered with a non-success status other than 404.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The request never produced an API answer (connect, TLS, timeout,
    /// token exchange, body decode).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ComputeError {
    /// True when this error wraps the provider's not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Provider-side server resource, the subset of fields the driver consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Provider-assigned server ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider-defined lifecycle status string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Labels attached to the server.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Provider-side network interface resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Nic {
    /// NIC ID.
    pub id: String,
    /// Network the NIC belongs to.
    pub network_id: String,
    /// CIDR ranges allowed to originate traffic from this NIC.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_addresses: Vec<String>,
}

/// Request body for server creation.
///
/// `networking` is serialized unconditionally: the API requires the field to
/// be present even when both of its branches are empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerPayload {
    /// Server name.
    pub name: String,
    /// Machine type.
    pub machine_type: String,
    /// Image to boot from, alternative to `boot_volume`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Boot volume, alternative to `image_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_volume: Option<crate::spec::BootVolume>,
    /// Labels, including the driver's reserved ones.
    pub labels: HashMap<String, String>,
    /// Network attachment; always present, possibly empty.
    pub networking: NetworkAttachment,
    /// Security group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    /// Extra data volume IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// SSH keypair name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair_name: Option<String>,
    /// Placement zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Affinity group ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_group: Option<String>,
    /// Bootstrap payload, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// Service account mail attached to the server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_account_mails: Vec<String>,
    /// Whether the guest agent is provisioned.
    #[serde(default)]
    pub install_agent: bool,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Build an exact-match label selector expression, `key=value`.
pub fn label_selector(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Trait abstracting the STACKIT compute API.
///
/// Every operation is scoped by project and region; errors carry the
/// not-found sentinel through [`ComputeError::NotFound`]. Implementations
/// must not retry on their own.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Create a server.
    async fn create_server(
        &self,
        project_id: &str,
        region: &str,
        payload: &CreateServerPayload,
    ) -> Result<Server, ComputeError>;

    /// Fetch a server by ID.
    async fn get_server(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<Server, ComputeError>;

    /// Delete a server by ID.
    async fn delete_server(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<(), ComputeError>;

    /// List servers matching a label selector.
    async fn list_servers(
        &self,
        project_id: &str,
        region: &str,
        label_selector: &str,
    ) -> Result<Vec<Server>, ComputeError>;

    /// List the NICs attached to a server.
    async fn get_server_nics(
        &self,
        project_id: &str,
        region: &str,
        server_id: &str,
    ) -> Result<Vec<Nic>, ComputeError>;

    /// Replace the allowed-address list of a NIC.
    async fn update_nic_allowed_addresses(
        &self,
        project_id: &str,
        region: &str,
        network_id: &str,
        nic_id: &str,
        addresses: &[String],
    ) -> Result<Nic, ComputeError>;
}

impl std::fmt::Debug for dyn ComputeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ComputeClient")
    }
}
