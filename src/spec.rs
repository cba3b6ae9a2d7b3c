//! Provider spec decoding and spec/secret precedence merge
//!
//! The orchestrator hands the driver an opaque JSON document describing the
//! desired machine. Two fields can also arrive through the secret bundle
//! (bootstrap user data and a default network); [`ProviderSpec::resolve`]
//! merges them with spec-over-secret precedence, independently per field.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credentials::{SECRET_KEY_NETWORK_ID, SECRET_KEY_USER_DATA};
use crate::error::Error;

/// Declarative machine specification, decoded from the opaque spec document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// STACKIT machine type, e.g. `c2i.2`.
    pub machine_type: String,

    /// Image to boot from. Exactly one of `image_id` and a `boot_volume`
    /// source must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// Boot volume descriptor, alternative to `image_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_volume: Option<BootVolume>,

    /// User-supplied labels, merged with the driver's reserved labels.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Network attachment descriptor. When absent, the secret bundle's
    /// network ID (if any) is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkAttachment>,

    /// Security group IDs applied to the server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,

    /// Extra data volume IDs attached to the server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// SSH keypair name registered with the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keypair_name: Option<String>,

    /// Placement zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Affinity group the server joins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity_group: Option<String>,

    /// CIDR ranges allowed to originate traffic from the server's NICs,
    /// reconciled after every create-or-reuse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_addresses: Vec<String>,

    /// Service account mails attached to the server (at most one).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_account_mails: Vec<String>,

    /// Whether the STACKIT guest agent is provisioned on the server.
    #[serde(default)]
    pub install_agent: bool,

    /// Bootstrap payload (cloud-init). When absent, the secret bundle's
    /// user data (if any) is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    /// Free-form metadata forwarded to the server.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Boot volume descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootVolume {
    /// Volume size in GB; the provider applies its default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,
    /// What the volume is created from.
    pub source: BootVolumeSource,
}

/// Source of a boot volume: an image or an existing volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootVolumeSource {
    /// Source kind, `image` or `volume`.
    #[serde(rename = "type")]
    pub kind: String,
    /// ID of the image or volume.
    pub id: String,
}

/// Network attachment descriptor: attach to a network (a NIC is created
/// automatically) or attach a list of pre-existing NICs. The two branches are
/// mutually exclusive; a descriptor that sets both, or neither, fails
/// validation.
///
/// The compute API requires the networking field to be present on create even
/// when empty, so the resolved form of "no attachment anywhere" is a
/// descriptor with both branches empty, not an absent field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    /// Network to attach to; the provider creates the NIC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    /// Pre-existing NICs to attach.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nic_ids: Vec<String>,
}

impl NetworkAttachment {
    /// True when neither branch is set.
    pub fn is_empty(&self) -> bool {
        self.network_id.is_none() && self.nic_ids.is_empty()
    }
}

/// Spec after merging with the secret bundle. The merge is a deterministic,
/// side-effect-free function of the spec and the secret map.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpec {
    /// The decoded spec, unchanged.
    pub spec: ProviderSpec,
    /// Resolved network attachment; explicit-empty when absent everywhere.
    pub network: NetworkAttachment,
    /// Resolved bootstrap payload, or none.
    pub user_data: Option<String>,
}

/// Decode the opaque spec document.
///
/// Fails with [`Error::Internal`] on nil or malformed input; the orchestrator
/// stores the document opaquely, so a decode failure is a programming or
/// corruption problem, not a caller mistake.
pub fn decode_provider_spec(raw: &serde_json::Value) -> Result<ProviderSpec, Error> {
    if raw.is_null() {
        return Err(Error::internal("provider spec document is nil"));
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::internal(format!("failed to decode provider spec: {}", e)))
}

impl ProviderSpec {
    /// Merge this spec with the secret bundle, spec fields winning.
    ///
    /// Precedence is independent per field:
    /// - user data: spec, else secret `userData`, else absent (no error)
    /// - network: spec descriptor, else a single-network descriptor from the
    ///   secret's `networkId`, else an explicit-empty descriptor
    pub fn resolve(&self, secret: &HashMap<String, String>) -> ResolvedSpec {
        let user_data = self
            .user_data
            .clone()
            .or_else(|| secret.get(SECRET_KEY_USER_DATA).cloned());

        let network = match &self.network {
            Some(attachment) => attachment.clone(),
            None => match secret.get(SECRET_KEY_NETWORK_ID) {
                Some(network_id) if !network_id.is_empty() => NetworkAttachment {
                    network_id: Some(network_id.clone()),
                    nic_ids: Vec::new(),
                },
                _ => NetworkAttachment::default(),
            },
        };

        ResolvedSpec {
            spec: self.clone(),
            network,
            user_data,
        }
    }
}
