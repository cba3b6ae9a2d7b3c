//! Structural validation of the provider spec
//!
//! Per-field format checks (UUID shapes, CIDR syntax, label charsets) are the
//! orchestrator's concern; this module enforces the cross-field invariants
//! the driver itself depends on. The first violation found is reported.

use crate::error::Error;
use crate::spec::ProviderSpec;

/// Validate the cross-field invariants of a decoded spec.
///
/// Checked, in order:
/// - `machineType` is non-empty
/// - exactly one of `imageId` / `bootVolume.source` is set
/// - a present network descriptor sets exactly one of its two branches
/// - at most one service account mail
pub fn validate_provider_spec(spec: &ProviderSpec) -> Result<(), Error> {
    if spec.machine_type.is_empty() {
        return Err(Error::invalid_argument("machineType must not be empty"));
    }

    match (&spec.image_id, &spec.boot_volume) {
        (Some(_), Some(_)) => {
            return Err(Error::invalid_argument(
                "imageId and bootVolume are mutually exclusive",
            ));
        }
        (None, None) => {
            return Err(Error::invalid_argument(
                "exactly one of imageId or bootVolume must be set",
            ));
        }
        _ => {}
    }

    if let Some(volume) = &spec.boot_volume {
        if volume.source.id.is_empty() {
            return Err(Error::invalid_argument("bootVolume.source.id must not be empty"));
        }
        if volume.source.kind != "image" && volume.source.kind != "volume" {
            return Err(Error::invalid_argument(format!(
                "bootVolume.source.type must be \"image\" or \"volume\", got {:?}",
                volume.source.kind
            )));
        }
    }

    if let Some(network) = &spec.network {
        let has_network = network.network_id.is_some();
        let has_nics = !network.nic_ids.is_empty();
        if has_network && has_nics {
            return Err(Error::invalid_argument(
                "network.networkId and network.nicIds are mutually exclusive",
            ));
        }
        if !has_network && !has_nics {
            return Err(Error::invalid_argument(
                "network descriptor must set one of networkId or nicIds",
            ));
        }
    }

    if spec.service_account_mails.len() > 1 {
        return Err(Error::invalid_argument(format!(
            "at most one service account mail is supported, got {}",
            spec.service_account_mails.len()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BootVolume, BootVolumeSource, NetworkAttachment};

    fn image_spec() -> ProviderSpec {
        ProviderSpec {
            machine_type: "c2i.2".into(),
            image_id: Some("img-1".into()),
            ..Default::default()
        }
    }

    fn boot_volume(kind: &str, id: &str) -> BootVolume {
        BootVolume {
            size_gb: Some(50),
            source: BootVolumeSource {
                kind: kind.into(),
                id: id.into(),
            },
        }
    }

    #[test]
    fn minimal_image_spec_is_valid() {
        assert!(validate_provider_spec(&image_spec()).is_ok());
    }

    #[test]
    fn boot_volume_spec_is_valid() {
        let spec = ProviderSpec {
            machine_type: "c2i.2".into(),
            boot_volume: Some(boot_volume("volume", "vol-1")),
            ..Default::default()
        };
        assert!(validate_provider_spec(&spec).is_ok());
    }

    #[test]
    fn empty_machine_type_is_rejected() {
        let mut spec = image_spec();
        spec.machine_type.clear();
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("machineType"));
    }

    #[test]
    fn image_and_boot_volume_together_are_rejected() {
        let mut spec = image_spec();
        spec.boot_volume = Some(boot_volume("image", "img-2"));
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn neither_image_nor_boot_volume_is_rejected() {
        let spec = ProviderSpec {
            machine_type: "c2i.2".into(),
            ..Default::default()
        };
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn unknown_boot_volume_source_kind_is_rejected() {
        let mut spec = ProviderSpec {
            machine_type: "c2i.2".into(),
            ..Default::default()
        };
        spec.boot_volume = Some(boot_volume("snapshot", "snap-1"));
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("bootVolume.source.type"));
    }

    #[test]
    fn network_with_both_branches_is_rejected() {
        let mut spec = image_spec();
        spec.network = Some(NetworkAttachment {
            network_id: Some("net-1".into()),
            nic_ids: vec!["nic-1".into()],
        });
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn network_with_neither_branch_is_rejected() {
        let mut spec = image_spec();
        spec.network = Some(NetworkAttachment::default());
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("networkId or nicIds"));
    }

    #[test]
    fn network_with_one_branch_is_valid() {
        let mut spec = image_spec();
        spec.network = Some(NetworkAttachment {
            network_id: Some("net-1".into()),
            nic_ids: Vec::new(),
        });
        assert!(validate_provider_spec(&spec).is_ok());

        spec.network = Some(NetworkAttachment {
            network_id: None,
            nic_ids: vec!["nic-1".into(), "nic-2".into()],
        });
        assert!(validate_provider_spec(&spec).is_ok());
    }

    #[test]
    fn more_than_one_service_account_mail_is_rejected() {
        let mut spec = image_spec();
        spec.service_account_mails =
            vec!["a@sa.stackit.cloud".into(), "b@sa.stackit.cloud".into()];
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("service account"));
    }

    #[test]
    fn first_violation_wins() {
        // Both machineType and the image invariant are broken; the
        // machineType message must be the one reported.
        let spec = ProviderSpec::default();
        let err = validate_provider_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("machineType"));
    }
}
