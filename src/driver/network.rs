//! Allowed-address reconciliation
//!
//! After every create-or-reuse the driver brings the allowed-address lists of
//! the server's NICs up to the spec. The operation is monotonic: addresses
//! are only ever added, never removed, so concurrent retries and manual
//! provider-side additions are never undone.

use tracing::{debug, info};

use crate::client::{ComputeClient, Nic};
use crate::error::Error;
use crate::spec::{NetworkAttachment, ResolvedSpec};

/// Patch the allowed-address lists of a server's NICs to cover the spec.
///
/// - An empty resolved CIDR list is a no-op; no NIC fetch is issued.
/// - A server with no NICs while addresses are required fails with
///   [`Error::Unavailable`] — the NIC may still be materializing.
/// - An explicit network attachment restricts which NICs are touched;
///   without one every NIC is processed.
/// - A NIC is patched only when the union of its current list and the spec
///   list differs from the current list.
pub(crate) async fn reconcile_allowed_addresses(
    client: &dyn ComputeClient,
    project_id: &str,
    region: &str,
    server_id: &str,
    resolved: &ResolvedSpec,
) -> Result<(), Error> {
    let desired = &resolved.spec.allowed_addresses;
    if desired.is_empty() {
        return Ok(());
    }

    let nics = client
        .get_server_nics(project_id, region, server_id)
        .await
        .map_err(|e| {
            Error::unavailable(format!(
                "failed to list NICs of server {}: {}",
                server_id, e
            ))
        })?;

    if nics.is_empty() {
        return Err(Error::unavailable(format!(
            "server {} has no network interfaces to carry allowed addresses",
            server_id
        )));
    }

    for nic in &nics {
        if !attachment_covers(&resolved.network, nic) {
            debug!(nic = %nic.id, "Skipping NIC outside the spec's network attachment");
            continue;
        }

        let merged = union_addresses(&nic.allowed_addresses, desired);
        if merged == nic.allowed_addresses {
            debug!(nic = %nic.id, "Allowed addresses already cover the spec");
            continue;
        }

        client
            .update_nic_allowed_addresses(project_id, region, &nic.network_id, &nic.id, &merged)
            .await
            .map_err(|e| {
                Error::unavailable(format!(
                    "failed to update allowed addresses of NIC {}: {}",
                    nic.id, e
                ))
            })?;
        info!(
            nic = %nic.id,
            added = merged.len() - nic.allowed_addresses.len(),
            "Extended allowed addresses"
        );
    }

    Ok(())
}

/// Whether the spec's attachment descriptor selects this NIC. An empty
/// descriptor selects everything.
fn attachment_covers(attachment: &NetworkAttachment, nic: &Nic) -> bool {
    if let Some(network_id) = &attachment.network_id {
        return nic.network_id == *network_id;
    }
    if !attachment.nic_ids.is_empty() {
        return attachment.nic_ids.iter().any(|id| *id == nic.id);
    }
    true
}

/// Union of current and desired addresses: existing order preserved, new
/// entries appended in spec order, no duplicates.
fn union_addresses(current: &[String], desired: &[String]) -> Vec<String> {
    let mut merged = current.to_vec();
    for address in desired {
        if !merged.contains(address) {
            merged.push(address.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockComputeClient;
    use crate::spec::ProviderSpec;

    fn resolved_with(addresses: &[&str], network: NetworkAttachment) -> ResolvedSpec {
        ResolvedSpec {
            spec: ProviderSpec {
                machine_type: "c2i.2".into(),
                image_id: Some("img-1".into()),
                allowed_addresses: addresses.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            network,
            user_data: None,
        }
    }

    fn nic(id: &str, network_id: &str, addresses: &[&str]) -> Nic {
        Nic {
            id: id.into(),
            network_id: network_id.into(),
            allowed_addresses: addresses.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn union_preserves_order_and_appends() {
        let current = vec!["10.0.0.0/8".to_string()];
        let desired = vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()];
        assert_eq!(
            union_addresses(&current, &desired),
            vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()]
        );
    }

    #[test]
    fn union_of_subset_is_unchanged() {
        let current = vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()];
        let desired = vec!["192.168.0.0/16".to_string()];
        assert_eq!(union_addresses(&current, &desired), current);
    }

    #[tokio::test]
    async fn empty_spec_list_is_a_noop_without_any_call() {
        let client = MockComputeClient::new();
        let resolved = resolved_with(&[], NetworkAttachment::default());
        reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_nics_on_existing_server_is_unavailable() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let resolved = resolved_with(&["10.0.0.0/8"], NetworkAttachment::default());
        let err = reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn patches_union_once_when_addresses_are_missing() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| Ok(vec![nic("nic-1", "net-1", &["10.0.0.0/8"])]));
        client
            .expect_update_nic_allowed_addresses()
            .withf(|project_id, region, network_id, nic_id, addresses| {
                project_id == "proj-1"
                    && region == "eu01"
                    && network_id == "net-1"
                    && nic_id == "nic-1"
                    && addresses == ["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()]
            })
            .times(1)
            .returning(|_, _, _, nic_id, addresses| {
                Ok(Nic {
                    id: nic_id.to_string(),
                    network_id: "net-1".into(),
                    allowed_addresses: addresses.to_vec(),
                })
            });

        let resolved = resolved_with(
            &["10.0.0.0/8", "192.168.0.0/16"],
            NetworkAttachment::default(),
        );
        reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subset_issues_no_patch() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![nic(
                    "nic-1",
                    "net-1",
                    &["10.0.0.0/8", "192.168.0.0/16"],
                )])
            });
        // No update expectation: a patch call would fail the test.

        let resolved = resolved_with(&["192.168.0.0/16"], NetworkAttachment::default());
        reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn explicit_network_attachment_skips_other_networks() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![
                    nic("nic-1", "net-1", &[]),
                    nic("nic-2", "net-2", &[]),
                ])
            });
        client
            .expect_update_nic_allowed_addresses()
            .withf(|_, _, network_id, nic_id, _| network_id == "net-1" && nic_id == "nic-1")
            .times(1)
            .returning(|_, _, _, nic_id, addresses| {
                Ok(Nic {
                    id: nic_id.to_string(),
                    network_id: "net-1".into(),
                    allowed_addresses: addresses.to_vec(),
                })
            });

        let resolved = resolved_with(
            &["10.0.0.0/8"],
            NetworkAttachment {
                network_id: Some("net-1".into()),
                nic_ids: Vec::new(),
            },
        );
        reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn explicit_nic_list_limits_processing() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![
                    nic("nic-1", "net-1", &[]),
                    nic("nic-2", "net-1", &[]),
                ])
            });
        client
            .expect_update_nic_allowed_addresses()
            .withf(|_, _, _, nic_id, _| nic_id == "nic-2")
            .times(1)
            .returning(|_, _, _, nic_id, addresses| {
                Ok(Nic {
                    id: nic_id.to_string(),
                    network_id: "net-1".into(),
                    allowed_addresses: addresses.to_vec(),
                })
            });

        let resolved = resolved_with(
            &["10.0.0.0/8"],
            NetworkAttachment {
                network_id: None,
                nic_ids: vec!["nic-2".into()],
            },
        );
        reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nic_fetch_failure_is_unavailable() {
        let mut client = MockComputeClient::new();
        client
            .expect_get_server_nics()
            .times(1)
            .returning(|_, _, _| {
                Err(crate::client::ComputeError::Transport("reset".into()))
            });

        let resolved = resolved_with(&["10.0.0.0/8"], NetworkAttachment::default());
        let err = reconcile_allowed_addresses(&client, "proj-1", "eu01", "srv-1", &resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
