//! Machine lifecycle operations
//!
//! The [`Driver`] implements the four operations the orchestrator invokes:
//! create, delete, get-status, list. The orchestrator retries after crashes
//! and lost responses with no memory of prior attempts, so all four are
//! idempotent: create resolves the requested name against existing servers
//! before creating, delete treats an already-gone server as success, and no
//! state is held locally between calls — the provider is authoritative.
//!
//! Two concurrent creates for the same name can both observe zero matches and
//! both create a server; the provider offers no create idempotency token, so
//! this race is left open here, as it is upstream. A later create observing
//! more than one match fails closed and never deletes anything.

mod client_cell;
mod network;

pub use client_cell::ComputeClientFactory;

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{info, warn};

use crate::client::{
    label_selector, ComputeClient, ComputeError, CreateServerPayload, Server,
};
use crate::codec::{decode_machine_id, encode_machine_id};
use crate::config::DriverConfig;
use crate::credentials::Credentials;
use crate::error::Error;
use crate::spec::{decode_provider_spec, ResolvedSpec};
use crate::validate::validate_provider_spec;
use crate::{
    Result, DEFAULT_MANAGED_BY, LABEL_MACHINE_NAME, LABEL_MANAGED_BY, LABEL_ROLE, ROLE_NODE,
};

use client_cell::ClientCell;

/// Request to create (or re-acknowledge) a machine.
#[derive(Debug, Clone)]
pub struct CreateMachineRequest {
    /// Orchestrator-requested machine name; also the idempotency key.
    pub machine_name: String,
    /// Opaque provider spec document.
    pub provider_spec: serde_json::Value,
    /// Credential bundle (decoded secret string data).
    pub secret: HashMap<String, String>,
}

/// Successful create response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMachineResponse {
    /// External identifier addressing the server from now on.
    pub provider_id: String,
    /// Name the machine registers under.
    pub node_name: String,
}

/// Request to delete a machine.
#[derive(Debug, Clone)]
pub struct DeleteMachineRequest {
    /// Orchestrator-requested machine name, used as fallback lookup.
    pub machine_name: String,
    /// External identifier, when the orchestrator already has one.
    pub provider_id: Option<String>,
    /// Credential bundle.
    pub secret: HashMap<String, String>,
}

/// Request for the current status of a machine.
#[derive(Debug, Clone)]
pub struct GetMachineStatusRequest {
    /// Orchestrator-requested machine name.
    pub machine_name: String,
    /// External identifier; empty when the machine was never created.
    pub provider_id: String,
    /// Credential bundle.
    pub secret: HashMap<String, String>,
}

/// Successful status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMachineStatusResponse {
    /// The identifier, unchanged.
    pub provider_id: String,
    /// Name the machine registers under.
    pub node_name: String,
}

/// Request to list the machines this driver class owns.
#[derive(Debug, Clone)]
pub struct ListMachinesRequest {
    /// Value of the managed-by label to filter on; the driver's default
    /// owner class when unset.
    pub managed_by: Option<String>,
    /// Credential bundle.
    pub secret: HashMap<String, String>,
}

/// Successful list response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListMachinesResponse {
    /// External identifier to node name, one entry per owned server.
    pub machines: HashMap<String, String>,
}

/// The machine lifecycle driver.
///
/// Holds no per-machine state; the only shared mutable state is the lazily
/// bound compute client (see [`ComputeClientFactory`]).
pub struct Driver {
    factory: ComputeClientFactory,
    client: ClientCell,
}

impl Driver {
    /// Build a driver around a client factory.
    pub fn new(factory: ComputeClientFactory) -> Self {
        Self {
            factory,
            client: ClientCell::new(),
        }
    }

    /// Build a driver using the HTTP transport with the given configuration.
    pub fn with_http_transport(config: DriverConfig) -> Self {
        let factory: ComputeClientFactory = Arc::new(move |credentials: &Credentials| {
            crate::client::http::HttpComputeClient::new(credentials, config.clone())
                .map(|client| Arc::new(client) as Arc<dyn ComputeClient>)
        });
        Self::new(factory)
    }

    async fn ensure_client(
        &self,
        secret: &HashMap<String, String>,
    ) -> Result<(Arc<dyn ComputeClient>, Credentials)> {
        let credentials = Credentials::from_secret(secret)?;
        let client = self.client.ensure(&credentials, &self.factory).await?;
        Ok((client, credentials))
    }

    /// Create the machine, or re-acknowledge it if an earlier attempt already
    /// created it under the requested name.
    pub async fn create_machine(
        &self,
        request: &CreateMachineRequest,
    ) -> Result<CreateMachineResponse> {
        let machine_name = &request.machine_name;
        let spec = decode_provider_spec(&request.provider_spec)?;
        validate_provider_spec(&spec)?;
        let resolved = spec.resolve(&request.secret);

        let (client, credentials) = self.ensure_client(&request.secret).await?;
        let project_id = &credentials.project_id;
        let region = &credentials.region;

        let selector = label_selector(LABEL_MACHINE_NAME, machine_name);
        let matches = client
            .list_servers(project_id, region, &selector)
            .await
            .map_err(|e| {
                Error::unavailable(format!(
                    "failed to look up machine {} before create: {}",
                    machine_name, e
                ))
            })?;

        let server = match matches.len() {
            0 => {
                let payload = build_create_payload(machine_name, &resolved);
                let server = client
                    .create_server(project_id, region, &payload)
                    .await
                    .map_err(|e| classify_create_error(machine_name, e))?;
                info!(machine = %machine_name, server = %server.id, "Created server");
                server
            }
            1 => {
                let server = matches.into_iter().next().unwrap_or_default();
                info!(
                    machine = %machine_name,
                    server = %server.id,
                    "Server already exists under the requested name, skipping create"
                );
                server
            }
            n => {
                return Err(Error::internal(format!(
                    "found {} servers labeled {}={}; refusing to pick or delete one, \
                     clean up the duplicates manually",
                    n, LABEL_MACHINE_NAME, machine_name
                )));
            }
        };

        // Allowed-address requirements can change between retries even when
        // the server already exists, so this runs on reuse as well.
        network::reconcile_allowed_addresses(
            client.as_ref(),
            project_id,
            region,
            &server.id,
            &resolved,
        )
        .await?;

        Ok(CreateMachineResponse {
            provider_id: encode_machine_id(project_id, &server.id),
            node_name: machine_name.clone(),
        })
    }

    /// Delete the machine. Succeeds when the machine was never created or is
    /// already gone.
    ///
    /// A provider ID that does not decode is deliberately demoted to a warning
    /// and resolution falls back to the machine-name label; delete never
    /// returns [`Error::InvalidArgument`] for an unusable identifier.
    pub async fn delete_machine(&self, request: &DeleteMachineRequest) -> Result<()> {
        let machine_name = &request.machine_name;
        let (client, credentials) = self.ensure_client(&request.secret).await?;
        let project_id = &credentials.project_id;
        let region = &credentials.region;

        let mut server_id = None;
        if let Some(provider_id) = request.provider_id.as_deref() {
            if !provider_id.is_empty() {
                match decode_machine_id(provider_id) {
                    Ok(id) => server_id = Some(id.server_id),
                    Err(e) => {
                        // Not fatal for delete; fall back to the name label.
                        warn!(
                            machine = %machine_name,
                            provider_id = %provider_id,
                            error = %e,
                            "Provider ID did not decode, falling back to name lookup"
                        );
                    }
                }
            }
        }

        if server_id.is_none() {
            let selector = label_selector(LABEL_MACHINE_NAME, machine_name);
            let matches = client
                .list_servers(project_id, region, &selector)
                .await
                .map_err(|e| {
                    Error::unavailable(format!(
                        "failed to look up machine {} for delete: {}",
                        machine_name, e
                    ))
                })?;
            match matches.len() {
                0 => {}
                1 => server_id = matches.into_iter().next().map(|s| s.id),
                n => {
                    return Err(Error::internal(format!(
                        "found {} servers labeled {}={}; refusing to delete any, \
                         clean up the duplicates manually",
                        n, LABEL_MACHINE_NAME, machine_name
                    )));
                }
            }
        }

        let Some(server_id) = server_id else {
            info!(machine = %machine_name, "No server to delete, treating as success");
            return Ok(());
        };

        match client.delete_server(project_id, region, &server_id).await {
            Ok(()) => {
                info!(machine = %machine_name, server = %server_id, "Deleted server");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(
                    machine = %machine_name,
                    server = %server_id,
                    "Server already gone, treating delete as success"
                );
                Ok(())
            }
            Err(ComputeError::Transport(e)) => Err(Error::unavailable(format!(
                "failed to delete server {}: {}",
                server_id, e
            ))),
            Err(e) => Err(Error::internal(format!(
                "failed to delete server {}: {}",
                server_id, e
            ))),
        }
    }

    /// Fetch the current status of the machine addressed by its identifier.
    pub async fn get_machine_status(
        &self,
        request: &GetMachineStatusRequest,
    ) -> Result<GetMachineStatusResponse> {
        if request.provider_id.is_empty() {
            // Signals the orchestrator to call create; no provider call is
            // issued for a machine that was never created.
            return Err(Error::not_found(format!(
                "machine {} has no provider ID yet",
                request.machine_name
            )));
        }

        let id = decode_machine_id(&request.provider_id)?;
        let (client, credentials) = self.ensure_client(&request.secret).await?;

        let server = match client
            .get_server(&credentials.project_id, &credentials.region, &id.server_id)
            .await
        {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                return Err(Error::not_found(format!(
                    "server {} does not exist",
                    id.server_id
                )));
            }
            Err(e) => {
                return Err(Error::internal(format!(
                    "failed to fetch server {}: {}",
                    id.server_id, e
                )));
            }
        };

        Ok(GetMachineStatusResponse {
            provider_id: request.provider_id.clone(),
            node_name: node_name(&server),
        })
    }

    /// List all machines owned by the given controller class.
    pub async fn list_machines(
        &self,
        request: &ListMachinesRequest,
    ) -> Result<ListMachinesResponse> {
        let (client, credentials) = self.ensure_client(&request.secret).await?;
        let owner = request
            .managed_by
            .as_deref()
            .unwrap_or(DEFAULT_MANAGED_BY);

        let selector = label_selector(LABEL_MANAGED_BY, owner);
        let servers = client
            .list_servers(&credentials.project_id, &credentials.region, &selector)
            .await
            .map_err(|e| Error::internal(format!("failed to list machines: {}", e)))?;

        let machines = servers
            .iter()
            .map(|server| {
                (
                    encode_machine_id(&credentials.project_id, &server.id),
                    node_name(server),
                )
            })
            .collect();

        Ok(ListMachinesResponse { machines })
    }
}

/// Node name of a server: the machine-name label when present, else the
/// display name.
fn node_name(server: &Server) -> String {
    server
        .labels
        .get(LABEL_MACHINE_NAME)
        .cloned()
        .unwrap_or_else(|| server.name.clone())
}

/// Build the provider create request from the resolved spec.
///
/// Reserved labels overwrite user labels of the same key; the idempotent
/// lookup depends on them.
fn build_create_payload(machine_name: &str, resolved: &ResolvedSpec) -> CreateServerPayload {
    let spec = &resolved.spec;

    let mut labels = spec.labels.clone();
    labels.insert(LABEL_MACHINE_NAME.to_string(), machine_name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), DEFAULT_MANAGED_BY.to_string());
    labels.insert(LABEL_ROLE.to_string(), ROLE_NODE.to_string());

    CreateServerPayload {
        name: machine_name.to_string(),
        machine_type: spec.machine_type.clone(),
        image_id: spec.image_id.clone(),
        boot_volume: spec.boot_volume.clone(),
        labels,
        networking: resolved.network.clone(),
        security_groups: spec.security_groups.clone(),
        volumes: spec.volumes.clone(),
        keypair_name: spec.keypair_name.clone(),
        availability_zone: spec.availability_zone.clone(),
        affinity_group: spec.affinity_group.clone(),
        user_data: resolved
            .user_data
            .as_ref()
            .map(|data| BASE64.encode(data.as_bytes())),
        service_account_mails: spec.service_account_mails.clone(),
        install_agent: spec.install_agent,
        metadata: spec.metadata.clone(),
    }
}

/// Map a create failure to the orchestrator taxonomy: quota and capacity
/// phrasing means the caller should back off and possibly resize, anything
/// else is a transient provider problem.
fn classify_create_error(machine_name: &str, err: ComputeError) -> Error {
    const EXHAUSTION_MARKERS: [&str; 4] = ["quota", "capacity", "exhausted", "insufficient"];
    let message = err.to_string().to_lowercase();
    if EXHAUSTION_MARKERS.iter().any(|m| message.contains(m)) {
        Error::resource_exhausted(format!(
            "create of machine {} rejected: {}",
            machine_name, err
        ))
    } else {
        Error::unavailable(format!("failed to create machine {}: {}", machine_name, err))
    }
}
