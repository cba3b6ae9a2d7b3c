//! Machine lifecycle driver for the STACKIT IaaS API
//!
//! This crate implements the provider side of a cluster orchestrator's machine
//! lifecycle: four idempotent operations (create, delete, get-status, list)
//! that turn a declarative machine specification plus a credential bundle into
//! calls against the STACKIT compute API.
//!
//! The orchestrator retries operations after crashes and lost responses with
//! no memory of prior attempts, so every operation here is safe to re-invoke:
//! create looks up existing servers by a stable name label before creating,
//! delete treats a missing server as success, and the external identifier
//! (`stackit://<project>/<server>`) is stable across calls.
//!
//! # Modules
//!
//! - [`driver`] - The four lifecycle operations and their request/response envelopes
//! - [`client`] - The compute client trait, wire types, and HTTP transport
//! - [`spec`] - Provider spec decoding and spec/secret precedence merge
//! - [`validate`] - Structural validation of the resolved spec
//! - [`credentials`] - Credential bundle parsing
//! - [`codec`] - External identifier encoding/decoding
//! - [`config`] - Driver configuration (endpoints, timeouts)
//! - [`error`] - Error taxonomy surfaced to the orchestrator

#![deny(missing_docs)]

pub mod client;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod spec;
pub mod validate;

pub use error::Error;

/// Result type alias using the driver's error taxonomy
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Stable label keys
// =============================================================================
// These keys are attached to every server the driver creates and are relied on
// for idempotent lookup and listing. Changing them orphans existing servers.

/// Label carrying the orchestrator-requested machine name; the idempotent
/// create lookup and the delete name-fallback both filter on it.
pub const LABEL_MACHINE_NAME: &str = "machine-name";

/// Label identifying which controller class owns a server; ListMachines
/// filters on it.
pub const LABEL_MANAGED_BY: &str = "managed-by";

/// Label describing the server's role in the cluster.
pub const LABEL_ROLE: &str = "role";

/// Default value for [`LABEL_MANAGED_BY`].
pub const DEFAULT_MANAGED_BY: &str = "machine-controller-manager";

/// Value for [`LABEL_ROLE`] on worker machines.
pub const ROLE_NODE: &str = "node";
