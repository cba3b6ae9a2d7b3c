//! Credential-bound client lifecycle
//!
//! A driver constructs exactly one compute client, lazily, bound to the first
//! credential bundle it observes. Construction runs at most once even under
//! concurrent first calls; racing callers wait on the cell and then share the
//! single client, or the single sticky construction error. Later calls with
//! different credentials keep the original client and only log a warning —
//! hot credential rotation requires a fresh driver.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::client::ComputeClient;
use crate::credentials::{Credentials, CredentialsFingerprint};
use crate::error::Error;

/// Constructs a compute client from a credential bundle.
///
/// Injected into the driver so tests can bind mocks and production can bind
/// the HTTP transport; the driver never reaches for global client state.
pub type ComputeClientFactory =
    Arc<dyn Fn(&Credentials) -> Result<Arc<dyn ComputeClient>, Error> + Send + Sync>;

struct Binding {
    outcome: Result<Arc<dyn ComputeClient>, Error>,
    fingerprint: CredentialsFingerprint,
}

/// Single-initialization cell holding the bound client or its sticky error.
pub(crate) struct ClientCell {
    cell: OnceCell<Binding>,
}

impl ClientCell {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the bound client, constructing it on the first call.
    ///
    /// The stored outcome — success or failure — is replayed to every later
    /// call for the lifetime of this cell; a failed construction is never
    /// retried automatically.
    pub(crate) async fn ensure(
        &self,
        credentials: &Credentials,
        factory: &ComputeClientFactory,
    ) -> Result<Arc<dyn ComputeClient>, Error> {
        let binding = self
            .cell
            .get_or_init(|| async {
                let fingerprint = credentials.fingerprint();
                let outcome = factory(credentials);
                match &outcome {
                    Ok(_) => info!(credentials = %fingerprint, "Compute client bound"),
                    Err(e) => {
                        warn!(credentials = %fingerprint, error = %e, "Compute client construction failed; failure is sticky")
                    }
                }
                Binding {
                    outcome,
                    fingerprint,
                }
            })
            .await;

        let offered = credentials.fingerprint();
        if binding.fingerprint != offered {
            warn!(
                bound = %binding.fingerprint,
                offered = %offered,
                "Credential bundle changed after the client was bound; keeping the original client (rotation requires a new driver instance)"
            );
        }

        binding.outcome.clone()
    }
}
