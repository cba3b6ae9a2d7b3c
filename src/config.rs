//! Driver configuration
//!
//! Endpoint and timeout knobs for the HTTP transport. Defaults target the
//! public STACKIT API; environment overrides exist for private deployments
//! and for pointing tests at a local stub server.

use std::time::Duration;

/// Default token endpoint of the STACKIT service account API.
pub const DEFAULT_TOKEN_URL: &str = "https://service-account.api.stackit.cloud/token";

/// Default request timeout for compute API calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding the IaaS API base URL.
pub const ENV_IAAS_ENDPOINT: &str = "STACKIT_IAAS_ENDPOINT";

/// Environment variable overriding the token endpoint.
pub const ENV_TOKEN_URL: &str = "STACKIT_TOKEN_URL";

/// Configuration for the HTTP compute client.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// IaaS API base URL. When unset, the regional default
    /// `https://iaas.api.<region>.stackit.cloud` is used.
    pub iaas_endpoint: Option<String>,
    /// Token endpoint of the service account API.
    pub token_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            iaas_endpoint: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl DriverConfig {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var(ENV_IAAS_ENDPOINT) {
            if !endpoint.is_empty() {
                config.iaas_endpoint = Some(endpoint);
            }
        }
        if let Ok(url) = std::env::var(ENV_TOKEN_URL) {
            if !url.is_empty() {
                config.token_url = url;
            }
        }
        config
    }

    /// Base URL for compute calls in the given region.
    pub fn iaas_base_url(&self, region: &str) -> String {
        match &self.iaas_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://iaas.api.{}.stackit.cloud", region),
        }
    }
}
