use crate::config::Settings;
use anyhow::Result;
use lib_common::admission::AdmissionGate;
use lib_common::retrieve::BackendClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    // Shared per-client window records
    pub gate: Arc<AdmissionGate>,
    // Pooled client for the recommendation backend
    pub backend: BackendClient,
    // Requests whose path starts with this go through the gate
    pub rate_limit_prefix: Arc<str>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self::from_parts(
            Arc::new(AdmissionGate::new(settings.admission.clone())),
            BackendClient::new(&settings.backend_url)?,
            &settings.rate_limit_prefix,
        ))
    }

    pub fn from_parts(gate: Arc<AdmissionGate>, backend: BackendClient, rate_limit_prefix: &str) -> Self {
        Self {
            gate,
            backend,
            rate_limit_prefix: Arc::from(rate_limit_prefix),
        }
    }

    /// A path is gated when it lies under the prefix or names the prefix
    /// itself, with or without its trailing slash.
    pub fn is_protected(&self, path: &str) -> bool {
        let prefix = &*self.rate_limit_prefix;
        path.starts_with(prefix) || path == prefix.trim_end_matches('/')
    }
}
