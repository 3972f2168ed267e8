use serde::{Deserialize, Serialize};

/// A configured upstream endpoint. Immutable once handed to a
/// [`Registry`](crate::Registry); throttle state lives there, not here.
#[derive(Clone, Serialize, Deserialize)]
pub struct Backend {
    /// DNS name of the endpoint (no scheme, no path).
    pub host: String,
    /// Positive integer; lower is more preferred. Tier 2 is only consulted
    /// once every tier-1 backend is throttled.
    pub priority: u32,
    /// When set, outbound requests to this backend carry `api-key` and any
    /// caller-supplied `Authorization` header is dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Backend {
    pub fn new(host: impl Into<String>, priority: u32) -> Self {
        Self {
            host: host.into(),
            priority,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("host", &self.host)
            .field("priority", &self.priority)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Point-in-time view of one backend's routing state, in registry insertion
/// order when taken via [`Registry::snapshot`](crate::Registry::snapshot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendSnapshot {
    pub host: String,
    pub priority: u32,
    pub is_throttling: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_epoch_seconds: Option<u64>,
    pub successful_call_count: u64,
    pub attempts: u64,
}
