use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpillwayError {
    #[error("no backends configured")]
    NoBackends,
    #[error("backend {host:?} has priority {priority}; priorities start at 1")]
    InvalidPriority { host: String, priority: u32 },
    #[error("invalid backend host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("api key for backend {host:?} is not a valid header value")]
    InvalidApiKey { host: String },
    #[error("failed to retarget request to {host:?}: {reason}")]
    Rewrite { host: String, reason: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SpillwayError>;
