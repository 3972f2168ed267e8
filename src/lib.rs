//! Priority-aware load-balancing transport for OpenAI-style endpoints.
//!
//! `spillway` sits between an OpenAI-style client and a pool of equivalent
//! upstream endpoints (Azure OpenAI instances, typically). Requests are
//! retargeted at an available backend from the highest-priority tier; `429`
//! and retriable `5xx` responses take a backend out of the pool until its
//! `Retry-After` deadline and the request is retried against the rest. When
//! the whole pool is throttled the caller receives a single synthesized
//! `429` carrying the soonest recovery time, so its existing backoff logic
//! keeps working unmodified.
//!
//! ```no_run
//! use spillway::{AsyncLoadBalancer, Backend};
//!
//! # async fn run() -> spillway::Result<()> {
//! let balancer = AsyncLoadBalancer::new(vec![
//!     Backend::new("oai-eastus.openai.azure.com", 1),
//!     Backend::new("oai-southcentralus.openai.azure.com", 1),
//!     Backend::new("oai-westus.openai.azure.com", 2),
//! ])?;
//!
//! let request = reqwest::Client::new()
//!     .post("https://oai-eastus.openai.azure.com/openai/deployments/gpt-4o/chat/completions")
//!     .header("content-type", "application/json")
//!     .body(r#"{"messages":[]}"#)
//!     .build()?;
//!
//! let response = balancer.handle(request).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

mod backend;
#[cfg(feature = "blocking")]
mod blocking;
mod clock;
mod error;
mod registry;
mod route;
mod select;
mod transport;

pub use backend::{Backend, BackendSnapshot};
#[cfg(feature = "blocking")]
pub use blocking::{BlockingHttpTransport, LoadBalancer, ReqwestBlockingTransport};
pub use clock::{Clock, SystemClock};
pub use error::{Result, SpillwayError};
pub use registry::Registry;
pub use transport::{AsyncLoadBalancer, HttpTransport, ReqwestTransport};
