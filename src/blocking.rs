//! Blocking twin of the async transport. Same registry, selector, and
//! interpretation; only the dispatch primitive differs.

use std::sync::Arc;

use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::registry::Registry;
use crate::route::{exhausted_response, observe, retarget_headers, retarget_url, Disposition};
use crate::select::{select, Selection};

pub trait BlockingHttpTransport: Send + Sync {
    fn send(&self, request: reqwest::blocking::Request) -> Result<reqwest::blocking::Response>;
}

#[derive(Clone, Debug, Default)]
pub struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl BlockingHttpTransport for ReqwestBlockingTransport {
    fn send(&self, request: reqwest::blocking::Request) -> Result<reqwest::blocking::Response> {
        Ok(self.client.execute(request)?)
    }
}

/// Blocking routing transport. See [`AsyncLoadBalancer`] for the routing
/// semantics; the two share every state transition.
///
/// [`AsyncLoadBalancer`]: crate::AsyncLoadBalancer
#[derive(Clone)]
pub struct LoadBalancer {
    registry: Arc<Registry>,
    transport: Arc<dyn BlockingHttpTransport>,
    clock: Arc<dyn Clock>,
}

impl LoadBalancer {
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        Ok(Self::with_registry(Arc::new(Registry::new(backends)?)))
    }

    /// Builds on an existing registry, sharing throttle state with any other
    /// balancer holding the same one.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            transport: Arc::new(ReqwestBlockingTransport::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_transport(mut self, transport: impl BlockingHttpTransport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn with_http_client(self, client: reqwest::blocking::Client) -> Self {
        self.with_transport(ReqwestBlockingTransport::new(client))
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn handle(&self, mut request: reqwest::blocking::Request) -> Result<reqwest::blocking::Response> {
        let max_dispatches = self.registry.backend_count();
        let mut dispatches = 0;

        // Every attempt is derived from the caller's original URL and
        // headers; retargeting never accumulates across backends.
        let seed_url = request.url().clone();
        let seed_headers = request.headers().clone();

        loop {
            let now = self.clock.now_epoch_seconds();
            let index = match select(&self.registry, now) {
                Selection::Backend { index } => index,
                Selection::Unavailable {
                    retry_after_seconds,
                } => {
                    tracing::info!(retry_after_seconds, "no backend available; returning 429");
                    return Ok(exhausted_response(retry_after_seconds).into());
                }
            };

            if dispatches == max_dispatches {
                // Concurrent recoveries can re-arm the pool; bound the work
                // per invocation and let the caller's backoff take over.
                let retry_after_seconds = self.registry.retry_after_hint(now);
                tracing::info!(retry_after_seconds, "dispatch limit reached; returning 429");
                return Ok(exhausted_response(retry_after_seconds).into());
            }

            let backend = self.registry.backend(index);
            *request.url_mut() = retarget_url(&seed_url, backend)?;
            *request.headers_mut() = retarget_headers(&seed_headers, backend)?;
            self.registry.record_attempt(index);
            dispatches += 1;

            let Some(attempt) = request.try_clone() else {
                // A one-shot body cannot be retried; record what we observe
                // and surface the response either way.
                let response = self.transport.send(request)?;
                observe(
                    &self.registry,
                    index,
                    response.status(),
                    response.headers(),
                    self.clock.now_epoch_seconds(),
                );
                return Ok(response);
            };

            let response = self.transport.send(attempt)?;
            let disposition = observe(
                &self.registry,
                index,
                response.status(),
                response.headers(),
                self.clock.now_epoch_seconds(),
            );
            match disposition {
                Disposition::Throttled { .. } => continue,
                Disposition::Success | Disposition::PassThrough => return Ok(response),
            }
        }
    }
}

impl BlockingHttpTransport for LoadBalancer {
    fn send(&self, request: reqwest::blocking::Request) -> Result<reqwest::blocking::Response> {
        self.handle(request)
    }
}
