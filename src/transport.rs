use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::registry::Registry;
use crate::route::{exhausted_response, observe, retarget_headers, retarget_url, Disposition};
use crate::select::{select, Selection};

/// The seam between the balancer and the real HTTP stack. Implemented by
/// [`ReqwestTransport`] for production, by test doubles in the test suite,
/// and by [`AsyncLoadBalancer`] itself so balancers compose like any other
/// transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// Default underlying transport: a plain `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        Ok(self.client.execute(request).await?)
    }
}

/// Cooperative-suspension routing transport.
///
/// Each [`handle`](AsyncLoadBalancer::handle) call selects an available
/// backend from the highest-priority tier, retargets the request at it, and
/// dispatches. Throttled responses (429, retriable 5xx) take the backend out
/// of the pool until its `Retry-After` deadline and the request is retried
/// against whatever remains; once the pool is empty the caller gets a
/// synthesized 429 whose `Retry-After` names the soonest recovery. The only
/// suspension point is the dispatch itself; the registry lock is never held
/// across it.
#[derive(Clone)]
pub struct AsyncLoadBalancer {
    registry: Arc<Registry>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl AsyncLoadBalancer {
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        Ok(Self::with_registry(Arc::new(Registry::new(backends)?)))
    }

    /// Builds on an existing registry, sharing throttle state with any other
    /// balancer holding the same one.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            transport: Arc::new(ReqwestTransport::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn with_http_client(self, client: reqwest::Client) -> Self {
        self.with_transport(ReqwestTransport::new(client))
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Routes one logical request. Transport-level failures propagate
    /// unchanged; upstream statuses outside the retriable set are returned
    /// verbatim.
    pub async fn handle(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
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
                let response = self.transport.send(request).await?;
                observe(
                    &self.registry,
                    index,
                    response.status(),
                    response.headers(),
                    self.clock.now_epoch_seconds(),
                );
                return Ok(response);
            };

            let response = self.transport.send(attempt).await?;
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

#[async_trait]
impl HttpTransport for AsyncLoadBalancer {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.handle(request).await
    }
}
