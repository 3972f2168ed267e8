use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{Backend, BackendSnapshot};
use crate::error::{Result, SpillwayError};
use crate::route::DEFAULT_RETRY_AFTER_SECS;

/// Shared routing state for a fixed pool of backends.
///
/// The descriptor list is immutable; throttle flags, deadlines, counters and
/// the selection PRNG all live behind one mutex. Critical sections are O(N)
/// over a handful of backends, so a single lock is cheaper than anything
/// finer grained. The lock is never held across a dispatch.
pub struct Registry {
    backends: Vec<Backend>,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    states: Vec<ThrottleState>,
    rng: StdRng,
}

#[derive(Clone, Default)]
struct ThrottleState {
    is_throttling: bool,
    retry_after_epoch_seconds: u64,
    successful_call_count: u64,
    attempts: u64,
}

pub(crate) struct AvailableSnapshot {
    /// `(index, priority)` of every backend not currently throttling.
    pub available: Vec<(usize, u32)>,
    /// `(index, deadline)` of the throttled backend that recovers soonest.
    pub soonest_retry_after: Option<(usize, u64)>,
}

impl Registry {
    /// Validates the pool and seeds the selection PRNG from OS entropy.
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        Self::with_rng(backends, StdRng::from_entropy())
    }

    /// Like [`Registry::new`] but with a fixed PRNG seed, for deterministic
    /// selection in tests and simulations.
    pub fn with_seed(backends: Vec<Backend>, seed: u64) -> Result<Self> {
        Self::with_rng(backends, StdRng::seed_from_u64(seed))
    }

    fn with_rng(backends: Vec<Backend>, rng: StdRng) -> Result<Self> {
        validate(&backends)?;
        let states = vec![ThrottleState::default(); backends.len()];
        Ok(Self {
            backends,
            inner: Mutex::new(RegistryInner { states, rng }),
        })
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Current state of every backend, in insertion order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let inner = self.lock();
        self.backends
            .iter()
            .zip(&inner.states)
            .map(|(backend, state)| BackendSnapshot {
                host: backend.host.clone(),
                priority: backend.priority,
                is_throttling: state.is_throttling,
                retry_after_epoch_seconds: state
                    .is_throttling
                    .then_some(state.retry_after_epoch_seconds),
                successful_call_count: state.successful_call_count,
                attempts: state.attempts,
            })
            .collect()
    }

    pub(crate) fn backend(&self, index: usize) -> &Backend {
        &self.backends[index]
    }

    /// Sweeps expired throttles, then reports which backends are available
    /// and, for the callers that find none, when the next one frees up.
    pub(crate) fn snapshot_available(&self, now_epoch_seconds: u64) -> AvailableSnapshot {
        let mut inner = self.lock();
        let mut available = Vec::with_capacity(self.backends.len());
        let mut soonest_retry_after: Option<(usize, u64)> = None;

        for (index, state) in inner.states.iter_mut().enumerate() {
            if state.is_throttling && now_epoch_seconds >= state.retry_after_epoch_seconds {
                state.is_throttling = false;
                state.retry_after_epoch_seconds = 0;
                tracing::info!(
                    host = %self.backends[index].host,
                    "backend is no longer throttling"
                );
            }

            if state.is_throttling {
                let deadline = state.retry_after_epoch_seconds;
                if soonest_retry_after.is_none_or(|(_, soonest)| deadline < soonest) {
                    soonest_retry_after = Some((index, deadline));
                }
            } else {
                available.push((index, self.backends[index].priority));
            }
        }

        AvailableSnapshot {
            available,
            soonest_retry_after,
        }
    }

    /// Latest 429/5xx wins; the stored deadline is strictly in the future
    /// even for `Retry-After: 0`.
    pub(crate) fn mark_throttled(
        &self,
        index: usize,
        retry_after_seconds: u64,
        now_epoch_seconds: u64,
    ) {
        let seconds = retry_after_seconds.max(1);
        let mut inner = self.lock();
        let state = &mut inner.states[index];
        state.is_throttling = true;
        state.retry_after_epoch_seconds = now_epoch_seconds + seconds;
        tracing::info!(
            host = %self.backends[index].host,
            retry_after_seconds = seconds,
            "backend is throttling"
        );
    }

    pub(crate) fn record_success(&self, index: usize) {
        let mut inner = self.lock();
        let state = &mut inner.states[index];
        state.is_throttling = false;
        state.retry_after_epoch_seconds = 0;
        state.successful_call_count += 1;
    }

    pub(crate) fn record_attempt(&self, index: usize) {
        let mut inner = self.lock();
        inner.states[index].attempts += 1;
    }

    /// Uniform random pick among candidate indices. Callers pass at least
    /// one candidate.
    pub(crate) fn choose(&self, candidates: &[usize]) -> usize {
        debug_assert!(!candidates.is_empty());
        let mut inner = self.lock();
        candidates[inner.rng.gen_range(0..candidates.len())]
    }

    /// Seconds until the soonest throttled backend recovers, clamped to at
    /// least 1; the fixed sentinel when nothing is throttled.
    pub(crate) fn retry_after_hint(&self, now_epoch_seconds: u64) -> u64 {
        let inner = self.lock();
        inner
            .states
            .iter()
            .filter(|state| state.is_throttling)
            .map(|state| state.retry_after_epoch_seconds)
            .min()
            .map(|deadline| deadline.saturating_sub(now_epoch_seconds).max(1))
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Throttle state is plain data; recover it rather than propagate a
        // panic from an unrelated holder.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(backends: &[Backend]) -> Result<()> {
    if backends.is_empty() {
        return Err(SpillwayError::NoBackends);
    }
    for backend in backends {
        if backend.priority == 0 {
            return Err(SpillwayError::InvalidPriority {
                host: backend.host.clone(),
                priority: backend.priority,
            });
        }
        validate_host(&backend.host)?;
        if let Some(api_key) = &backend.api_key {
            if reqwest::header::HeaderValue::from_str(api_key).is_err() {
                return Err(SpillwayError::InvalidApiKey {
                    host: backend.host.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_host(host: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(SpillwayError::InvalidHost {
            host: host.to_string(),
            reason: "empty host".to_string(),
        });
    }
    let parsed =
        reqwest::Url::parse(&format!("https://{host}/")).map_err(|err| SpillwayError::InvalidHost {
            host: host.to_string(),
            reason: err.to_string(),
        })?;
    match parsed.host_str() {
        Some(parsed_host) if parsed_host.eq_ignore_ascii_case(host) => Ok(()),
        _ => Err(SpillwayError::InvalidHost {
            host: host.to_string(),
            reason: "not a bare DNS host".to_string(),
        }),
    }
}
