use crate::registry::Registry;
use crate::route::DEFAULT_RETRY_AFTER_SECS;

/// Outcome of one selection pass over the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Selection {
    Backend { index: usize },
    Unavailable { retry_after_seconds: u64 },
}

/// Picks an available backend from the highest-priority tier that has one,
/// uniformly at random within the tier. Priorities are a strict override
/// hierarchy: tier 2 is never consulted while any tier-1 backend is
/// available. With nothing available, reports how long until the soonest
/// throttled backend frees up.
pub(crate) fn select(registry: &Registry, now_epoch_seconds: u64) -> Selection {
    let snapshot = registry.snapshot_available(now_epoch_seconds);

    if snapshot.available.is_empty() {
        let retry_after_seconds = match snapshot.soonest_retry_after {
            Some((index, deadline)) => {
                let seconds = deadline.saturating_sub(now_epoch_seconds).max(1);
                tracing::info!(
                    host = %registry.backend(index).host,
                    retry_after_seconds = seconds,
                    "soonest retry to an available backend"
                );
                seconds
            }
            None => DEFAULT_RETRY_AFTER_SECS,
        };
        return Selection::Unavailable {
            retry_after_seconds,
        };
    }

    let mut selected_priority = u32::MAX;
    let mut candidates = Vec::with_capacity(snapshot.available.len());
    for (index, priority) in snapshot.available {
        if priority < selected_priority {
            selected_priority = priority;
            candidates.clear();
            candidates.push(index);
        } else if priority == selected_priority {
            candidates.push(index);
        }
    }

    Selection::Backend {
        index: registry.choose(&candidates),
    }
}
