//! Per-provider import state.

use exchanger_common::{refresh_due, Timestamp};
use exchanger_rates::Provider;

/// Where a provider stands in the import cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    /// Waiting for its refresh period to elapse.
    Idle,
    /// Selected for import in this cycle.
    Due,
    /// Fetch, derivation and storage in progress.
    Importing,
}

impl ImportState {
    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[ImportState] {
        match self {
            ImportState::Idle => &[ImportState::Due],
            ImportState::Due => &[ImportState::Importing, ImportState::Idle],
            ImportState::Importing => &[ImportState::Idle],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: ImportState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Decide whether `provider` should import at `now`.
///
/// Manual and disabled providers never become due. `last_refreshed_at` is the
/// store's bookkeeping, falling back to the provider's own record.
pub fn evaluate(
    provider: &Provider,
    last_refreshed_at: Option<Timestamp>,
    now: Timestamp,
    force: bool,
) -> ImportState {
    if !provider.enabled || provider.is_manual() {
        return ImportState::Idle;
    }
    if force {
        return ImportState::Due;
    }

    let last = last_refreshed_at.or(provider.last_refreshed_at);
    if refresh_due(last, now, provider.refresh_times_per_day) {
        ImportState::Due
    } else {
        ImportState::Idle
    }
}
