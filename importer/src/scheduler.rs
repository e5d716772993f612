//! Import scheduling.
//!
//! Each tick walks the enabled providers in registry order, imports the
//! ones whose refresh period elapsed and reports what happened per
//! provider. Providers run one after another.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use exchanger_common::{now, Currency, ImportRunId, ProviderId, Timestamp};
use exchanger_rates::{
    Provider, ProviderRegistry, RateDerivationEngine, RateFetcher, RateResult, SharedRateStore,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::{ImportMetrics, SharedMetrics};
use crate::state::{evaluate, ImportState};

/// What happened to one provider during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Refresh period not elapsed, or the provider is manual.
    Skipped,
    /// Table stored. `failures` lists absorbed upstream errors.
    Imported { rows: usize, failures: Vec<String> },
    /// Nothing derived; the stored table was left alone.
    Unchanged { failures: Vec<String> },
    /// A storage error; the refresh is retried on the next run.
    Failed { reason: String },
}

impl ImportOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ImportOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ProviderReport {
    pub provider: ProviderId,
    pub outcome: ImportOutcome,
}

/// Result of one import run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub run_id: ImportRunId,
    pub started_at: Timestamp,
    pub providers: Vec<ProviderReport>,
}

impl ImportReport {
    pub fn outcome(&self, provider: &ProviderId) -> Option<&ImportOutcome> {
        self.providers
            .iter()
            .find(|report| &report.provider == provider)
            .map(|report| &report.outcome)
    }

    pub fn imported(&self) -> usize {
        self.providers
            .iter()
            .filter(|report| matches!(report.outcome, ImportOutcome::Imported { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.providers.iter().filter(|report| report.outcome.is_failed()).count()
    }
}

/// Drives provider imports into a rate store.
pub struct ImportScheduler {
    registry: Arc<ProviderRegistry>,
    store: SharedRateStore,
    engine: RateDerivationEngine,
    currencies: BTreeSet<Currency>,
    metrics: SharedMetrics,
    states: Mutex<HashMap<ProviderId, ImportState>>,
}

impl ImportScheduler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: SharedRateStore,
        fetcher: Arc<dyn RateFetcher>,
        currencies: BTreeSet<Currency>,
    ) -> Self {
        Self {
            registry,
            store,
            engine: RateDerivationEngine::new(fetcher),
            currencies,
            metrics: Arc::new(ImportMetrics::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn metrics(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    /// Current state of a provider; `Idle` when never seen.
    pub fn state(&self, provider: &ProviderId) -> ImportState {
        self.states
            .lock()
            .get(provider)
            .copied()
            .unwrap_or(ImportState::Idle)
    }

    /// Import every due provider now.
    pub async fn run_import(&self, force: bool) -> ImportReport {
        self.run_import_at(force, now()).await
    }

    /// Import every provider due at `now`.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run_import_at(&self, force: bool, now: Timestamp) -> ImportReport {
        let run_id = ImportRunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let mut providers = Vec::new();
        for provider in self.registry.enabled() {
            let outcome = self.run_provider(&provider, force, now).await;
            providers.push(ProviderReport {
                provider: provider.id.clone(),
                outcome,
            });
        }

        let report = ImportReport {
            run_id,
            started_at: now,
            providers,
        };
        info!(
            providers = report.providers.len(),
            imported = report.imported(),
            failed = report.failed(),
            "Import run finished"
        );
        report
    }

    async fn run_provider(&self, provider: &Provider, force: bool, now: Timestamp) -> ImportOutcome {
        let last_refreshed_at = match self.store.last_refreshed(&provider.id).await {
            Ok(at) => at,
            Err(e) => {
                error!(provider = %provider.id, error = %e, "Cannot read refresh bookkeeping");
                self.metrics.import_failed();
                return ImportOutcome::Failed { reason: e.to_string() };
            }
        };

        if evaluate(provider, last_refreshed_at, now, force) != ImportState::Due {
            debug!(provider = %provider.id, "Not due");
            self.metrics.import_skipped();
            return ImportOutcome::Skipped;
        }

        self.transition(&provider.id, ImportState::Due);
        self.transition(&provider.id, ImportState::Importing);
        self.metrics.import_started();

        let outcome = match self.import(provider, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(provider = %provider.id, error = %e, "Import failed");
                self.metrics.import_failed();
                ImportOutcome::Failed { reason: e.to_string() }
            }
        };

        self.transition(&provider.id, ImportState::Idle);
        outcome
    }

    async fn import(&self, provider: &Provider, now: Timestamp) -> RateResult<ImportOutcome> {
        let existing = self.store.get_latest(&provider.id).await?;
        let derivation = self.engine.derive(provider, &self.currencies, &existing).await;

        let failures: Vec<String> = derivation.failures.iter().map(ToString::to_string).collect();
        self.metrics.fetch_failed(failures.len());

        let outcome = if derivation.table.is_empty() {
            ImportOutcome::Unchanged { failures }
        } else {
            self.store.set_latest(&provider.id, &derivation.table).await?;
            if provider.historical_rates {
                self.store
                    .set_historical(&provider.id, &derivation.table, Some(now.date_naive()))
                    .await?;
            }
            let rows = derivation.table.len();
            self.metrics.import_succeeded(rows);
            info!(provider = %provider.id, rows, failures = failures.len(), "Imported rates");
            ImportOutcome::Imported { rows, failures }
        };

        self.store.record_refresh(&provider.id, now).await?;
        self.registry.record_refresh(&provider.id, now);
        Ok(outcome)
    }

    fn transition(&self, provider: &ProviderId, next: ImportState) {
        let mut states = self.states.lock();
        let current = states.get(provider).copied().unwrap_or(ImportState::Idle);
        if !current.can_transition_to(next) {
            warn!(provider = %provider, from = ?current, to = ?next, "Unexpected import state transition");
        }
        states.insert(provider.clone(), next);
    }

    /// Run imports every `tick` until `shutdown` flips to `true`.
    pub async fn run_forever(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs = tick.as_secs(), "Import scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_import(false).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Import scheduler stopped");
    }
}
