//! Metrics collection for reward runs
//!
//! Prometheus counters for monitoring a reward run. Each collector owns a
//! private registry, so several runs in one process never collide.
//!
//! # Metrics
//!
//! - `reward_blocks_processed_total` - Blocks walked by the allocator
//! - `reward_transfer_events_applied_total` - Vault transfers replayed
//! - `reward_reconciliations_total` - Ledger checks against the chain
//! - `reward_service_recomputations_total` - Position valuations recomputed

use prometheus::{IntCounter, Registry};
use std::{fmt, sync::Arc};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Blocks walked
    pub blocks_processed: IntCounter,

    /// Transfers replayed
    pub transfer_events_applied: IntCounter,

    /// Reconciliations performed
    pub reconciliations: IntCounter,

    /// Position valuations recomputed
    pub service_recomputations: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let blocks_processed = IntCounter::new(
            "reward_blocks_processed_total",
            "Blocks walked by the allocator",
        )?;
        registry.register(Box::new(blocks_processed.clone()))?;

        let transfer_events_applied = IntCounter::new(
            "reward_transfer_events_applied_total",
            "Vault transfer events replayed into the ledger",
        )?;
        registry.register(Box::new(transfer_events_applied.clone()))?;

        let reconciliations = IntCounter::new(
            "reward_reconciliations_total",
            "Ledger reconciliations against on-chain balances",
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let service_recomputations = IntCounter::new(
            "reward_service_recomputations_total",
            "Position valuation recomputations",
        )?;
        registry.register(Box::new(service_recomputations.clone()))?;

        Ok(Self {
            blocks_processed,
            transfer_events_applied,
            reconciliations,
            service_recomputations,
            registry,
        })
    }

    /// Record walked blocks
    pub fn record_blocks(&self, count: u64) {
        self.blocks_processed.inc_by(count);
    }

    /// Record replayed transfers
    pub fn record_transfers(&self, count: usize) {
        self.transfer_events_applied.inc_by(count as u64);
    }

    /// Record a reconciliation
    pub fn record_reconciliation(&self) {
        self.reconciliations.inc();
    }

    /// Record a service recomputation
    pub fn record_recomputation(&self) {
        self.service_recomputations.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("blocks_processed", &self.blocks_processed.get())
            .field("transfer_events_applied", &self.transfer_events_applied.get())
            .field("reconciliations", &self.reconciliations.get())
            .field("service_recomputations", &self.service_recomputations.get())
            .finish()
    }
}
