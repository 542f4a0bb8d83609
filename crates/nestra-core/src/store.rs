//! The single shared persistent store.
//!
//! Every module installed behind the dispatch router executes directly
//! against one `StoreState`, with no copy-in/copy-out between modules. The
//! struct is `Clone` so the router can run an invocation against a scratch
//! copy and commit it only on success, which makes each invocation
//! all-or-nothing including its ledger movements and emitted events.

use crate::config::NestraConfig;
use crate::events::EventJournal;
use crate::fees::FeeState;
use crate::nesting::NestingState;
use crate::registry::{RegistryState, RoyaltyRecord};
use crate::{Address, Amount, ModuleId, NestraError, OperationId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credit ledger for invocation-atomic value transfers.
///
/// Payouts, refunds, and commissions are recorded here inside the enclosing
/// invocation; a failed invocation reverts them together with all other
/// state changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, Amount>,
    treasury: Amount,
}

impl Ledger {
    pub fn balance_of(&self, address: Address) -> Amount {
        self.balances.get(&address).copied().unwrap_or(0)
    }

    pub fn treasury(&self) -> Amount {
        self.treasury
    }

    pub(crate) fn credit(&mut self, address: Address, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let entry = self.balances.entry(address).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| NestraError::InvalidParameter(format!("credit overflow for {address}")))?;
        Ok(())
    }

    pub(crate) fn accrue_treasury(&mut self, amount: Amount) -> Result<()> {
        self.treasury = self
            .treasury
            .checked_add(amount)
            .ok_or_else(|| NestraError::InvalidParameter("treasury overflow".into()))?;
        Ok(())
    }
}

/// The shared state space behind the dispatch router.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    /// The single privileged controller for mutating registry, fee, and
    /// routing operations.
    pub controller: Address,

    /// Seeded configuration parameters.
    pub config: NestraConfig,

    /// Routing table: operation selector to owning module.
    pub(crate) routes: BTreeMap<OperationId, ModuleId>,

    /// Authentication/whitelist registry state.
    pub(crate) registry: RegistryState,

    /// Threshold table and reputation ledger.
    pub(crate) fees: FeeState,

    /// Nested-ownership engine state.
    pub(crate) nesting: NestingState,

    /// Value ledger.
    pub ledger: Ledger,

    /// Append-only audit journal.
    pub journal: EventJournal,
}

impl StoreState {
    /// Create a store seeded from configuration. The controller owns all
    /// privileged operations and is the initial royalty recipient.
    pub fn new(controller: Address, config: NestraConfig) -> Self {
        let mut registry = RegistryState::default();
        registry.royalty = Some(RoyaltyRecord {
            recipient: controller,
            percentage: config.royalty_percentage,
        });
        Self {
            controller,
            fees: FeeState::new(config.default_rate_bps),
            config,
            routes: BTreeMap::new(),
            registry,
            nesting: NestingState::default(),
            ledger: Ledger::default(),
            journal: EventJournal::new(),
        }
    }

    /// Authorization gate for privileged mutations.
    pub fn require_controller(&self, caller: Address) -> Result<()> {
        if caller == self.controller {
            Ok(())
        } else {
            Err(NestraError::Unauthorized { caller })
        }
    }

    /// Current routing table, in selector order.
    pub fn routes(&self) -> impl Iterator<Item = (&OperationId, &ModuleId)> {
        self.routes.iter()
    }
}
