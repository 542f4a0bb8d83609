//! Append-only audit journal for state transitions.
//!
//! The journal lives inside the shared store, so events emitted by a failed
//! invocation are discarded together with the rest of its effects. Records
//! are sequenced in emission order; mutation events carry before/after
//! values for audit.

use crate::{Address, Amount, CollectionId, ItemKey, ModuleId, OperationId, Owner, RateBps};
use crate::registry::WhitelistTier;
use serde::{Deserialize, Serialize};

/// Every audited transition in the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    // Nested-ownership engine
    ItemRegistered { item: ItemKey, owner: Owner },
    ChildProposed { parent: ItemKey, index: usize, child: ItemKey },
    ChildAccepted { parent: ItemKey, index: usize, child: ItemKey },
    ChildRejected { parent: ItemKey, index: usize, child: ItemKey },
    ChildDetached { parent: ItemKey, index: usize, child: ItemKey },
    OwnerTransferred { item: ItemKey, from: Owner, to: Owner },

    // Authentication registry
    AuthenticRegistered { collection: CollectionId, max_active: u32 },
    AuthenticRemoved { collection: CollectionId },
    WhitelistRegistered { collection: CollectionId, tier: WhitelistTier, base_price: Amount },
    WhitelistRemoved { collection: CollectionId },
    RoyaltyUpdated { recipient: Address, percentage: u8 },

    // Fee engine
    DefaultRateUpdated { old: RateBps, new: RateBps },
    ThresholdUpdated { threshold: u64, old: Option<RateBps>, new: RateBps },
    ThresholdRemoved { threshold: u64, rate: RateBps },
    ScoreRecorded { address: Address, old: Option<u64>, new: u64 },

    // Dispatch router
    RoutesInstalled { module: ModuleId, operations: Vec<OperationId> },
    RoutesRemoved { operations: Vec<OperationId> },
}

/// A sequenced journal record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub event: Event,
}

/// Append-only, in-store event journal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventJournal {
    next_seq: u64,
    records: Vec<EventRecord>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returning its sequence number.
    pub fn emit(&mut self, event: Event) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push(EventRecord { seq, event });
        seq
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with a sequence number at or after `seq`.
    pub fn since(&self, seq: u64) -> &[EventRecord] {
        let start = self.records.partition_point(|r| r.seq < seq);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ItemId};

    fn key(byte: u8, id: u64) -> ItemKey {
        ItemKey::new(Address::repeat(byte), ItemId(id))
    }

    #[test]
    fn emission_sequences_monotonically() {
        let mut journal = EventJournal::new();
        let a = journal.emit(Event::ItemRegistered {
            item: key(1, 1),
            owner: Owner::External(Address::repeat(9)),
        });
        let b = journal.emit(Event::ChildProposed {
            parent: key(1, 1),
            index: 0,
            child: key(2, 1),
        });
        assert_eq!((a, b), (0, 1));
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.records()[1].seq, 1);
    }

    #[test]
    fn since_slices_by_sequence() {
        let mut journal = EventJournal::new();
        for i in 0..5u64 {
            journal.emit(Event::ThresholdRemoved { threshold: i, rate: 100 });
        }
        assert_eq!(journal.since(3).len(), 2);
        assert_eq!(journal.since(0).len(), 5);
        assert!(journal.since(5).is_empty());
    }
}
