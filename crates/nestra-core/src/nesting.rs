//! Nested-ownership state machine.
//!
//! Each parent item carries two insertion-ordered sequences: accepted
//! children and pending (proposed) children. Proposals against an
//! authenticated collection under its active cap transition straight into
//! the accepted sequence; everything else queues as pending until the
//! parent's owner accepts (paying the recorded price, split against the fee
//! schedule) or rejects (full escrow refund).
//!
//! Expiry is a derived, read-time state: an entry whose recorded expiry lies
//! before the caller-supplied current time cannot be accepted but stays
//! physically queued at its position until explicitly accepted (failing) or
//! rejected. Removal from either sequence is positional and order
//! preserving; a swap-and-pop that reorders survivors would break callers
//! that address entries by index.

use crate::events::Event;
use crate::registry::{self, WhitelistTier};
use crate::store::StoreState;
use crate::{
    fees, Address, Amount, CallContext, CollectionId, ItemId, ItemKey, NestraError, Owner,
    RateBps, Result, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A proposed child awaiting acceptance or rejection.
///
/// Entries are immutable once queued; the depositor and any value attached
/// at proposal time are recorded for the eventual payout or refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChildEntry {
    pub child: ItemKey,
    pub price: Amount,
    pub expires_at: Option<Timestamp>,
    pub depositor: Address,
    pub escrow: Amount,
}

/// An accepted child of a parent item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedChildEntry {
    pub child: ItemKey,
}

/// Nesting portion of the shared store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestingState {
    pub(crate) items: BTreeMap<ItemKey, Owner>,
    pub(crate) accepted: BTreeMap<ItemKey, Vec<AcceptedChildEntry>>,
    pub(crate) pending: BTreeMap<ItemKey, Vec<PendingChildEntry>>,
}

/// Outcome of a proposal: direct acceptance (fast path) or queue placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalOutcome {
    Accepted { index: usize },
    Pending { index: usize },
}

/// Settlement of a successful conditional acceptance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceReceipt {
    pub child: ItemKey,
    pub rate_bps: RateBps,
    pub commission: Amount,
    pub payout: Amount,
}

/// Read-time lifecycle bucket of a time-bounded entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleBucket {
    Fresh,
    NearExpiry,
    Expired,
}

/// Register an item with its initial owner. This is the seam the external
/// minting collaborator drives; item keys are never reused.
pub fn register_item(store: &mut StoreState, key: ItemKey, owner: Owner) -> Result<()> {
    if store.nesting.items.contains_key(&key) {
        return Err(NestraError::InvalidParameter(format!(
            "item {key} is already registered"
        )));
    }
    if let Owner::Item(parent) = owner {
        // The parent chain must already resolve, and the new item adds one
        // hop to it.
        let (_, hops) = resolve_root(store, parent)?;
        let max = store.config.max_ownership_depth;
        if hops + 1 >= max {
            return Err(NestraError::OwnershipDepthExceeded { max });
        }
    }
    store.nesting.items.insert(key, owner);
    store.journal.emit(Event::ItemRegistered { item: key, owner });
    Ok(())
}

/// Resolve the external address that transitively owns `key`.
///
/// Traversal is capped at the configured hop bound and fails closed rather
/// than looping on an accidental cycle.
pub fn root_owner_of(store: &StoreState, key: ItemKey) -> Result<Address> {
    resolve_root(store, key).map(|(address, _)| address)
}

fn resolve_root(store: &StoreState, key: ItemKey) -> Result<(Address, usize)> {
    let max = store.config.max_ownership_depth;
    let mut current = key;
    for hops in 0..max {
        match store.nesting.items.get(&current) {
            None => return Err(NestraError::NotFound(format!("item {current}"))),
            Some(Owner::External(address)) => return Ok((*address, hops)),
            Some(Owner::Item(next)) => current = *next,
        }
    }
    Err(NestraError::OwnershipDepthExceeded { max })
}

/// Verify that nesting `child` under `parent` keeps the ownership relation
/// acyclic and within the hop bound; the nested child adds one hop to the
/// parent's chain.
fn ensure_nestable(store: &StoreState, parent: ItemKey, child: ItemKey) -> Result<()> {
    let max = store.config.max_ownership_depth;
    let mut current = parent;
    for hops in 0..max {
        if current == child {
            return Err(NestraError::InvalidParameter(format!(
                "nesting {child} under {parent} would create an ownership cycle"
            )));
        }
        match store.nesting.items.get(&current) {
            None => return Err(NestraError::NotFound(format!("item {current}"))),
            Some(Owner::External(_)) => {
                if hops + 1 >= max {
                    return Err(NestraError::OwnershipDepthExceeded { max });
                }
                return Ok(());
            }
            Some(Owner::Item(next)) => current = *next,
        }
    }
    Err(NestraError::OwnershipDepthExceeded { max })
}

fn accepted_count_for(store: &StoreState, parent: ItemKey, collection: CollectionId) -> usize {
    store
        .nesting
        .accepted
        .get(&parent)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| entry.child.collection == collection)
                .count()
        })
        .unwrap_or(0)
}

/// Propose attaching `(child_collection, child_item)` as a child of
/// `parent`.
///
/// Fails with `NotWhitelisted` when the child collection has no whitelist
/// record, regardless of its authentication state. An authenticated
/// collection under its per-parent active cap takes the fast path straight
/// into the accepted sequence; otherwise the entry queues as pending with
/// the caller recorded as depositor and any attached value as escrow.
pub fn propose(
    store: &mut StoreState,
    call: &CallContext,
    parent: ItemKey,
    child_collection: CollectionId,
    child_item: ItemId,
    price: Amount,
    expires_at: Option<Timestamp>,
) -> Result<ProposalOutcome> {
    if !store.nesting.items.contains_key(&parent) {
        return Err(NestraError::NotFound(format!("item {parent}")));
    }
    let whitelist = registry::whitelist_record(store, child_collection)
        .ok_or(NestraError::NotWhitelisted { collection: child_collection })?;

    let child = ItemKey::new(child_collection, child_item);

    // The binding price comes from the tier: the registry for the fixed
    // tiers, the proposer for the per-item tiers.
    let recorded_price = match whitelist.tier {
        WhitelistTier::DirectFree => 0,
        WhitelistTier::FixedPrice => whitelist.base_price,
        WhitelistTier::PerItemPriced | WhitelistTier::ConditionalExpirable => price,
    };

    let fast_path = registry::authentication_record(store, child_collection)
        .map(|record| {
            record.authenticated
                && accepted_count_for(store, parent, child_collection)
                    < record.max_active as usize
        })
        .unwrap_or(false);

    if fast_path {
        // No split on the fast path; attached value stays with the system.
        check_treasury_headroom(store, call.value)?;
        let index = push_accepted(store, parent, child)?;
        store.ledger.accrue_treasury(call.value)?;
        debug!(%parent, %child, index, "child accepted via fast path");
        store.journal.emit(Event::ChildAccepted { parent, index, child });
        return Ok(ProposalOutcome::Accepted { index });
    }

    let queue = store.nesting.pending.entry(parent).or_default();
    if queue.len() >= store.config.max_pending_per_item {
        return Err(NestraError::InvalidParameter(format!(
            "pending queue for {parent} is full"
        )));
    }
    queue.push(PendingChildEntry {
        child,
        price: recorded_price,
        expires_at,
        depositor: call.caller,
        escrow: call.value,
    });
    let index = queue.len() - 1;
    debug!(%parent, %child, index, price = recorded_price, "child proposed");
    store.journal.emit(Event::ChildProposed { parent, index, child });
    Ok(ProposalOutcome::Pending { index })
}

/// Validate that `child` can enter `parent`'s accepted sequence without
/// mutating anything. Must hold before the enclosing transition performs
/// its first write so that failures leave the store untouched.
fn check_acceptable(store: &StoreState, parent: ItemKey, child: ItemKey) -> Result<()> {
    // Nesting re-points the child's owner when the child is registered
    // here; the chain must stay acyclic and bounded either way.
    if store.nesting.items.contains_key(&child) {
        ensure_nestable(store, parent, child)?;
    }
    let len = store.nesting.accepted.get(&parent).map(Vec::len).unwrap_or(0);
    if len >= store.config.max_accepted_per_item {
        return Err(NestraError::InvalidParameter(format!(
            "accepted sequence for {parent} is full"
        )));
    }
    Ok(())
}

fn check_treasury_headroom(store: &StoreState, amount: Amount) -> Result<()> {
    store
        .ledger
        .treasury()
        .checked_add(amount)
        .map(|_| ())
        .ok_or_else(|| NestraError::InvalidParameter("treasury overflow".into()))
}

fn push_accepted(store: &mut StoreState, parent: ItemKey, child: ItemKey) -> Result<usize> {
    check_acceptable(store, parent, child)?;
    let entries = store.nesting.accepted.entry(parent).or_default();
    entries.push(AcceptedChildEntry { child });
    let index = entries.len() - 1;
    if let Some(owner) = store.nesting.items.get_mut(&child) {
        *owner = Owner::Item(parent);
    }
    Ok(index)
}

/// Fetch and validate the pending entry addressed by `(parent, index)`.
fn expected_pending_entry(
    store: &StoreState,
    parent: ItemKey,
    index: usize,
    expected: ItemKey,
) -> Result<PendingChildEntry> {
    store
        .nesting
        .pending
        .get(&parent)
        .and_then(|queue| queue.get(index))
        .filter(|entry| entry.child == expected)
        .copied()
        .ok_or(NestraError::IndexMismatch { index, expected })
}

/// Accept the pending child at `pending_index`, paying the recorded price.
///
/// The expected child key defends against queue shifts between the caller's
/// read and this write. The attached payment is split once against the
/// caller's effective commission rate: the commission accrues to the
/// treasury and the remainder, plus any recorded escrow, is credited to the
/// depositor. `commission + payout` equals the attached payment exactly.
pub fn accept_child(
    store: &mut StoreState,
    call: &CallContext,
    parent: ItemKey,
    pending_index: usize,
    expected_collection: CollectionId,
    expected_item: ItemId,
) -> Result<AcceptanceReceipt> {
    let root = root_owner_of(store, parent)?;
    if call.caller != root {
        return Err(NestraError::Unauthorized { caller: call.caller });
    }

    let expected = ItemKey::new(expected_collection, expected_item);
    let entry = expected_pending_entry(store, parent, pending_index, expected)?;

    if let Some(expires_at) = entry.expires_at {
        if call.now > expires_at {
            return Err(NestraError::Expired { expires_at, now: call.now });
        }
    }
    if call.value < entry.price {
        return Err(NestraError::Underpriced { paid: call.value, required: entry.price });
    }

    let rate_bps = fees::effective_rate(store, call.caller);
    let (commission, payout) = fees::split_payment(call.value, rate_bps)?;
    let payout_total = payout
        .checked_add(entry.escrow)
        .ok_or_else(|| NestraError::InvalidParameter("payout overflow".into()))?;

    // Validate every remaining failure mode before the first write so a
    // failed acceptance leaves both sequences and the ledger untouched.
    check_acceptable(store, parent, entry.child)?;
    check_treasury_headroom(store, commission)?;
    store
        .ledger
        .balance_of(entry.depositor)
        .checked_add(payout_total)
        .ok_or_else(|| NestraError::InvalidParameter(format!("credit overflow for {}", entry.depositor)))?;

    if let Some(queue) = store.nesting.pending.get_mut(&parent) {
        queue.remove(pending_index);
    }
    let index = push_accepted(store, parent, entry.child)?;
    store.ledger.accrue_treasury(commission)?;
    store.ledger.credit(entry.depositor, payout_total)?;

    debug!(
        %parent,
        child = %entry.child,
        rate_bps,
        commission,
        payout,
        "child accepted"
    );
    store.journal.emit(Event::ChildAccepted { parent, index, child: entry.child });

    Ok(AcceptanceReceipt {
        child: entry.child,
        rate_bps,
        commission,
        payout,
    })
}

/// Reject the pending child at `pending_index`, refunding its escrow in
/// full. Rejection is the only way an expired entry leaves the queue.
pub fn reject_child(
    store: &mut StoreState,
    call: &CallContext,
    parent: ItemKey,
    pending_index: usize,
    expected_collection: CollectionId,
    expected_item: ItemId,
) -> Result<()> {
    let root = root_owner_of(store, parent)?;
    if call.caller != root {
        return Err(NestraError::Unauthorized { caller: call.caller });
    }

    let expected = ItemKey::new(expected_collection, expected_item);
    let entry = expected_pending_entry(store, parent, pending_index, expected)?;

    if let Some(queue) = store.nesting.pending.get_mut(&parent) {
        queue.remove(pending_index);
    }

    store.ledger.credit(entry.depositor, entry.escrow)?;
    debug!(%parent, child = %entry.child, pending_index, "child rejected");
    store.journal.emit(Event::ChildRejected {
        parent,
        index: pending_index,
        child: entry.child,
    });
    Ok(())
}

/// Detach the accepted child at `index` (burn/unnest collaborator seam).
/// The detached child, when registered here, transfers to the caller.
pub fn detach_child(
    store: &mut StoreState,
    call: &CallContext,
    parent: ItemKey,
    index: usize,
    expected_collection: CollectionId,
    expected_item: ItemId,
) -> Result<()> {
    let root = root_owner_of(store, parent)?;
    if call.caller != root {
        return Err(NestraError::Unauthorized { caller: call.caller });
    }

    let expected = ItemKey::new(expected_collection, expected_item);
    let entry = store
        .nesting
        .accepted
        .get(&parent)
        .and_then(|entries| entries.get(index))
        .filter(|entry| entry.child == expected)
        .copied()
        .ok_or(NestraError::IndexMismatch { index, expected })?;

    if let Some(entries) = store.nesting.accepted.get_mut(&parent) {
        entries.remove(index);
    }

    if let Some(owner) = store.nesting.items.get_mut(&entry.child) {
        *owner = Owner::External(call.caller);
    }
    store.journal.emit(Event::ChildDetached { parent, index, child: entry.child });
    Ok(())
}

/// Re-point an item's owner. When the destination is an item, the
/// destination chain must resolve without passing through the transferred
/// item and within the hop bound.
pub fn transfer(
    store: &mut StoreState,
    call: &CallContext,
    item: ItemKey,
    new_owner: Owner,
) -> Result<()> {
    let root = root_owner_of(store, item)?;
    if call.caller != root {
        return Err(NestraError::Unauthorized { caller: call.caller });
    }
    if let Owner::Item(destination) = new_owner {
        ensure_nestable(store, destination, item)?;
    }

    let current = store
        .nesting
        .items
        .get_mut(&item)
        .ok_or_else(|| NestraError::NotFound(format!("item {item}")))?;
    let from = *current;
    *current = new_owner;
    store.journal.emit(Event::OwnerTransferred { item, from, to: new_owner });
    Ok(())
}

/// Accepted children of `parent` in stable insertion order.
pub fn children_of(store: &StoreState, parent: ItemKey) -> &[AcceptedChildEntry] {
    store
        .nesting
        .accepted
        .get(&parent)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Pending children of `parent` in stable insertion order.
pub fn pending_children_of(store: &StoreState, parent: ItemKey) -> &[PendingChildEntry] {
    store
        .nesting
        .pending
        .get(&parent)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Pure lifecycle classification of a recorded expiry against a supplied
/// current time and near-expiry window.
pub fn lifecycle_bucket(
    expires_at: Option<Timestamp>,
    now: Timestamp,
    window_secs: u64,
) -> LifecycleBucket {
    match expires_at {
        None => LifecycleBucket::Fresh,
        Some(expires_at) if now > expires_at => LifecycleBucket::Expired,
        Some(expires_at) if expires_at - now <= window_secs => LifecycleBucket::NearExpiry,
        Some(_) => LifecycleBucket::Fresh,
    }
}

/// Resolve the lifecycle bucket for an item that may be queued as a pending
/// child somewhere. Items with no time-bounded pending entry are `Fresh`.
pub fn descriptor_of(store: &StoreState, child: ItemKey, now: Timestamp) -> LifecycleBucket {
    let entry = store
        .nesting
        .pending
        .values()
        .flatten()
        .find(|entry| entry.child == child);
    match entry {
        Some(entry) => lifecycle_bucket(entry.expires_at, now, store.config.near_expiry_window_secs),
        None => LifecycleBucket::Fresh,
    }
}
