//! Reputation-tiered commission schedule.
//!
//! An ordered set of score thresholds maps to commission rates; the rate for
//! a payer is the rate of the greatest threshold at or below the payer's
//! recorded score, falling back to the default rate. Thresholds and scores
//! are mutable at any time and lookups always reflect the current table.

use crate::events::Event;
use crate::store::StoreState;
use crate::{Address, Amount, CallContext, NestraError, RateBps, Result, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Fee portion of the shared store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    pub(crate) default_rate_bps: RateBps,
    pub(crate) thresholds: BTreeMap<u64, RateBps>,
    pub(crate) scores: BTreeMap<Address, u64>,
}

impl FeeState {
    pub(crate) fn new(default_rate_bps: RateBps) -> Self {
        Self {
            default_rate_bps,
            thresholds: BTreeMap::new(),
            scores: BTreeMap::new(),
        }
    }
}

fn check_rate(rate_bps: RateBps) -> Result<()> {
    if u128::from(rate_bps) > BPS_DENOMINATOR {
        return Err(NestraError::InvalidParameter(format!(
            "rate {rate_bps} bps exceeds denominator {BPS_DENOMINATOR}"
        )));
    }
    Ok(())
}

/// Install or update the rate for a score threshold.
pub fn update_level_setting(
    store: &mut StoreState,
    call: &CallContext,
    threshold: u64,
    rate_bps: RateBps,
) -> Result<()> {
    store.require_controller(call.caller)?;
    check_rate(rate_bps)?;
    let old = store.fees.thresholds.insert(threshold, rate_bps);
    debug!(threshold, rate_bps, "updated threshold setting");
    store.journal.emit(Event::ThresholdUpdated { threshold, old, new: rate_bps });
    Ok(())
}

/// Remove a score threshold. Fails with `NotFound` when absent.
pub fn remove_level_setting(
    store: &mut StoreState,
    call: &CallContext,
    threshold: u64,
) -> Result<()> {
    store.require_controller(call.caller)?;
    let rate = store
        .fees
        .thresholds
        .remove(&threshold)
        .ok_or_else(|| NestraError::NotFound(format!("threshold setting {threshold}")))?;
    store.journal.emit(Event::ThresholdRemoved { threshold, rate });
    Ok(())
}

/// Update the default commission rate applied when no threshold qualifies.
pub fn update_default_rate(
    store: &mut StoreState,
    call: &CallContext,
    rate_bps: RateBps,
) -> Result<()> {
    store.require_controller(call.caller)?;
    check_rate(rate_bps)?;
    let old = store.fees.default_rate_bps;
    store.fees.default_rate_bps = rate_bps;
    debug!(old, new = rate_bps, "updated default rate");
    store.journal.emit(Event::DefaultRateUpdated { old, new: rate_bps });
    Ok(())
}

/// Record an address's reputation score, replacing any previous value.
pub fn record(
    store: &mut StoreState,
    call: &CallContext,
    address: Address,
    score: u64,
) -> Result<()> {
    store.require_controller(call.caller)?;
    let old = store.fees.scores.insert(address, score);
    store.journal.emit(Event::ScoreRecorded { address, old, new: score });
    Ok(())
}

pub fn score_of(store: &StoreState, address: Address) -> u64 {
    store.fees.scores.get(&address).copied().unwrap_or(0)
}

pub fn default_rate(store: &StoreState) -> RateBps {
    store.fees.default_rate_bps
}

/// Resolve the commission rate for `address`: the rate of the greatest
/// stored threshold at or below the address's score, or the default rate if
/// none qualifies.
pub fn effective_rate(store: &StoreState, address: Address) -> RateBps {
    let score = score_of(store, address);
    store
        .fees
        .thresholds
        .range(..=score)
        .next_back()
        .map(|(_, rate)| *rate)
        .unwrap_or(store.fees.default_rate_bps)
}

/// Split `amount` into `(commission, payout)` at `rate_bps`.
///
/// The commission is one truncating integer division of
/// `amount * rate_bps / 10_000`; the payout is the exact remainder, so
/// `commission + payout == amount` always holds.
pub fn split_payment(amount: Amount, rate_bps: RateBps) -> Result<(Amount, Amount)> {
    check_rate(rate_bps)?;
    let commission = amount
        .checked_mul(u128::from(rate_bps))
        .ok_or_else(|| NestraError::InvalidParameter(format!("amount {amount} overflows split")))?
        / BPS_DENOMINATOR;
    Ok((commission, amount - commission))
}
