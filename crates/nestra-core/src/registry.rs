//! Authentication and whitelist registry for external child collections.
//!
//! Per-collection records gate the nesting workflow: a whitelist record is
//! required before any proposal, and an authentication record under its
//! active cap unlocks the direct-acceptance fast path. All mutations are
//! restricted to the controller.

use crate::events::Event;
use crate::store::StoreState;
use crate::{Address, Amount, CallContext, CollectionId, NestraError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Authentication record for a child collection.
///
/// Absence of a record is equivalent to `{ authenticated: false, max_active: 0 }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRecord {
    pub authenticated: bool,
    pub max_active: u32,
}

/// Pricing tier of a whitelisted collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhitelistTier {
    /// Children nest for free.
    DirectFree,
    /// Every child costs the recorded base price.
    FixedPrice,
    /// The proposer supplies the price per item at proposal time.
    PerItemPriced,
    /// Per-item priced with an expiry deadline on acceptance.
    ConditionalExpirable,
}

/// Whitelist record for a child collection. Absence means nesting from that
/// collection is rejected outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRecord {
    pub tier: WhitelistTier,
    pub base_price: Amount,
}

/// Royalty terms recorded for the hosting collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaltyRecord {
    pub recipient: Address,
    pub percentage: u8,
}

/// Registry portion of the shared store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    pub(crate) authentic: BTreeMap<CollectionId, AuthenticationRecord>,
    pub(crate) whitelist: BTreeMap<CollectionId, WhitelistRecord>,
    pub(crate) royalty: Option<RoyaltyRecord>,
}

/// Register (or update) the authentication record for a collection.
///
/// `max_active` bounds how many children from this collection a single
/// parent may hold via the fast path; zero is rejected.
pub fn register_authentic(
    store: &mut StoreState,
    call: &CallContext,
    collection: CollectionId,
    max_active: u32,
) -> Result<()> {
    store.require_controller(call.caller)?;
    if max_active == 0 {
        return Err(NestraError::InvalidParameter(
            "max_active must be a positive integer".into(),
        ));
    }
    store.registry.authentic.insert(
        collection,
        AuthenticationRecord {
            authenticated: true,
            max_active,
        },
    );
    debug!(%collection, max_active, "registered authentic collection");
    store.journal.emit(Event::AuthenticRegistered { collection, max_active });
    Ok(())
}

/// Remove a collection's authentication record, resetting it to
/// `{false, 0}`. Removing an absent record is a no-op by design: the reset
/// state is indistinguishable from never-registered.
pub fn remove_authentic(
    store: &mut StoreState,
    call: &CallContext,
    collection: CollectionId,
) -> Result<()> {
    store.require_controller(call.caller)?;
    store.registry.authentic.remove(&collection);
    store.journal.emit(Event::AuthenticRemoved { collection });
    Ok(())
}

/// Register (or update) the whitelist record for a collection.
pub fn register_whitelist(
    store: &mut StoreState,
    call: &CallContext,
    collection: CollectionId,
    tier: WhitelistTier,
    base_price: Amount,
) -> Result<()> {
    store.require_controller(call.caller)?;
    store
        .registry
        .whitelist
        .insert(collection, WhitelistRecord { tier, base_price });
    debug!(%collection, ?tier, base_price, "registered whitelist record");
    store.journal.emit(Event::WhitelistRegistered { collection, tier, base_price });
    Ok(())
}

/// Remove a collection's whitelist record. Fails with `NotFound` when no
/// record exists.
pub fn remove_whitelist(
    store: &mut StoreState,
    call: &CallContext,
    collection: CollectionId,
) -> Result<()> {
    store.require_controller(call.caller)?;
    if store.registry.whitelist.remove(&collection).is_none() {
        return Err(NestraError::NotFound(format!(
            "whitelist record for {collection}"
        )));
    }
    store.journal.emit(Event::WhitelistRemoved { collection });
    Ok(())
}

pub fn is_whitelisted(store: &StoreState, collection: CollectionId) -> bool {
    store.registry.whitelist.contains_key(&collection)
}

pub fn is_authenticated(store: &StoreState, collection: CollectionId) -> bool {
    store
        .registry
        .authentic
        .get(&collection)
        .map(|record| record.authenticated)
        .unwrap_or(false)
}

pub(crate) fn authentication_record(
    store: &StoreState,
    collection: CollectionId,
) -> Option<AuthenticationRecord> {
    store.registry.authentic.get(&collection).copied()
}

pub(crate) fn whitelist_record(
    store: &StoreState,
    collection: CollectionId,
) -> Option<WhitelistRecord> {
    store.registry.whitelist.get(&collection).copied()
}

/// Reference price for nesting an item of `collection`.
///
/// `DirectFree` is always zero and `FixedPrice` is the base price regardless
/// of the item ordinal. For the per-item tiers the registry only validates
/// whitelisting; the returned base price is a reference floor and the
/// binding price is supplied by the proposer at proposal time.
pub fn price_for(
    store: &StoreState,
    collection: CollectionId,
    _item_ordinal: u64,
) -> Result<Amount> {
    let record = whitelist_record(store, collection)
        .ok_or(NestraError::NotWhitelisted { collection })?;
    let price = match record.tier {
        WhitelistTier::DirectFree => 0,
        WhitelistTier::FixedPrice
        | WhitelistTier::PerItemPriced
        | WhitelistTier::ConditionalExpirable => record.base_price,
    };
    Ok(price)
}

/// Update the royalty record for the hosting collection.
pub fn set_royalty(
    store: &mut StoreState,
    call: &CallContext,
    recipient: Address,
    percentage: u8,
) -> Result<()> {
    store.require_controller(call.caller)?;
    if percentage > 100 {
        return Err(NestraError::InvalidParameter(format!(
            "royalty percentage {percentage} exceeds 100"
        )));
    }
    store.registry.royalty = Some(RoyaltyRecord { recipient, percentage });
    store.journal.emit(Event::RoyaltyUpdated { recipient, percentage });
    Ok(())
}

pub fn royalty(store: &StoreState) -> Option<RoyaltyRecord> {
    store.registry.royalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NestraConfig;

    const CONTROLLER: Address = Address::repeat(0xc0);
    const OUTSIDER: Address = Address::repeat(0x0f);
    const GALLERY: Address = Address::repeat(0x11);

    fn store() -> StoreState {
        StoreState::new(CONTROLLER, NestraConfig::default())
    }

    fn owner_call() -> CallContext {
        CallContext::new(CONTROLLER, 0, 0)
    }

    #[test]
    fn register_authentic_requires_positive_cap() {
        let mut store = store();
        let err = register_authentic(&mut store, &owner_call(), GALLERY, 0).unwrap_err();
        assert!(matches!(err, NestraError::InvalidParameter(_)));
        assert!(!is_authenticated(&store, GALLERY));
    }

    #[test]
    fn mutations_are_controller_only() {
        let mut store = store();
        let call = CallContext::new(OUTSIDER, 0, 0);
        assert_eq!(
            register_authentic(&mut store, &call, GALLERY, 1),
            Err(NestraError::Unauthorized { caller: OUTSIDER })
        );
        assert_eq!(
            register_whitelist(&mut store, &call, GALLERY, WhitelistTier::DirectFree, 0),
            Err(NestraError::Unauthorized { caller: OUTSIDER })
        );
        assert_eq!(
            remove_whitelist(&mut store, &call, GALLERY),
            Err(NestraError::Unauthorized { caller: OUTSIDER })
        );
    }

    #[test]
    fn remove_whitelist_missing_record_is_not_found() {
        let mut store = store();
        let err = remove_whitelist(&mut store, &owner_call(), GALLERY).unwrap_err();
        assert!(matches!(err, NestraError::NotFound(_)));
    }

    #[test]
    fn whitelist_roundtrip_flips_predicate() {
        let mut store = store();
        register_whitelist(
            &mut store,
            &owner_call(),
            GALLERY,
            WhitelistTier::FixedPrice,
            42,
        )
        .unwrap();
        assert!(is_whitelisted(&store, GALLERY));
        remove_whitelist(&mut store, &owner_call(), GALLERY).unwrap();
        assert!(!is_whitelisted(&store, GALLERY));
    }

    #[test]
    fn removing_authentication_resets_record() {
        let mut store = store();
        register_authentic(&mut store, &owner_call(), GALLERY, 3).unwrap();
        assert!(is_authenticated(&store, GALLERY));
        remove_authentic(&mut store, &owner_call(), GALLERY).unwrap();
        assert!(!is_authenticated(&store, GALLERY));
        assert_eq!(authentication_record(&store, GALLERY), None);
    }

    #[test]
    fn price_for_follows_tier() {
        let mut store = store();
        let call = owner_call();
        register_whitelist(&mut store, &call, GALLERY, WhitelistTier::DirectFree, 999).unwrap();
        assert_eq!(price_for(&store, GALLERY, 7).unwrap(), 0);

        register_whitelist(&mut store, &call, GALLERY, WhitelistTier::FixedPrice, 999).unwrap();
        assert_eq!(price_for(&store, GALLERY, 1).unwrap(), 999);
        assert_eq!(price_for(&store, GALLERY, 12_345).unwrap(), 999);

        let unknown = Address::repeat(0x99);
        assert_eq!(
            price_for(&store, unknown, 1),
            Err(NestraError::NotWhitelisted { collection: unknown })
        );
    }

    #[test]
    fn royalty_record_updates() {
        let mut store = store();
        assert_eq!(royalty(&store).unwrap().percentage, 2);
        set_royalty(&mut store, &owner_call(), OUTSIDER, 5).unwrap();
        let record = royalty(&store).unwrap();
        assert_eq!(record.recipient, OUTSIDER);
        assert_eq!(record.percentage, 5);
        let err = set_royalty(&mut store, &owner_call(), OUTSIDER, 101).unwrap_err();
        assert!(matches!(err, NestraError::InvalidParameter(_)));
    }
}
