//! Core library for the NESTRA composable nested-asset registry.
//!
//! Three coupled subsystems share one persistent store:
//!
//! - [`router::DispatchRouter`]: maps operation identifiers to hot-swappable
//!   modules and executes every invocation atomically against the store.
//! - [`nesting`]: the nested-ownership state machine with proposed vs.
//!   accepted child items per parent, bounded ownership-chain resolution,
//!   and time-bounded conditional acceptance with payment splitting.
//! - [`fees`]: the reputation-tiered commission schedule consulted at
//!   acceptance time.
//!
//! The execution model is strictly single-threaded and transactional: one
//! invocation at a time mutates the store, and any failure reverts all of the
//! invocation's state changes and value movements. Time never comes from a
//! wall clock inside the core; callers supply it via [`CallContext`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod config;
pub mod events;
pub mod fees;
pub mod hash;
pub mod metrics;
pub mod modules;
pub mod nesting;
pub mod registry;
pub mod router;
pub mod store;

pub use config::NestraConfig;
pub use events::{Event, EventJournal, EventRecord};
pub use nesting::{AcceptanceReceipt, AcceptedChildEntry, LifecycleBucket, PendingChildEntry, ProposalOutcome};
pub use registry::{AuthenticationRecord, RoyaltyRecord, WhitelistRecord, WhitelistTier};
pub use router::{DispatchRouter, Module};
pub use store::StoreState;

/// Smallest-unit currency amount (wei-scale).
pub type Amount = u128;

/// Commission rate in basis points.
pub type RateBps = u16;

/// Seconds since epoch, always supplied by the caller.
pub type Timestamp = u64;

/// Denominator for basis-point rate arithmetic.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Hard upper bound on the configurable ownership-chain traversal depth.
pub const MAX_OWNERSHIP_DEPTH: usize = 64;

/// 20-byte account/collection address newtype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Deterministic test/bootstrap address with every byte set to `byte`.
    pub const fn repeat(byte: u8) -> Self {
        Address([byte; 20])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Collections are identified by their deployed address.
pub type CollectionId = Address;

/// Item identifier, unique within a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique item key: (collection address, item identifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub collection: CollectionId,
    pub item: ItemId,
}

impl ItemKey {
    pub const fn new(collection: CollectionId, item: ItemId) -> Self {
        Self { collection, item }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.collection, self.item)
    }
}

/// An item is owned either by an external party or by another item.
///
/// Invariant: following `Owner::Item` edges terminates at an
/// `Owner::External` address within the configured hop bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    External(Address),
    Item(ItemKey),
}

/// 32-byte commitment/id newtype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 4-byte dispatch selector derived from an operation signature string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub [u8; 4]);

impl OperationId {
    /// Derive the selector for a canonical operation signature such as
    /// `"acceptChild(item,uint64,address,uint64)"`.
    pub fn from_signature(signature: &str) -> Self {
        let digest = hash::sha256_domain(hash::OPERATION_ID_DOMAIN_V1, signature.as_bytes());
        OperationId([digest.0[0], digest.0[1], digest.0[2], digest.0[3]])
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Stable identifier for an installed module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub Hash32);

impl ModuleId {
    pub fn from_name(name: &str) -> Self {
        ModuleId(hash::sha256_domain(hash::MODULE_ID_DOMAIN_V1, name.as_bytes()))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell modules apart in logs.
        write!(f, "{}", &hex::encode(self.0 .0)[..16])
    }
}

/// Per-invocation call context: caller identity, attached value, and the
/// externally supplied current time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub value: Amount,
    pub now: Timestamp,
}

impl CallContext {
    pub const fn new(caller: Address, value: Amount, now: Timestamp) -> Self {
        Self { caller, value, now }
    }
}

/// Unified error taxonomy. Every failure aborts the enclosing invocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NestraError {
    #[error("unauthorized: caller {caller} lacks the required role")]
    Unauthorized { caller: Address },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("collection {collection} is not whitelisted")]
    NotWhitelisted { collection: CollectionId },

    #[error("under priced: paid {paid} < required {required}")]
    Underpriced { paid: Amount, required: Amount },

    #[error("entry expired at {expires_at}, current time {now}")]
    Expired { expires_at: Timestamp, now: Timestamp },

    #[error("pending index {index} does not match expected child {expected}")]
    IndexMismatch { index: usize, expected: ItemKey },

    #[error("duplicate route: operation {operation} already owned by module {module}")]
    DuplicateRoute {
        operation: OperationId,
        module: ModuleId,
    },

    #[error("ownership chain exceeds {max} hops")]
    OwnershipDepthExceeded { max: usize },
}

pub type Result<T> = std::result::Result<T, NestraError>;
