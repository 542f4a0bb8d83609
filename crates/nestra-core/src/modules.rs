//! Installable modules and the typed operation envelope they serve.
//!
//! Every boundary operation has a canonical signature string from which its
//! 4-byte selector derives, a [`Request`] variant the router forwards
//! unmodified, and a [`Response`] variant. The three standard modules are
//! thin adapters from the envelope onto the engine functions; all state
//! lives in the shared store, none in the modules themselves.

use crate::nesting::{
    self, AcceptanceReceipt, AcceptedChildEntry, LifecycleBucket, PendingChildEntry,
    ProposalOutcome,
};
use crate::registry::{self, RoyaltyRecord, WhitelistTier};
use crate::router::Module;
use crate::store::StoreState;
use crate::{
    fees, Address, Amount, CallContext, CollectionId, ItemId, ItemKey, ModuleId, NestraError,
    OperationId, Owner, RateBps, Result, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Canonical operation signatures.
pub mod ops {
    // Authentication registry
    pub const REGISTER_AUTHENTIC: &str = "registerAuthentic(address,uint32)";
    pub const REMOVE_AUTHENTIC: &str = "removeAuthentic(address)";
    pub const REGISTER_WHITELIST: &str = "registerWhitelist(address,uint8,uint128)";
    pub const REMOVE_WHITELIST: &str = "removeWhitelist(address)";
    pub const IS_WHITELISTED: &str = "isWhitelisted(address)";
    pub const IS_AUTHENTICATED: &str = "isAuthenticated(address)";
    pub const PRICE_FOR: &str = "priceFor(address,uint64)";
    pub const SET_ROYALTY: &str = "setRoyalty(address,uint8)";
    pub const ROYALTY_INFO: &str = "royaltyInfo()";

    // Fee engine
    pub const UPDATE_LEVEL_SETTING: &str = "updateLevelSetting(uint64,uint16)";
    pub const REMOVE_LEVEL_SETTING: &str = "removeLevelSetting(uint64)";
    pub const UPDATE_DEFAULT_RATE: &str = "updateDefaultRate(uint16)";
    pub const RECORD_SCORE: &str = "recordScore(address,uint64)";
    pub const EFFECTIVE_RATE: &str = "effectiveRate(address)";

    // Nested-ownership engine
    pub const REGISTER_ITEM: &str = "registerItem(address,uint64,owner)";
    pub const PROPOSE_CHILD: &str = "proposeChild(address,uint64,address,uint64,uint128,uint64)";
    pub const ACCEPT_CHILD: &str = "acceptChild(address,uint64,uint64,address,uint64)";
    pub const REJECT_CHILD: &str = "rejectChild(address,uint64,uint64,address,uint64)";
    pub const DETACH_CHILD: &str = "detachChild(address,uint64,uint64,address,uint64)";
    pub const TRANSFER_ITEM: &str = "transferItem(address,uint64,owner)";
    pub const CHILDREN_OF: &str = "childrenOf(address,uint64)";
    pub const PENDING_CHILDREN_OF: &str = "pendingChildrenOf(address,uint64)";
    pub const DESCRIPTOR_OF: &str = "descriptorOf(address,uint64)";
    pub const ROOT_OWNER_OF: &str = "rootOwnerOf(address,uint64)";
}

/// A boundary operation, forwarded by the router to the owning module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    // Authentication registry
    RegisterAuthentic { collection: CollectionId, max_active: u32 },
    RemoveAuthentic { collection: CollectionId },
    RegisterWhitelist { collection: CollectionId, tier: WhitelistTier, base_price: Amount },
    RemoveWhitelist { collection: CollectionId },
    IsWhitelisted { collection: CollectionId },
    IsAuthenticated { collection: CollectionId },
    PriceFor { collection: CollectionId, item_ordinal: u64 },
    SetRoyalty { recipient: Address, percentage: u8 },
    RoyaltyInfo,

    // Fee engine
    UpdateLevelSetting { threshold: u64, rate_bps: RateBps },
    RemoveLevelSetting { threshold: u64 },
    UpdateDefaultRate { rate_bps: RateBps },
    RecordScore { address: Address, score: u64 },
    EffectiveRate { address: Address },

    // Nested-ownership engine
    RegisterItem { item: ItemKey, owner: Owner },
    ProposeChild {
        parent: ItemKey,
        child_collection: CollectionId,
        child_item: ItemId,
        price: Amount,
        expires_at: Option<Timestamp>,
    },
    AcceptChild {
        parent: ItemKey,
        pending_index: usize,
        expected_collection: CollectionId,
        expected_item: ItemId,
    },
    RejectChild {
        parent: ItemKey,
        pending_index: usize,
        expected_collection: CollectionId,
        expected_item: ItemId,
    },
    DetachChild {
        parent: ItemKey,
        index: usize,
        expected_collection: CollectionId,
        expected_item: ItemId,
    },
    TransferItem { item: ItemKey, new_owner: Owner },
    ChildrenOf { parent: ItemKey },
    PendingChildrenOf { parent: ItemKey },
    DescriptorOf { item: ItemKey },
    RootOwnerOf { item: ItemKey },
}

impl Request {
    /// The selector this request dispatches on.
    pub fn operation_id(&self) -> OperationId {
        let signature = match self {
            Request::RegisterAuthentic { .. } => ops::REGISTER_AUTHENTIC,
            Request::RemoveAuthentic { .. } => ops::REMOVE_AUTHENTIC,
            Request::RegisterWhitelist { .. } => ops::REGISTER_WHITELIST,
            Request::RemoveWhitelist { .. } => ops::REMOVE_WHITELIST,
            Request::IsWhitelisted { .. } => ops::IS_WHITELISTED,
            Request::IsAuthenticated { .. } => ops::IS_AUTHENTICATED,
            Request::PriceFor { .. } => ops::PRICE_FOR,
            Request::SetRoyalty { .. } => ops::SET_ROYALTY,
            Request::RoyaltyInfo => ops::ROYALTY_INFO,
            Request::UpdateLevelSetting { .. } => ops::UPDATE_LEVEL_SETTING,
            Request::RemoveLevelSetting { .. } => ops::REMOVE_LEVEL_SETTING,
            Request::UpdateDefaultRate { .. } => ops::UPDATE_DEFAULT_RATE,
            Request::RecordScore { .. } => ops::RECORD_SCORE,
            Request::EffectiveRate { .. } => ops::EFFECTIVE_RATE,
            Request::RegisterItem { .. } => ops::REGISTER_ITEM,
            Request::ProposeChild { .. } => ops::PROPOSE_CHILD,
            Request::AcceptChild { .. } => ops::ACCEPT_CHILD,
            Request::RejectChild { .. } => ops::REJECT_CHILD,
            Request::DetachChild { .. } => ops::DETACH_CHILD,
            Request::TransferItem { .. } => ops::TRANSFER_ITEM,
            Request::ChildrenOf { .. } => ops::CHILDREN_OF,
            Request::PendingChildrenOf { .. } => ops::PENDING_CHILDREN_OF,
            Request::DescriptorOf { .. } => ops::DESCRIPTOR_OF,
            Request::RootOwnerOf { .. } => ops::ROOT_OWNER_OF,
        };
        OperationId::from_signature(signature)
    }
}

/// Result payload of a dispatched operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Unit,
    Bool(bool),
    Amount(Amount),
    Rate(RateBps),
    Proposal(ProposalOutcome),
    Acceptance(AcceptanceReceipt),
    Children(Vec<AcceptedChildEntry>),
    PendingChildren(Vec<PendingChildEntry>),
    Bucket(LifecycleBucket),
    RootOwner(Address),
    Royalty(Option<RoyaltyRecord>),
}

fn unsupported(module: &'static str, op: OperationId) -> NestraError {
    NestraError::NotFound(format!("operation {op} not implemented by {module}"))
}

/// Authentication/whitelist registry facade.
pub struct RegistryModule;

impl Module for RegistryModule {
    fn module_id(&self) -> ModuleId {
        ModuleId::from_name("registry-v1")
    }

    fn name(&self) -> &'static str {
        "registry-v1"
    }

    fn operations(&self) -> Vec<OperationId> {
        [
            ops::REGISTER_AUTHENTIC,
            ops::REMOVE_AUTHENTIC,
            ops::REGISTER_WHITELIST,
            ops::REMOVE_WHITELIST,
            ops::IS_WHITELISTED,
            ops::IS_AUTHENTICATED,
            ops::PRICE_FOR,
            ops::SET_ROYALTY,
            ops::ROYALTY_INFO,
        ]
        .iter()
        .map(|signature| OperationId::from_signature(signature))
        .collect()
    }

    fn invoke(
        &self,
        request: &Request,
        call: &CallContext,
        store: &mut StoreState,
    ) -> Result<Response> {
        match request {
            Request::RegisterAuthentic { collection, max_active } => {
                registry::register_authentic(store, call, *collection, *max_active)
                    .map(|_| Response::Unit)
            }
            Request::RemoveAuthentic { collection } => {
                registry::remove_authentic(store, call, *collection).map(|_| Response::Unit)
            }
            Request::RegisterWhitelist { collection, tier, base_price } => {
                registry::register_whitelist(store, call, *collection, *tier, *base_price)
                    .map(|_| Response::Unit)
            }
            Request::RemoveWhitelist { collection } => {
                registry::remove_whitelist(store, call, *collection).map(|_| Response::Unit)
            }
            Request::IsWhitelisted { collection } => {
                Ok(Response::Bool(registry::is_whitelisted(store, *collection)))
            }
            Request::IsAuthenticated { collection } => {
                Ok(Response::Bool(registry::is_authenticated(store, *collection)))
            }
            Request::PriceFor { collection, item_ordinal } => {
                registry::price_for(store, *collection, *item_ordinal).map(Response::Amount)
            }
            Request::SetRoyalty { recipient, percentage } => {
                registry::set_royalty(store, call, *recipient, *percentage)
                    .map(|_| Response::Unit)
            }
            Request::RoyaltyInfo => Ok(Response::Royalty(registry::royalty(store))),
            other => Err(unsupported(self.name(), other.operation_id())),
        }
    }
}

/// Threshold table and reputation ledger facade.
pub struct FeeModule;

impl Module for FeeModule {
    fn module_id(&self) -> ModuleId {
        ModuleId::from_name("fees-v1")
    }

    fn name(&self) -> &'static str {
        "fees-v1"
    }

    fn operations(&self) -> Vec<OperationId> {
        [
            ops::UPDATE_LEVEL_SETTING,
            ops::REMOVE_LEVEL_SETTING,
            ops::UPDATE_DEFAULT_RATE,
            ops::RECORD_SCORE,
            ops::EFFECTIVE_RATE,
        ]
        .iter()
        .map(|signature| OperationId::from_signature(signature))
        .collect()
    }

    fn invoke(
        &self,
        request: &Request,
        call: &CallContext,
        store: &mut StoreState,
    ) -> Result<Response> {
        match request {
            Request::UpdateLevelSetting { threshold, rate_bps } => {
                fees::update_level_setting(store, call, *threshold, *rate_bps)
                    .map(|_| Response::Unit)
            }
            Request::RemoveLevelSetting { threshold } => {
                fees::remove_level_setting(store, call, *threshold).map(|_| Response::Unit)
            }
            Request::UpdateDefaultRate { rate_bps } => {
                fees::update_default_rate(store, call, *rate_bps).map(|_| Response::Unit)
            }
            Request::RecordScore { address, score } => {
                fees::record(store, call, *address, *score).map(|_| Response::Unit)
            }
            Request::EffectiveRate { address } => {
                Ok(Response::Rate(fees::effective_rate(store, *address)))
            }
            other => Err(unsupported(self.name(), other.operation_id())),
        }
    }
}

/// Nested-ownership engine facade.
pub struct NestingModule;

impl Module for NestingModule {
    fn module_id(&self) -> ModuleId {
        ModuleId::from_name("nesting-v1")
    }

    fn name(&self) -> &'static str {
        "nesting-v1"
    }

    fn operations(&self) -> Vec<OperationId> {
        [
            ops::REGISTER_ITEM,
            ops::PROPOSE_CHILD,
            ops::ACCEPT_CHILD,
            ops::REJECT_CHILD,
            ops::DETACH_CHILD,
            ops::TRANSFER_ITEM,
            ops::CHILDREN_OF,
            ops::PENDING_CHILDREN_OF,
            ops::DESCRIPTOR_OF,
            ops::ROOT_OWNER_OF,
        ]
        .iter()
        .map(|signature| OperationId::from_signature(signature))
        .collect()
    }

    fn invoke(
        &self,
        request: &Request,
        call: &CallContext,
        store: &mut StoreState,
    ) -> Result<Response> {
        match request {
            Request::RegisterItem { item, owner } => {
                nesting::register_item(store, *item, *owner).map(|_| Response::Unit)
            }
            Request::ProposeChild {
                parent,
                child_collection,
                child_item,
                price,
                expires_at,
            } => nesting::propose(
                store,
                call,
                *parent,
                *child_collection,
                *child_item,
                *price,
                *expires_at,
            )
            .map(Response::Proposal),
            Request::AcceptChild {
                parent,
                pending_index,
                expected_collection,
                expected_item,
            } => nesting::accept_child(
                store,
                call,
                *parent,
                *pending_index,
                *expected_collection,
                *expected_item,
            )
            .map(Response::Acceptance),
            Request::RejectChild {
                parent,
                pending_index,
                expected_collection,
                expected_item,
            } => nesting::reject_child(
                store,
                call,
                *parent,
                *pending_index,
                *expected_collection,
                *expected_item,
            )
            .map(|_| Response::Unit),
            Request::DetachChild {
                parent,
                index,
                expected_collection,
                expected_item,
            } => nesting::detach_child(
                store,
                call,
                *parent,
                *index,
                *expected_collection,
                *expected_item,
            )
            .map(|_| Response::Unit),
            Request::TransferItem { item, new_owner } => {
                nesting::transfer(store, call, *item, *new_owner).map(|_| Response::Unit)
            }
            Request::ChildrenOf { parent } => Ok(Response::Children(
                nesting::children_of(store, *parent).to_vec(),
            )),
            Request::PendingChildrenOf { parent } => Ok(Response::PendingChildren(
                nesting::pending_children_of(store, *parent).to_vec(),
            )),
            Request::DescriptorOf { item } => Ok(Response::Bucket(nesting::descriptor_of(
                store, *item, call.now,
            ))),
            Request::RootOwnerOf { item } => {
                nesting::root_owner_of(store, *item).map(Response::RootOwner)
            }
            other => Err(unsupported(self.name(), other.operation_id())),
        }
    }
}
