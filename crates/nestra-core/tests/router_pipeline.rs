//! End-to-end tests driving every subsystem through the dispatch router.
//!
//! The scenario follows the lifecycle of one parent item: fast-path
//! acceptance from an authenticated collection, pending placement past the
//! cap, conditional acceptance of expirable children with commission
//! splitting, and live reconfiguration of the fee schedule between
//! acceptances.

use nestra_core::modules::{Request, Response};
use nestra_core::{
    Address, Amount, DispatchRouter, Event, ItemId, ItemKey, LifecycleBucket, NestraConfig,
    NestraError, Owner, ProposalOutcome, Timestamp, WhitelistTier,
};

const CONTROLLER: Address = Address::repeat(0xc0);
const HOLDER: Address = Address::repeat(0x01);
const DEPOSITOR: Address = Address::repeat(0x02);

const MAIN: Address = Address::repeat(0xaa);
const GALLERY: Address = Address::repeat(0x11);
const CONCERT: Address = Address::repeat(0x12);
const BUTCHERY: Address = Address::repeat(0x22);

const DAY: u64 = 24 * 60 * 60;
const TENTH: Amount = 100_000_000_000_000_000; // 0.1 units

fn parent() -> ItemKey {
    ItemKey::new(MAIN, ItemId(1))
}

fn setup() -> DispatchRouter {
    let mut router = DispatchRouter::bootstrap(CONTROLLER, NestraConfig::default()).unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterItem {
                item: parent(),
                owner: Owner::External(HOLDER),
            },
        )
        .unwrap();
    router
}

fn propose_expirable(
    router: &mut DispatchRouter,
    item: u64,
    price: Amount,
    now: Timestamp,
    expires_at: Timestamp,
) -> usize {
    let response = router
        .dispatch(
            DEPOSITOR,
            0,
            now,
            &Request::ProposeChild {
                parent: parent(),
                child_collection: BUTCHERY,
                child_item: ItemId(item),
                price,
                expires_at: Some(expires_at),
            },
        )
        .unwrap();
    match response {
        Response::Proposal(ProposalOutcome::Pending { index }) => index,
        other => panic!("expected pending placement, got {other:?}"),
    }
}

fn accept(
    router: &mut DispatchRouter,
    item: u64,
    index: usize,
    paid: Amount,
    now: Timestamp,
) -> nestra_core::AcceptanceReceipt {
    let response = router
        .dispatch(
            HOLDER,
            paid,
            now,
            &Request::AcceptChild {
                parent: parent(),
                pending_index: index,
                expected_collection: BUTCHERY,
                expected_item: ItemId(item),
            },
        )
        .unwrap();
    match response {
        Response::Acceptance(receipt) => receipt,
        other => panic!("expected acceptance receipt, got {other:?}"),
    }
}

#[test]
fn authenticated_collection_fast_paths_then_queues() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: GALLERY,
                tier: WhitelistTier::FixedPrice,
                base_price: 0,
            },
        )
        .unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterAuthentic { collection: GALLERY, max_active: 1 },
        )
        .unwrap();

    // Under the cap: straight into the accepted sequence.
    let response = router
        .dispatch(
            DEPOSITOR,
            0,
            0,
            &Request::ProposeChild {
                parent: parent(),
                child_collection: GALLERY,
                child_item: ItemId(1),
                price: 0,
                expires_at: None,
            },
        )
        .unwrap();
    assert_eq!(response, Response::Proposal(ProposalOutcome::Accepted { index: 0 }));

    let children = router.dispatch(HOLDER, 0, 0, &Request::ChildrenOf { parent: parent() });
    match children.unwrap() {
        Response::Children(entries) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].child, ItemKey::new(GALLERY, ItemId(1)));
        }
        other => panic!("unexpected response {other:?}"),
    }

    // At the cap: the next proposal queues.
    let response = router
        .dispatch(
            DEPOSITOR,
            0,
            0,
            &Request::ProposeChild {
                parent: parent(),
                child_collection: GALLERY,
                child_item: ItemId(2),
                price: 0,
                expires_at: None,
            },
        )
        .unwrap();
    assert_eq!(response, Response::Proposal(ProposalOutcome::Pending { index: 0 }));
}

#[test]
fn unwhitelisted_collection_is_rejected_outright() {
    let mut router = setup();
    let err = router
        .dispatch(
            DEPOSITOR,
            0,
            0,
            &Request::ProposeChild {
                parent: parent(),
                child_collection: CONCERT,
                child_item: ItemId(1),
                price: 0,
                expires_at: None,
            },
        )
        .unwrap_err();
    assert_eq!(err, NestraError::NotWhitelisted { collection: CONCERT });

    // Whitelisting alone (still unauthenticated) sends proposals to pending.
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: CONCERT,
                tier: WhitelistTier::FixedPrice,
                base_price: 0,
            },
        )
        .unwrap();
    let response = router
        .dispatch(
            DEPOSITOR,
            0,
            0,
            &Request::ProposeChild {
                parent: parent(),
                child_collection: CONCERT,
                child_item: ItemId(1),
                price: 0,
                expires_at: None,
            },
        )
        .unwrap();
    assert_eq!(response, Response::Proposal(ProposalOutcome::Pending { index: 0 }));
}

#[test]
fn expirable_child_lifecycle_with_commission_split() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: BUTCHERY,
                tier: WhitelistTier::ConditionalExpirable,
                base_price: 0,
            },
        )
        .unwrap();

    let start: Timestamp = 1_000;
    let expiry = start + 90 * DAY;
    let index = propose_expirable(&mut router, 1, TENTH, start, expiry);
    assert_eq!(index, 0);

    // Under-priced acceptance reverts the whole invocation.
    let journal_len = router.store().journal.len();
    let err = router
        .dispatch(
            HOLDER,
            TENTH - TENTH / 10,
            start,
            &Request::AcceptChild {
                parent: parent(),
                pending_index: 0,
                expected_collection: BUTCHERY,
                expected_item: ItemId(1),
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        NestraError::Underpriced { paid: TENTH - TENTH / 10, required: TENTH }
    );
    assert_eq!(router.store().journal.len(), journal_len);
    assert_eq!(router.store().ledger.treasury(), 0);
    match router
        .dispatch(HOLDER, 0, start, &Request::PendingChildrenOf { parent: parent() })
        .unwrap()
    {
        Response::PendingChildren(entries) => assert_eq!(entries.len(), 1),
        other => panic!("unexpected response {other:?}"),
    }

    // Two thirds of the way through its life the entry is near expiry.
    let near = start + 60 * DAY;
    let response = router
        .dispatch(
            HOLDER,
            0,
            near,
            &Request::DescriptorOf { item: ItemKey::new(BUTCHERY, ItemId(1)) },
        )
        .unwrap();
    assert_eq!(response, Response::Bucket(LifecycleBucket::NearExpiry));

    // Full-price acceptance at the default 15% rate.
    let receipt = accept(&mut router, 1, 0, TENTH, near);
    assert_eq!(receipt.rate_bps, 1_500);
    assert_eq!(receipt.commission, 15_000_000_000_000_000);
    assert_eq!(receipt.payout, 85_000_000_000_000_000);
    assert_eq!(receipt.commission + receipt.payout, TENTH);
    assert_eq!(router.store().ledger.treasury(), receipt.commission);
    assert_eq!(router.store().ledger.balance_of(DEPOSITOR), receipt.payout);
}

#[test]
fn expired_child_cannot_be_accepted() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: BUTCHERY,
                tier: WhitelistTier::ConditionalExpirable,
                base_price: 0,
            },
        )
        .unwrap();

    let start: Timestamp = 1_000;
    propose_expirable(&mut router, 1, TENTH, start, start + 10);

    let late = start + 15;
    let response = router
        .dispatch(
            HOLDER,
            0,
            late,
            &Request::DescriptorOf { item: ItemKey::new(BUTCHERY, ItemId(1)) },
        )
        .unwrap();
    assert_eq!(response, Response::Bucket(LifecycleBucket::Expired));

    let err = router
        .dispatch(
            HOLDER,
            TENTH,
            late,
            &Request::AcceptChild {
                parent: parent(),
                pending_index: 0,
                expected_collection: BUTCHERY,
                expected_item: ItemId(1),
            },
        )
        .unwrap_err();
    assert_eq!(err, NestraError::Expired { expires_at: start + 10, now: late });

    // Rejection is how an expired entry leaves the queue, with escrow
    // refunded in full.
    router
        .dispatch(
            HOLDER,
            0,
            late,
            &Request::RejectChild {
                parent: parent(),
                pending_index: 0,
                expected_collection: BUTCHERY,
                expected_item: ItemId(1),
            },
        )
        .unwrap();
    match router
        .dispatch(HOLDER, 0, late, &Request::PendingChildrenOf { parent: parent() })
        .unwrap()
    {
        Response::PendingChildren(entries) => assert!(entries.is_empty()),
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn fee_schedule_reconfiguration_changes_subsequent_accepts_only() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: BUTCHERY,
                tier: WhitelistTier::ConditionalExpirable,
                base_price: 0,
            },
        )
        .unwrap();

    let expiry = 1_000 * DAY;
    let mut expected_treasury: Amount = 0;
    let mut expected_payouts: Amount = 0;

    // Default 15%.
    propose_expirable(&mut router, 1, TENTH, 0, expiry);
    let receipt = accept(&mut router, 1, 0, TENTH, 0);
    assert_eq!(receipt.payout, 85_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    // Non-controller reconfiguration is rejected.
    let err = router
        .dispatch(HOLDER, 0, 0, &Request::UpdateDefaultRate { rate_bps: 1_300 })
        .unwrap_err();
    assert_eq!(err, NestraError::Unauthorized { caller: HOLDER });

    // Default lowered to 14%.
    router
        .dispatch(CONTROLLER, 0, 0, &Request::UpdateDefaultRate { rate_bps: 1_400 })
        .unwrap();
    assert_eq!(
        router.store().journal.last().unwrap().event,
        Event::DefaultRateUpdated { old: 1_500, new: 1_400 }
    );
    propose_expirable(&mut router, 2, TENTH, 0, expiry);
    let receipt = accept(&mut router, 2, 0, TENTH, 0);
    assert_eq!(receipt.payout, 86_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    // Threshold 15 -> 13% with the payer's score at 25.
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::UpdateLevelSetting { threshold: 15, rate_bps: 1_300 },
        )
        .unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RecordScore { address: HOLDER, score: 25 },
        )
        .unwrap();
    propose_expirable(&mut router, 3, TENTH, 0, expiry);
    let receipt = accept(&mut router, 3, 0, TENTH, 0);
    assert_eq!(receipt.rate_bps, 1_300);
    assert_eq!(receipt.payout, 87_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    // Threshold 25 -> 11% now also qualifies and wins as the greater one.
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::UpdateLevelSetting { threshold: 25, rate_bps: 1_100 },
        )
        .unwrap();
    propose_expirable(&mut router, 4, TENTH, 0, expiry);
    let receipt = accept(&mut router, 4, 0, TENTH, 0);
    assert_eq!(receipt.rate_bps, 1_100);
    assert_eq!(receipt.payout, 89_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    // Threshold 35 -> 9% with the score raised to 40.
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::UpdateLevelSetting { threshold: 35, rate_bps: 900 },
        )
        .unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RecordScore { address: HOLDER, score: 40 },
        )
        .unwrap();
    propose_expirable(&mut router, 5, TENTH, 0, expiry);
    let receipt = accept(&mut router, 5, 0, TENTH, 0);
    assert_eq!(receipt.rate_bps, 900);
    assert_eq!(receipt.payout, 91_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    // Removing 35 and re-pointing 25 -> 10% takes effect immediately.
    router
        .dispatch(CONTROLLER, 0, 0, &Request::RemoveLevelSetting { threshold: 35 })
        .unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::UpdateLevelSetting { threshold: 25, rate_bps: 1_000 },
        )
        .unwrap();
    propose_expirable(&mut router, 6, TENTH, 0, expiry);
    let receipt = accept(&mut router, 6, 0, TENTH, 0);
    assert_eq!(receipt.rate_bps, 1_000);
    assert_eq!(receipt.payout, 90_000_000_000_000_000);
    expected_treasury += receipt.commission;
    expected_payouts += receipt.payout;

    assert_eq!(router.store().ledger.treasury(), expected_treasury);
    assert_eq!(router.store().ledger.balance_of(DEPOSITOR), expected_payouts);
}

#[test]
fn whitelist_removal_flips_read_side() {
    let mut router = setup();
    let err = router
        .dispatch(CONTROLLER, 0, 0, &Request::RemoveWhitelist { collection: GALLERY })
        .unwrap_err();
    assert!(matches!(err, NestraError::NotFound(_)));

    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: GALLERY,
                tier: WhitelistTier::DirectFree,
                base_price: 0,
            },
        )
        .unwrap();
    assert_eq!(
        router
            .dispatch(HOLDER, 0, 0, &Request::IsWhitelisted { collection: GALLERY })
            .unwrap(),
        Response::Bool(true)
    );

    router
        .dispatch(CONTROLLER, 0, 0, &Request::RemoveWhitelist { collection: GALLERY })
        .unwrap();
    assert_eq!(
        router
            .dispatch(HOLDER, 0, 0, &Request::IsWhitelisted { collection: GALLERY })
            .unwrap(),
        Response::Bool(false)
    );
}

#[test]
fn failed_invocations_leave_no_trace() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RegisterWhitelist {
                collection: BUTCHERY,
                tier: WhitelistTier::ConditionalExpirable,
                base_price: 0,
            },
        )
        .unwrap();
    propose_expirable(&mut router, 1, TENTH, 0, 10 * DAY);

    let snapshot = router.store().clone();
    let err = router
        .dispatch(
            HOLDER,
            1, // far below price
            0,
            &Request::AcceptChild {
                parent: parent(),
                pending_index: 0,
                expected_collection: BUTCHERY,
                expected_item: ItemId(1),
            },
        )
        .unwrap_err();
    assert!(matches!(err, NestraError::Underpriced { .. }));
    assert_eq!(router.store(), &snapshot);
    assert_eq!(router.metrics().dispatch_failures.get(), 1);
}

#[test]
fn reputation_is_readable_through_the_router() {
    let mut router = setup();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::RecordScore { address: DEPOSITOR, score: 17 },
        )
        .unwrap();
    router
        .dispatch(
            CONTROLLER,
            0,
            0,
            &Request::UpdateLevelSetting { threshold: 15, rate_bps: 1_300 },
        )
        .unwrap();
    assert_eq!(
        router
            .dispatch(HOLDER, 0, 0, &Request::EffectiveRate { address: DEPOSITOR })
            .unwrap(),
        Response::Rate(1_300)
    );
    assert_eq!(
        router
            .dispatch(HOLDER, 0, 0, &Request::EffectiveRate { address: HOLDER })
            .unwrap(),
        Response::Rate(1_500)
    );
}
