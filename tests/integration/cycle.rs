//! Full-cycle scenarios against the in-memory marketplace.

mod mock_marketplace;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::sync::Arc;

use mock_marketplace::{offer, sells, InMemoryMarketplace, StaticFeed};
use satmaker::config::AppConfig;
use satmaker::engine::cycle::CycleRunner;
use satmaker::engine::manager::Services;
use satmaker::engine::snapshot::SnapshotBuilder;
use satmaker::platforms::MarketFeed;
use satmaker::types::{EngineError, OfferSide, Protocol};
use satmaker::wallet::{Wallet, DEFAULT_DERIVATION_PATH};

const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

const ORDINALS: &str = r#"
    [agent]
    name = "test"
    update_threshold = 0.01
    max_bid_to_list_ratio = 0.9

    [[groups]]
    id = "nodemonkes"
    protocol = "ordinals"
    list_above = 1.2
    bid_below = 0.8
    num_cheapest = 10
"#;

const RUNES_LADDER: &str = r#"
    [agent]
    name = "test"
    update_threshold = 0.01
    max_bid_to_list_ratio = 0.9

    [[groups]]
    id = "dog"
    protocol = "runes"
    bid_slug = "DOG•GO•TO•THE•MOON"
    market_depth_sats = 1000000
    ladder = [
        { price_percent = 0.9, allocation = 0.5 },
        { price_percent = 0.7, allocation = 0.5 },
    ]
"#;

struct Harness {
    market: Arc<InMemoryMarketplace>,
    feed: Arc<StaticFeed>,
    runner: CycleRunner,
    address: String,
}

fn wallet() -> Wallet {
    Wallet::from_mnemonic(&SecretString::new(MNEMONIC.to_string()), DEFAULT_DERIVATION_PATH).unwrap()
}

async fn harness(toml: &str, balance: Decimal, confirm_below_floor: bool) -> Result<Harness, EngineError> {
    let settings = AppConfig::parse(toml).unwrap().validate()?;
    let wallet = wallet();
    let address = wallet.address();
    let market = Arc::new(InMemoryMarketplace::new(balance, wallet.identity().script_pubkey()));
    let feed = Arc::new(StaticFeed::default());

    let services = Services {
        marketplace: market.clone(),
        feeds: vec![feed.clone() as Arc<dyn MarketFeed>],
        wallet: Arc::new(wallet),
        snapshots: SnapshotBuilder::default(),
        dry_run: false,
        bid_expiry_days: 7,
    };
    let runner = CycleRunner::init(settings, services, confirm_below_floor).await?;
    Ok(Harness { market, feed, runner, address })
}

#[tokio::test]
async fn test_first_cycle_bids_and_second_is_noop() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    h.feed.set_sells(sells(&[dec!(100000), dec!(110000)]));

    let first = h.runner.run_cycle().await.unwrap();
    assert_eq!(first.bids_created(), 1);
    let plan = first.groups[0].plan.clone().unwrap();
    assert_eq!(plan.reference_price, dec!(105000));
    assert_eq!(plan.listing_price, dec!(126000));
    assert_eq!(plan.max_bid_price, dec!(90000));
    {
        let state = h.market.state();
        assert_eq!(state.submissions.len(), 1);
        assert_eq!(state.submissions[0].price, 84000);
        assert_eq!(state.submissions[0].quantity, 5);
    }

    let second = h.runner.run_cycle().await.unwrap();
    assert_eq!(second.cycle, 2);
    assert_eq!(second.bids_created(), 0);
    assert_eq!(second.bids_cancelled(), 0);
    let state = h.market.state();
    assert_eq!(state.submissions.len(), 1);
    assert!(state.cancellations.is_empty());
}

#[tokio::test]
async fn test_price_move_cancels_everything_then_recreates() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    h.feed.set_sells(sells(&[dec!(100000), dec!(110000)]));
    h.runner.run_cycle().await.unwrap();

    h.feed.set_sells(sells(&[dec!(120000), dec!(130000)]));
    let report = h.runner.run_cycle().await.unwrap();
    assert_eq!(report.bids_cancelled(), 1);
    assert_eq!(report.bids_created(), 1);

    let state = h.market.state();
    assert_eq!(state.cancellations.len(), 1);
    assert_eq!(state.cancellations[0].bid_ids, vec!["bid-1".to_string()]);
    assert!(!state.cancellations[0].signature.is_empty());
    assert_eq!(state.submissions[1].price, 100000);
    // Only the new generation remains open.
    assert_eq!(state.bids.len(), 1);
    assert_eq!(state.bids[0].id, "bid-2");
}

#[tokio::test]
async fn test_own_offers_do_not_move_the_reference() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    let mut book = sells(&[dec!(100000), dec!(110000)]);
    book.push(offer(OfferSide::Sell, "mine", dec!(50000), Decimal::ONE, Some(&h.address.to_uppercase())));
    book.push(offer(
        OfferSide::Sell,
        "escrow",
        dec!(40000),
        Decimal::ONE,
        Some("bc1qescrowescrowescrowescrowescrowescrow"),
    ));
    h.feed.set_sells(book);

    let report = h.runner.run_cycle().await.unwrap();
    let plan = report.groups[0].plan.clone().unwrap();
    assert_eq!(plan.reference_price, dec!(105000));
    assert_eq!(plan.max_bid_price, dec!(90000));
}

#[tokio::test]
async fn test_runes_ladder_splits_budget_and_stays_put() {
    let mut h = harness(RUNES_LADDER, dec!(10000), false).await.unwrap();
    h.feed.set_sells(vec![offer(OfferSide::Sell, "o1", dec!(100), dec!(1000000), None)]);

    let first = h.runner.run_cycle().await.unwrap();
    assert_eq!(first.bids_created(), 2);
    {
        let state = h.market.state();
        let placed: Vec<(u64, u64)> = state.submissions.iter().map(|s| (s.price, s.quantity)).collect();
        // Token bids quote the order total: 55 @ 90 and 71 @ 70.
        assert_eq!(placed, vec![(4950, 55), (4970, 71)]);
        assert!(state.submissions.iter().all(|s| s.meta_type == Protocol::Runes && s.signature.is_some()));
        let committed: u64 = placed.iter().map(|(total, _)| total).sum();
        assert!(committed <= 10000);
    }

    let second = h.runner.run_cycle().await.unwrap();
    assert_eq!(second.bids_created(), 0);
    assert_eq!(second.bids_cancelled(), 0);
}

#[tokio::test]
async fn test_listing_is_signed_once() {
    let mut h = harness(ORDINALS, dec!(0), false).await.unwrap();
    h.market.hold(Protocol::Ordinals, "abci0", "nodemonkes", Decimal::ONE);
    h.feed.set_sells(sells(&[dec!(100000), dec!(110000)]));

    let first = h.runner.run_cycle().await.unwrap();
    assert_eq!(first.listings_submitted(), 1);
    {
        let state = h.market.state();
        assert_eq!(state.listings[0].price, dec!(126000));
        assert_eq!(state.signed_listings[0].signed_secure_listing_psbts.len(), 1);
        // Zero balance: nothing to bid with.
        assert!(state.submissions.is_empty());
    }

    let second = h.runner.run_cycle().await.unwrap();
    assert_eq!(second.listings_submitted(), 0);
    assert_eq!(h.market.state().signed_listings.len(), 1);
}

#[tokio::test]
async fn test_runes_listing_total_is_not_relisted() {
    let mut h = harness(RUNES_LADDER, dec!(0), false).await.unwrap();
    h.market.hold(Protocol::Runes, "utxo:0", "DOG•GO•TO•THE•MOON", dec!(1000));
    h.feed.set_sells(vec![offer(OfferSide::Sell, "o1", dec!(100), dec!(1000000), None)]);

    let first = h.runner.run_cycle().await.unwrap();
    assert_eq!(first.listings_submitted(), 1);
    {
        let state = h.market.state();
        // 1000 units at 120 each, quoted for the whole balance.
        assert_eq!(state.listings[0].price, dec!(120000));
        assert_eq!(state.signed_listings[0].listings[0].amount.as_deref(), Some("1000"));
    }

    let second = h.runner.run_cycle().await.unwrap();
    assert_eq!(second.listings_submitted(), 0);
    assert_eq!(h.market.state().signed_listings.len(), 1);
}

#[tokio::test]
async fn test_unknown_open_bids_never_bid_blind() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    h.market.state().fail_open_bids = true;
    h.feed.set_sells(sells(&[dec!(100000)]));

    let report = h.runner.run_cycle().await.unwrap();
    assert_eq!(report.bids_created(), 0);
    assert!(report.groups[0].bid_state.is_none());
    assert!(h.market.state().submissions.is_empty());
}

#[tokio::test]
async fn test_failed_cancel_leaves_old_generation_alone() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    h.feed.set_sells(sells(&[dec!(100000), dec!(110000)]));
    h.runner.run_cycle().await.unwrap();

    h.market.state().fail_cancel = Some("503 Service Unavailable".to_string());
    h.feed.set_sells(sells(&[dec!(120000), dec!(130000)]));
    let report = h.runner.run_cycle().await.unwrap();

    assert_eq!(report.error_count(), 1);
    assert_eq!(report.bids_created(), 0);
    let state = h.market.state();
    assert_eq!(state.submissions.len(), 1);
    assert_eq!(state.bids.len(), 1);
}

#[tokio::test]
async fn test_group_cap_limits_quantity() {
    let toml = ORDINALS.replace("num_cheapest = 10", "num_cheapest = 10\n    max_bid_total = 200000");
    let mut h = harness(&toml, dec!(500000), false).await.unwrap();
    h.feed.set_sells(sells(&[dec!(100000), dec!(110000)]));

    h.runner.run_cycle().await.unwrap();
    let state = h.market.state();
    assert_eq!(state.submissions[0].quantity, 2);
}

#[tokio::test]
async fn test_empty_book_is_no_action() {
    let mut h = harness(ORDINALS, dec!(500000), false).await.unwrap();
    let report = h.runner.run_cycle().await.unwrap();
    assert!(report.groups.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(h.market.state().submissions.is_empty());
}

#[tokio::test]
async fn test_below_floor_listing_needs_confirmation() {
    let toml = ORDINALS.replace("list_above = 1.2", "list_above = 0.95");
    let err = harness(&toml, dec!(0), false).await.err().unwrap();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert!(harness(&toml, dec!(0), true).await.is_ok());
}
