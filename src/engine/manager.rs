//! Collection managers.
//!
//! One manager per protocol. The shared per-group flow lives in the
//! default methods of [`CollectionManager`]: snapshot, plan, reconcile
//! bids, reconcile listings. Each manager supplies only what differs by
//! protocol: which bids and holdings belong to a group, and the shape of
//! bid and listing payloads.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bids::{reconcile, BidOperation, BidOrder, BidState, ReconcileParams};
use super::cycle::CycleContext;
use super::listings::decide;
use super::snapshot::SnapshotBuilder;
use crate::config::{EngineSettings, GroupSettings};
use crate::platforms::{
    BidSubmission, CancelRequest, ListingRequest, MarketFeed, Marketplace, SignedListing,
};
use crate::strategy::PricePlanner;
use crate::types::{BidKind, EngineError, HeldAsset, OpenBid, OpenListing, PricePlan, Protocol};
use crate::wallet::message::BiddingMessage;
use crate::wallet::{SighashPolicy, Wallet};

/// Collaborators shared by every manager.
pub struct Services {
    pub marketplace: Arc<dyn Marketplace>,
    pub feeds: Vec<Arc<dyn MarketFeed>>,
    pub wallet: Arc<Wallet>,
    pub snapshots: SnapshotBuilder,
    /// Log write operations instead of submitting them.
    pub dry_run: bool,
    pub bid_expiry_days: i64,
}

/// What happened to one group in one cycle.
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub group: String,
    pub plan: Option<PricePlan>,
    pub bid_state: Option<BidState>,
    pub bids_cancelled: usize,
    pub bids_created: usize,
    pub listings_submitted: usize,
    pub listings_skipped: usize,
    /// Per-operation failures; the group itself still completed.
    pub errors: Vec<String>,
}

/// Whole sats, rounded down. Negative values become zero.
fn whole_sats(value: Decimal) -> u64 {
    value.floor().to_u64().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CollectionManager: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn services(&self) -> &Services;

    /// Our open bids that target `group`.
    fn group_bids(&self, group: &GroupSettings, bids: &[OpenBid]) -> Vec<OpenBid>;

    /// Held assets that belong to `group`.
    fn group_holdings(&self, group: &GroupSettings, holdings: &[HeldAsset]) -> Vec<HeldAsset> {
        holdings
            .iter()
            .filter(|h| h.group_key == group.group.bid_slug)
            .cloned()
            .collect()
    }

    /// The asset's live listing expressed per unit, comparable with the
    /// planned listing price.
    fn listed_unit_price(&self, asset: &HeldAsset) -> Option<OpenListing> {
        asset.listing.clone()
    }

    /// Signed bid-creation payload for one planned order.
    fn bid_submission(
        &self,
        group: &GroupSettings,
        order: &BidOrder,
        ctx: &CycleContext,
    ) -> Result<BidSubmission, EngineError>;

    /// Listing intent for `asset` at `unit_price`, or `None` when there is
    /// nothing to list.
    fn listing_request(
        &self,
        group: &GroupSettings,
        asset: &HeldAsset,
        unit_price: Decimal,
    ) -> Option<ListingRequest>;

    /// Run one group end to end. Item-level failures are collected in the
    /// report; only missing market data or a budget violation fails the group.
    async fn process_collection(
        &self,
        settings: &EngineSettings,
        group: &GroupSettings,
        ctx: &CycleContext,
    ) -> Result<GroupReport, EngineError> {
        let services = self.services();
        let mut report = GroupReport { group: group.group.id.clone(), ..Default::default() };

        let snapshot = services.snapshots.build(&group.group, &services.feeds).await;
        let budget = match group.max_bid_total {
            Some(cap) => ctx.bidding_balance.min(cap),
            None => ctx.bidding_balance,
        };

        let plan = PricePlanner::new(settings)
            .plan(group, &snapshot, budget)
            .ok_or_else(|| EngineError::MarketDataUnavailable { group: group.group.to_string() })?;

        let committed = plan.bid_plan.total_cost();
        if committed > budget.max(Decimal::ZERO) {
            return Err(EngineError::BudgetExceeded {
                group: group.group.to_string(),
                detail: format!("plan commits {committed} sats against {budget}"),
            });
        }

        info!(group = %group.group, plan = %plan, budget = %budget, "Group priced");

        if group.bidding_enabled {
            self.reconcile_bids(settings, group, &plan, ctx, &mut report).await;
        }
        if group.listing_enabled {
            self.reconcile_listings(settings, group, &plan, ctx, &mut report).await;
        }

        report.plan = Some(plan);
        Ok(report)
    }

    async fn reconcile_bids(
        &self,
        settings: &EngineSettings,
        group: &GroupSettings,
        plan: &PricePlan,
        ctx: &CycleContext,
        report: &mut GroupReport,
    ) {
        let Some(open_bids) = ctx.open_bids.as_deref() else {
            warn!(group = %group.group, "Open bids unavailable, skipping bid reconciliation");
            return;
        };

        for (price, quantity) in plan.bid_plan.orders() {
            if quantity == 0 {
                debug!(group = %group.group, price = %price, "Zero-quantity order, nothing to place");
            }
        }

        let existing = self.group_bids(group, open_bids);
        let params = ReconcileParams {
            update_threshold: settings.update_threshold,
            quantity_tolerance: settings.ladder_quantity_tolerance,
            ceiling: group.max_bid_total,
            max_price: Some(plan.max_bid_price),
        };
        let decision = reconcile(&existing, &plan.bid_plan, &params);
        info!(
            group = %group.group,
            state = %decision.state,
            existing = existing.len(),
            operations = decision.operations.len(),
            reason = %decision.reason,
            "Bid reconciliation"
        );
        report.bid_state = Some(decision.state);

        for op in &decision.operations {
            match op {
                BidOperation::Cancel { bid_ids } => {
                    if let Err(e) = self.cancel_bids(bid_ids, ctx).await {
                        warn!(group = %group.group, error = %e, "Cancel failed, not creating replacements");
                        report.errors.push(e.to_string());
                        return;
                    }
                    report.bids_cancelled += bid_ids.len();
                }
                BidOperation::Create(order) => match self.create_bid(group, order, ctx).await {
                    Ok(()) => report.bids_created += 1,
                    Err(e) => {
                        warn!(group = %group.group, step = order.step, error = %e, "Bid creation failed");
                        report.errors.push(e.to_string());
                    }
                },
            }
        }
    }

    async fn reconcile_listings(
        &self,
        settings: &EngineSettings,
        group: &GroupSettings,
        plan: &PricePlan,
        ctx: &CycleContext,
        report: &mut GroupReport,
    ) {
        let planner = PricePlanner::new(settings);
        for asset in self.group_holdings(group, &ctx.holdings) {
            let target = planner.listing_price_for(group, plan, &asset.asset_id);
            let current = self.listed_unit_price(&asset);
            let decision = decide(current.as_ref(), target, settings.update_threshold);

            let Some(price) = decision.price() else {
                debug!(group = %group.group, asset = %asset.asset_id, decision = %decision, "Listing kept");
                report.listings_skipped += 1;
                continue;
            };

            info!(group = %group.group, asset = %asset.asset_id, decision = %decision, "Listing");
            match self.list_item(group, &asset, price, ctx).await {
                Ok(()) => report.listings_submitted += 1,
                Err(e) => {
                    warn!(group = %group.group, asset = %asset.asset_id, error = %e, "Listing failed");
                    report.errors.push(e.to_string());
                }
            }
        }
    }

    async fn create_bid(
        &self,
        group: &GroupSettings,
        order: &BidOrder,
        ctx: &CycleContext,
    ) -> Result<(), EngineError> {
        let submission = self.bid_submission(group, order, ctx)?;
        if self.services().dry_run {
            info!(
                group = %group.group,
                price = submission.price,
                quantity = submission.quantity,
                "[DRY RUN] Would create bid"
            );
            return Ok(());
        }

        self.services()
            .marketplace
            .submit_bid_creation(&submission)
            .await
            .map_err(|e| EngineError::submission("create_bid", format!("{e:#}")))
    }

    async fn cancel_bids(&self, bid_ids: &[String], ctx: &CycleContext) -> Result<(), EngineError> {
        if bid_ids.is_empty() {
            return Ok(());
        }
        if self.services().dry_run {
            info!(bids = ?bid_ids, "[DRY RUN] Would cancel bids");
            return Ok(());
        }

        let request = CancelRequest {
            address: ctx.address.clone(),
            signature: ctx.auth_signature.clone(),
            bid_ids: bid_ids.to_vec(),
        };
        self.services()
            .marketplace
            .submit_cancellation(&request)
            .await
            .map_err(|e| EngineError::submission("cancel_bids", format!("{e:#}")))
    }

    /// Fetch the listing templates, sign them and hand them back.
    ///
    /// The primary template's input 0 is signed `SINGLE|ANYONECANPAY`; each
    /// secure template is signed `ALL|ANYONECANPAY` on its requested inputs.
    async fn list_item(
        &self,
        group: &GroupSettings,
        asset: &HeldAsset,
        unit_price: Decimal,
        _ctx: &CycleContext,
    ) -> Result<(), EngineError> {
        let Some(request) = self.listing_request(group, asset, unit_price) else {
            debug!(asset = %asset.asset_id, "Nothing to list");
            return Ok(());
        };
        if self.services().dry_run {
            info!(asset = %asset.asset_id, price = request.price, "[DRY RUN] Would list");
            return Ok(());
        }

        let marketplace = &self.services().marketplace;
        let wallet = &self.services().wallet;

        let template = marketplace
            .get_unsigned_template(&request)
            .await
            .map_err(|e| EngineError::submission("get_unsigned_template", format!("{e:#}")))?;

        let primary = wallet.sign_psbt_base64(&template.unsigned_primary, &[0], SighashPolicy::Exclusive)?;

        let mut secure = Vec::with_capacity(template.secure.len());
        for t in &template.secure {
            let indices: &[usize] = if t.indices_to_sign.is_empty() { &[0] } else { &t.indices_to_sign };
            let signed = wallet.sign_psbt_base64(&t.base64, indices, SighashPolicy::Secure)?;
            secure.push(signed.to_base64());
        }

        let listing = SignedListing {
            signed_listing_psbt: primary.to_base64(),
            unsigned_listing_psbt: template.unsigned_primary,
            signed_secure_listing_psbts: secure,
            listings: vec![request.clone()],
        };
        marketplace
            .submit_signed_listing(&listing)
            .await
            .map_err(|e| EngineError::submission("submit_signed_listing", format!("{e:#}")))?;

        info!(asset = %asset.asset_id, price = request.price, "Listing submitted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ordinals
// ---------------------------------------------------------------------------

/// Inscription collections: per-item prices, collection-wide bids.
pub struct OrdinalsManager {
    services: Arc<Services>,
}

impl OrdinalsManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl CollectionManager for OrdinalsManager {
    fn protocol(&self) -> Protocol {
        Protocol::Ordinals
    }

    fn services(&self) -> &Services {
        &self.services
    }

    fn group_bids(&self, group: &GroupSettings, bids: &[OpenBid]) -> Vec<OpenBid> {
        bids.iter()
            .filter(|b| b.targets(BidKind::Collection, &group.group.bid_slug))
            .cloned()
            .collect()
    }

    fn bid_submission(
        &self,
        group: &GroupSettings,
        order: &BidOrder,
        ctx: &CycleContext,
    ) -> Result<BidSubmission, EngineError> {
        let wallet = &self.services.wallet;
        let price = whole_sats(order.unit_price);
        if price == 0 || order.quantity == 0 {
            return Err(EngineError::submission("create_bid", "bid rounds to zero sats"));
        }

        let address = wallet.address();
        let public_key_hex = wallet.public_key_hex();
        let timestamp = ctx.now.timestamp_millis();
        let bid_expiry = ctx.bid_expiry(self.services.bid_expiry_days);

        let message = BiddingMessage {
            address: &address,
            public_key_hex: &public_key_hex,
            price,
            quantity: order.quantity.to_string(),
            expiry_ms: bid_expiry,
            slug: &group.group.bid_slug,
            timestamp_ms: timestamp,
        };
        let signed_bidding_message = wallet.sign_text(&message.render());

        Ok(BidSubmission {
            bid_expiry,
            bidder_payment_address: address.clone(),
            bidder_payment_address_pubkey: public_key_hex,
            bidder_token_receive_address: address,
            meta_type: Protocol::Ordinals,
            collection_slug: group.group.bid_slug.clone(),
            price,
            quantity: order.quantity,
            signed_bidding_message,
            timestamp,
            address: None,
            signature: None,
        })
    }

    fn listing_request(
        &self,
        group: &GroupSettings,
        asset: &HeldAsset,
        unit_price: Decimal,
    ) -> Option<ListingRequest> {
        let price = whole_sats(unit_price);
        if price == 0 {
            return None;
        }
        let wallet = &self.services.wallet;
        Some(ListingRequest {
            price,
            inscription_id: asset.asset_id.clone(),
            collection_slug: group.group.bid_slug.clone(),
            ord_address: wallet.address(),
            receive_address: wallet.address(),
            tap_key: wallet.public_key_hex(),
            meta_type: None,
            amount: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Runes
// ---------------------------------------------------------------------------

/// Fungible tokens: real-valued unit prices, bids quoted as a total.
pub struct RunesManager {
    services: Arc<Services>,
}

impl RunesManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

/// Rune names compare without spacers or case.
fn rune_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

#[async_trait]
impl CollectionManager for RunesManager {
    fn protocol(&self) -> Protocol {
        Protocol::Runes
    }

    fn services(&self) -> &Services {
        &self.services
    }

    fn group_bids(&self, group: &GroupSettings, bids: &[OpenBid]) -> Vec<OpenBid> {
        let key = rune_key(&group.group.bid_slug);
        bids.iter()
            .filter(|b| b.kind == BidKind::Rune && b.group_keys.iter().any(|k| rune_key(k) == key))
            .cloned()
            .collect()
    }

    fn group_holdings(&self, group: &GroupSettings, holdings: &[HeldAsset]) -> Vec<HeldAsset> {
        let key = rune_key(&group.group.bid_slug);
        holdings
            .iter()
            .filter(|h| rune_key(&h.group_key) == key)
            .cloned()
            .collect()
    }

    /// Rune listings are priced for the whole balance.
    fn listed_unit_price(&self, asset: &HeldAsset) -> Option<OpenListing> {
        let listing = asset.listing.as_ref()?;
        if asset.quantity <= Decimal::ZERO {
            return Some(listing.clone());
        }
        Some(OpenListing { asset_id: listing.asset_id.clone(), price: listing.price / asset.quantity })
    }

    fn bid_submission(
        &self,
        group: &GroupSettings,
        order: &BidOrder,
        ctx: &CycleContext,
    ) -> Result<BidSubmission, EngineError> {
        let wallet = &self.services.wallet;
        // Token bids quote the whole order; sats are only rounded here.
        let price = whole_sats(order.total_price);
        if price == 0 || order.quantity == 0 {
            return Err(EngineError::submission("create_bid", "bid rounds to zero sats"));
        }

        let address = wallet.address();
        let public_key_hex = wallet.public_key_hex();
        let timestamp = ctx.now.timestamp_millis();
        let bid_expiry = ctx.bid_expiry(self.services.bid_expiry_days);

        let message = BiddingMessage {
            address: &address,
            public_key_hex: &public_key_hex,
            price,
            quantity: order.quantity.to_string(),
            expiry_ms: bid_expiry,
            slug: &group.group.bid_slug,
            timestamp_ms: timestamp,
        };
        let signed_bidding_message = wallet.sign_text(&message.render());

        Ok(BidSubmission {
            bid_expiry,
            bidder_payment_address: address.clone(),
            bidder_payment_address_pubkey: public_key_hex,
            bidder_token_receive_address: address.clone(),
            meta_type: Protocol::Runes,
            collection_slug: group.group.bid_slug.clone(),
            price,
            quantity: order.quantity,
            signed_bidding_message,
            timestamp,
            address: Some(address),
            signature: Some(ctx.auth_signature.clone()),
        })
    }

    fn listing_request(
        &self,
        group: &GroupSettings,
        asset: &HeldAsset,
        unit_price: Decimal,
    ) -> Option<ListingRequest> {
        // Amounts finer than the rune's divisibility cannot be transferred.
        let amount = asset
            .quantity
            .round_dp_with_strategy(u32::from(group.group.divisibility), RoundingStrategy::ToZero);
        if amount <= Decimal::ZERO {
            return None;
        }
        let price = whole_sats(unit_price * amount);
        if price == 0 {
            return None;
        }
        let wallet = &self.services.wallet;
        Some(ListingRequest {
            price,
            inscription_id: asset.asset_id.clone(),
            collection_slug: group.group.bid_slug.clone(),
            ord_address: wallet.address(),
            receive_address: wallet.address(),
            tap_key: wallet.public_key_hex(),
            meta_type: Some(Protocol::Runes),
            amount: Some(amount.normalize().to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
