//! Cycle runner.
//!
//! One pass over every configured group: authenticate once, read the
//! bidding balance, holdings and open orders once, then hand each group to
//! the manager for its protocol. Groups run sequentially. A group that
//! fails is logged and skipped; authentication and configuration errors
//! abort the cycle.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::manager::{CollectionManager, GroupReport, OrdinalsManager, RunesManager, Services};
use crate::config::EngineSettings;
use crate::types::{EngineError, HeldAsset, OpenBid, OpenListing, Protocol};
use crate::wallet::message;

/// Read-only state shared by every group in a cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub address: String,
    /// Signature over this cycle's challenge; authorizes write calls.
    pub auth_signature: String,
    /// Bidding wallet balance in sats. Zero when unknown.
    pub bidding_balance: Decimal,
    pub holdings: Vec<HeldAsset>,
    /// `None` when the open-bid lookup failed.
    pub open_bids: Option<Vec<OpenBid>>,
    pub now: DateTime<Utc>,
}

impl CycleContext {
    /// Bid expiry `days` from now, in epoch milliseconds.
    pub fn bid_expiry(&self, days: i64) -> i64 {
        (self.now + ChronoDuration::days(days)).timestamp_millis()
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub bidding_balance: Decimal,
    pub groups: Vec<GroupReport>,
    /// Groups that produced no plan, with the reason.
    pub skipped: Vec<(String, String)>,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn bids_created(&self) -> usize {
        self.groups.iter().map(|g| g.bids_created).sum()
    }

    pub fn bids_cancelled(&self) -> usize {
        self.groups.iter().map(|g| g.bids_cancelled).sum()
    }

    pub fn listings_submitted(&self) -> usize {
        self.groups.iter().map(|g| g.listings_submitted).sum()
    }

    pub fn error_count(&self) -> usize {
        self.groups.iter().map(|g| g.errors.len()).sum()
    }
}

pub struct CycleRunner {
    settings: EngineSettings,
    services: Arc<Services>,
    ordinals: OrdinalsManager,
    runes: RunesManager,
    bidding_address: Option<String>,
    cycle: u64,
}

impl CycleRunner {
    /// Set up the runner.
    ///
    /// Groups listing below their reference price (`list_above < 1`) are
    /// refused unless `below_floor_confirmed` is set. The bidding wallet
    /// address is resolved once; without it every group bids with zero budget.
    pub async fn init(
        settings: EngineSettings,
        mut services: Services,
        below_floor_confirmed: bool,
    ) -> Result<Self, EngineError> {
        let below_floor = settings.below_floor_groups();
        if !below_floor.is_empty() {
            if !below_floor_confirmed {
                let names: Vec<String> = below_floor
                    .iter()
                    .map(|(id, m)| format!("{id} (list_above {m})"))
                    .collect();
                return Err(EngineError::InvalidConfig(format!(
                    "below-floor listing not confirmed for: {}",
                    names.join(", ")
                )));
            }
            for (id, multiplier) in &below_floor {
                warn!(group = %id, list_above = %multiplier, "Listing below reference price (confirmed)");
            }
        }

        let address = services.wallet.address();
        let public_key_hex = services.wallet.public_key_hex();
        let bidding_address = match services.marketplace.bidding_address(&address, &public_key_hex).await {
            Ok(a) => {
                info!(bidding_address = %a, "Bidding wallet resolved");
                Some(a)
            }
            Err(e) => {
                warn!(error = %e, "Bidding wallet address unavailable, bids get no budget");
                None
            }
        };

        services.snapshots.exclude(&address);
        if let Some(a) = &bidding_address {
            services.snapshots.exclude(a);
        }

        let services = Arc::new(services);
        Ok(Self {
            ordinals: OrdinalsManager::new(services.clone()),
            runes: RunesManager::new(services.clone()),
            settings,
            services,
            bidding_address,
            cycle: 0,
        })
    }

    fn manager(&self, protocol: Protocol) -> &dyn CollectionManager {
        match protocol {
            Protocol::Ordinals => &self.ordinals,
            Protocol::Runes => &self.runes,
        }
    }

    /// Protocols with at least one listing-enabled group, in config order.
    fn listing_protocols(&self) -> Vec<Protocol> {
        let mut protocols = Vec::new();
        for group in self.settings.groups.iter().filter(|g| g.listing_enabled) {
            if !protocols.contains(&group.group.protocol) {
                protocols.push(group.group.protocol);
            }
        }
        protocols
    }

    /// Run one full cycle over every configured group.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        self.cycle += 1;
        let started = Instant::now();
        info!(cycle = self.cycle, groups = self.settings.groups.len(), "Starting cycle");

        let ctx = self.prepare_context().await?;
        info!(
            balance = %ctx.bidding_balance,
            holdings = ctx.holdings.len(),
            open_bids = ?ctx.open_bids.as_ref().map(Vec::len),
            "Cycle context ready"
        );

        let mut report = CycleReport {
            cycle: self.cycle,
            bidding_balance: ctx.bidding_balance,
            ..Default::default()
        };

        for group in &self.settings.groups {
            let manager = self.manager(group.group.protocol);
            match manager.process_collection(&self.settings, group, &ctx).await {
                Ok(group_report) => report.groups.push(group_report),
                Err(e) if e.is_cycle_fatal() => {
                    error!(group = %group.group, error = %e, "Cycle aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(group = %group.group, protocol = %manager.protocol(), error = %e, "Group skipped");
                    report.skipped.push((group.group.id.clone(), e.to_string()));
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn prepare_context(&self) -> Result<CycleContext, EngineError> {
        let wallet = &self.services.wallet;
        let marketplace = &self.services.marketplace;
        let address = wallet.address();

        let challenge = marketplace
            .fetch_challenge(&address)
            .await
            .map_err(|e| EngineError::AuthenticationFailure(format!("challenge request failed: {e:#}")))?;
        let auth_signature = wallet.sign_challenge(&challenge);
        if !message::verify_message(&address, &message::challenge_bytes(&challenge), &auth_signature) {
            return Err(EngineError::AuthenticationFailure(
                "challenge signature does not verify against the wallet address".to_string(),
            ));
        }

        let bidding_balance = match &self.bidding_address {
            Some(bidding_address) => marketplace.bidding_balance(bidding_address).await.unwrap_or_else(|e| {
                warn!(error = %e, "Balance lookup failed, bidding with zero budget");
                Decimal::ZERO
            }),
            None => Decimal::ZERO,
        };

        let mut holdings = Vec::new();
        for protocol in self.listing_protocols() {
            let mut held = match marketplace.fetch_holdings(&address, protocol).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(protocol = %protocol, error = %e, "Holdings unavailable");
                    continue;
                }
            };
            // Only look listings up separately when holdings carry none.
            if !held.is_empty() && held.iter().all(|h| h.listing.is_none()) {
                match marketplace.fetch_open_listings(&address, protocol).await {
                    Ok(listings) => merge_listings(&mut held, listings),
                    Err(e) => warn!(protocol = %protocol, error = %e, "Open listings unavailable, using holdings data"),
                }
            }
            holdings.extend(held);
        }

        let open_bids = match marketplace.fetch_open_bids(&address).await {
            Ok(bids) => Some(bids),
            Err(e) => {
                warn!(error = %e, "Open bids unavailable");
                None
            }
        };

        Ok(CycleContext {
            address,
            auth_signature,
            bidding_balance,
            holdings,
            open_bids,
            now: Utc::now(),
        })
    }
}

/// Attach open listings to holdings that lack listing data.
fn merge_listings(holdings: &mut [HeldAsset], listings: Vec<OpenListing>) {
    for holding in holdings.iter_mut().filter(|h| h.listing.is_none()) {
        holding.listing = listings.iter().find(|l| l.asset_id == holding.asset_id).cloned();
    }
}
