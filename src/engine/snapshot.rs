//! Market snapshot builder.
//!
//! Collects offers from every configured feed into one normalized view of
//! the book: our own offers removed, one offer per asset, sells ascending
//! and buys descending. Feed failures degrade to an empty contribution.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::platforms::MarketFeed;
use crate::types::{AssetGroup, MarketOffer, OfferSide};

/// Normalized order book for one group, rebuilt every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    /// Ascending by unit price.
    pub sells: Vec<MarketOffer>,
    /// Descending by unit price.
    pub buys: Vec<MarketOffer>,
}

impl MarketSnapshot {
    pub fn lowest_sell(&self) -> Option<Decimal> {
        self.sells.first().map(|o| o.unit_price)
    }

    pub fn best_buy(&self) -> Option<Decimal> {
        self.buys.first().map(|o| o.unit_price)
    }

    pub fn is_empty(&self) -> bool {
        self.sells.is_empty() && self.buys.is_empty()
    }
}

/// One feed's raw contribution before merging.
#[derive(Debug, Clone)]
pub struct FeedOffers {
    pub fee_multiplier: Decimal,
    pub offers: Vec<MarketOffer>,
}

/// Builds snapshots, excluding offers owned by the operator's addresses.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    own_addresses: HashSet<String>,
}

impl SnapshotBuilder {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Self::default();
        for a in addresses {
            builder.exclude(a.as_ref());
        }
        builder
    }

    /// Treat offers from `address` as our own.
    pub fn exclude(&mut self, address: &str) {
        if !address.is_empty() {
            self.own_addresses.insert(address.to_lowercase());
        }
    }

    fn is_own(&self, offer: &MarketOffer) -> bool {
        offer
            .owner
            .as_deref()
            .map(|o| self.own_addresses.contains(&o.to_lowercase()))
            .unwrap_or(false)
    }

    /// Fetch every feed for `group` and merge the results.
    pub async fn build(&self, group: &AssetGroup, feeds: &[Arc<dyn MarketFeed>]) -> MarketSnapshot {
        let mut sells = Vec::with_capacity(feeds.len());
        let mut buys = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let fee_multiplier = feed.fee_multiplier();

            let offers = feed.fetch_sell_offers(group).await.unwrap_or_else(|e| {
                warn!(feed = feed.name(), group = %group, error = %e, "Sell-side fetch failed");
                Vec::new()
            });
            sells.push(FeedOffers { fee_multiplier, offers });

            let offers = feed.fetch_buy_offers(group).await.unwrap_or_else(|e| {
                warn!(feed = feed.name(), group = %group, error = %e, "Buy-side fetch failed");
                Vec::new()
            });
            buys.push(FeedOffers { fee_multiplier, offers });
        }

        let snapshot = self.merge(sells, buys);
        debug!(
            group = %group,
            sells = snapshot.sells.len(),
            buys = snapshot.buys.len(),
            lowest_sell = ?snapshot.lowest_sell(),
            best_buy = ?snapshot.best_buy(),
            "Snapshot built"
        );
        snapshot
    }

    /// Merge per-feed offers into a snapshot.
    ///
    /// Sell prices are multiplied by the feed's fee multiplier (what a buyer
    /// pays); buy prices are divided by it (what a seller receives).
    pub fn merge(&self, sells: Vec<FeedOffers>, buys: Vec<FeedOffers>) -> MarketSnapshot {
        let mut sells = self.normalize(sells, OfferSide::Sell);
        let mut buys = self.normalize(buys, OfferSide::Buy);
        sells.sort_by(|a, b| a.unit_price.cmp(&b.unit_price).then_with(|| a.asset_id.cmp(&b.asset_id)));
        buys.sort_by(|a, b| b.unit_price.cmp(&a.unit_price).then_with(|| a.asset_id.cmp(&b.asset_id)));
        MarketSnapshot { sells, buys }
    }

    fn normalize(&self, feeds: Vec<FeedOffers>, side: OfferSide) -> Vec<MarketOffer> {
        let mut best: HashMap<String, MarketOffer> = HashMap::new();

        for feed in feeds {
            let multiplier = if feed.fee_multiplier > Decimal::ZERO {
                feed.fee_multiplier
            } else {
                Decimal::ONE
            };
            for mut offer in feed.offers {
                if offer.unit_price <= Decimal::ZERO || offer.quantity <= Decimal::ZERO {
                    continue;
                }
                if self.is_own(&offer) {
                    continue;
                }
                offer.side = side;
                offer.unit_price = match side {
                    OfferSide::Sell => offer.unit_price * multiplier,
                    OfferSide::Buy => offer.unit_price / multiplier,
                };

                match best.get(&offer.asset_id) {
                    Some(existing) if !improves(side, &offer, existing) => {}
                    _ => {
                        best.insert(offer.asset_id.clone(), offer);
                    }
                }
            }
        }

        best.into_values().collect()
    }
}

fn improves(side: OfferSide, candidate: &MarketOffer, existing: &MarketOffer) -> bool {
    match side {
        OfferSide::Sell => candidate.unit_price < existing.unit_price,
        OfferSide::Buy => candidate.unit_price > existing.unit_price,
    }
}
