//! Strategy: turns a market snapshot into a price plan.
//!
//! `PricePlanner` runs the pricing pipeline for one group:
//! reference price → floor → listing markup → bid ceiling → bid sizing
//! (single price or ladder), with optional dynamic stepping inside the
//! best offers.

pub mod ladder;
pub mod pricing;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{BidStrategy, EngineSettings, GroupSettings, ReferenceMethod};
use crate::engine::snapshot::MarketSnapshot;
use crate::types::{BidPlan, OfferSide, PricePlan};
use ladder::{ladder_allocation, single_quantity, PriceBounds};
use pricing::{
    apply_floor, bid_ceiling, cheapest_n_average, depth_weighted_average, dynamic_adjust,
    premium_multiplier, quantize, QuantizeMode,
};

/// Computes price plans from validated settings.
pub struct PricePlanner<'a> {
    settings: &'a EngineSettings,
}

impl<'a> PricePlanner<'a> {
    pub fn new(settings: &'a EngineSettings) -> Self {
        Self { settings }
    }

    /// Reference price for the group, after the configured floor.
    /// `None` when the sell side is empty or prices to zero.
    pub fn reference_price(&self, group: &GroupSettings, snapshot: &MarketSnapshot) -> Option<Decimal> {
        let raw = match group.reference {
            ReferenceMethod::CheapestN(n) => cheapest_n_average(&snapshot.sells, n),
            ReferenceMethod::DepthWeighted(depth) => depth_weighted_average(&snapshot.sells, depth),
        };
        if raw <= Decimal::ZERO {
            return None;
        }
        Some(apply_floor(raw, group.price_floor))
    }

    /// Build the plan for one group with `budget` sats available for bids.
    pub fn plan(
        &self,
        group: &GroupSettings,
        snapshot: &MarketSnapshot,
        budget: Decimal,
    ) -> Option<PricePlan> {
        let Some(lowest_sell) = snapshot.lowest_sell() else {
            debug!(group = %group.group, "No sell offers, nothing to plan");
            return None;
        };
        let reference_price = self.reference_price(group, snapshot)?;

        let mut listing_price = round_listing(group, reference_price * group.list_above);
        if group.dynamic_pricing {
            listing_price = round_listing(
                group,
                dynamic_adjust(listing_price, Some(lowest_sell), OfferSide::Sell, self.settings.tick),
            );
        }

        let max_bid_price = bid_ceiling(lowest_sell, self.settings.max_bid_to_list_ratio, group.bid_quantum);
        let bounds = PriceBounds {
            min_price: group.min_bid_price,
            max_price: max_bid_price,
            quantum: group.bid_quantum,
        };
        let budget = budget.max(Decimal::ZERO);

        let bid_plan = match &group.bid_strategy {
            BidStrategy::Single { bid_below } => {
                let mut target = reference_price * *bid_below;
                if group.dynamic_pricing {
                    target = dynamic_adjust(target, snapshot.best_buy(), OfferSide::Buy, self.settings.tick);
                }
                let price = bounds.clamp(target);
                BidPlan::Single { price, quantity: single_quantity(budget, price) }
            }
            BidStrategy::Ladder { steps } => BidPlan::Ladder {
                steps: ladder_allocation(reference_price, steps, budget, &bounds),
            },
        };

        let plan = PricePlan { reference_price, listing_price, max_bid_price, bid_plan };
        debug!(group = %group.group, plan = %plan, budget = %budget, "Price plan");
        Some(plan)
    }

    /// Listing price for one held asset, applying any premium override.
    pub fn listing_price_for(&self, group: &GroupSettings, plan: &PricePlan, asset_id: &str) -> Decimal {
        match self.settings.premiums.get(asset_id) {
            Some(rule) => {
                let multiplier = premium_multiplier(rule, plan.reference_price);
                let price = round_listing(group, plan.reference_price * multiplier);
                debug!(asset = asset_id, multiplier = %multiplier, price = %price, "Premium listing price");
                price
            }
            None => plan.listing_price,
        }
    }
}

fn round_listing(group: &GroupSettings, price: Decimal) -> Decimal {
    match group.listing_quantum {
        Some(q) => quantize(price, q, QuantizeMode::Down),
        None => price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LadderStepConfig, PremiumConfig, PremiumTier};
    use crate::types::{MarketOffer, Protocol};
    use rust_decimal_macros::dec;

    fn snapshot(sells: &[(Decimal, Decimal)], buys: &[Decimal]) -> MarketSnapshot {
        MarketSnapshot {
            sells: sells
                .iter()
                .enumerate()
                .map(|(i, (p, q))| MarketOffer::sample(&format!("s{i}"), *p, *q))
                .collect(),
            buys: buys
                .iter()
                .enumerate()
                .map(|(i, p)| MarketOffer {
                    side: OfferSide::Buy,
                    ..MarketOffer::sample(&format!("b{i}"), *p, dec!(1))
                })
                .collect(),
        }
    }

    #[test]
    fn test_reference_markup_and_discount() {
        let mut group = GroupSettings::sample("g", Protocol::Ordinals);
        group.reference = ReferenceMethod::CheapestN(2);
        group.bid_quantum = Some(Decimal::ONE);
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);

        let snap = snapshot(&[(dec!(100), dec!(5)), (dec!(110), dec!(10))], &[]);
        let plan = planner.plan(&group, &snap, dec!(1000)).unwrap();
        assert_eq!(plan.reference_price, dec!(105));
        assert_eq!(plan.listing_price, dec!(126));
        assert_eq!(plan.max_bid_price, dec!(90));
        assert_eq!(plan.bid_plan, BidPlan::Single { price: dec!(84), quantity: 11 });
    }

    #[test]
    fn test_bid_rounds_to_thousand_sats() {
        let mut group = GroupSettings::sample("g", Protocol::Ordinals);
        group.reference = ReferenceMethod::CheapestN(2);
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);

        let snap = snapshot(&[(dec!(100400), dec!(1)), (dec!(110000), dec!(1))], &[]);
        let plan = planner.plan(&group, &snap, dec!(500000)).unwrap();
        // 105200 * 0.8 = 84160 -> 84000.
        assert_eq!(plan.bid_plan, BidPlan::Single { price: dec!(84000), quantity: 5 });
        assert_eq!(plan.listing_price, dec!(126240));
    }

    #[test]
    fn test_bid_capped_by_lowest_listing() {
        let mut group = GroupSettings::sample("g", Protocol::Ordinals);
        group.reference = ReferenceMethod::CheapestN(3);
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);

        // One cheap outlier drags the ceiling well under 0.8x the average.
        let snap = snapshot(&[(dec!(50000), dec!(1)), (dec!(200000), dec!(1)), (dec!(200000), dec!(1))], &[]);
        let plan = planner.plan(&group, &snap, dec!(1000000)).unwrap();
        assert_eq!(plan.max_bid_price, dec!(45000));
        assert_eq!(plan.bid_plan, BidPlan::Single { price: dec!(45000), quantity: 22 });
    }

    #[test]
    fn test_empty_sells_short_circuits() {
        let group = GroupSettings::sample("g", Protocol::Ordinals);
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);
        assert!(planner.plan(&group, &MarketSnapshot::default(), dec!(1000)).is_none());
    }

    #[test]
    fn test_floor_raises_reference() {
        let mut group = GroupSettings::sample("g", Protocol::Ordinals);
        group.price_floor = Some(dec!(200000));
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);
        let snap = snapshot(&[(dec!(100000), dec!(1))], &[]);
        let plan = planner.plan(&group, &snap, Decimal::ZERO).unwrap();
        assert_eq!(plan.reference_price, dec!(200000));
        assert_eq!(plan.listing_price, dec!(240000));
        // Budget zero: no quantity, and the ceiling still binds.
        assert_eq!(plan.bid_plan, BidPlan::Single { price: dec!(90000), quantity: 0 });
    }

    #[test]
    fn test_runes_depth_ladder_real_valued() {
        let mut group = GroupSettings::sample("dog", Protocol::Runes);
        group.reference = ReferenceMethod::DepthWeighted(dec!(1000000));
        group.bid_strategy = BidStrategy::Ladder {
            steps: vec![
                LadderStepConfig { price_percent: dec!(0.9), allocation: dec!(0.5) },
                LadderStepConfig { price_percent: dec!(0.7), allocation: dec!(0.5) },
            ],
        };
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);

        let snap = snapshot(&[(dec!(0.1), dec!(100000000))], &[]);
        let plan = planner.plan(&group, &snap, dec!(10000)).unwrap();
        assert_eq!(plan.reference_price, dec!(0.1));
        assert_eq!(plan.listing_price, dec!(0.12));
        match plan.bid_plan {
            BidPlan::Ladder { steps } => {
                assert_eq!(steps.len(), 2);
                // Ceiling 0.09 equals the first step.
                assert_eq!(steps[0].price, dec!(0.09));
                assert_eq!(steps[1].price, dec!(0.07));
                let spent: Decimal = steps.iter().map(|s| s.cost()).sum();
                assert!(spent <= dec!(10000));
            }
            other => panic!("expected ladder, got {other}"),
        }
    }

    #[test]
    fn test_dynamic_pricing_steps_inside_spread() {
        let mut group = GroupSettings::sample("g", Protocol::Ordinals);
        group.reference = ReferenceMethod::CheapestN(1);
        group.list_above = dec!(1.005);
        group.dynamic_pricing = true;
        let settings = EngineSettings::sample(vec![group.clone()]);
        let planner = PricePlanner::new(&settings);

        let snap = snapshot(&[(dec!(100000), dec!(1))], &[dec!(80500)]);
        let plan = planner.plan(&group, &snap, dec!(1000000)).unwrap();
        // 100500 is within 1% above the best listing: undercut by one tick.
        assert_eq!(plan.listing_price, dec!(99000));
        // Bid 80000 is within 1% below the best bid: outbid by a tick, then snap to the grid.
        assert_eq!(plan.bid_plan, BidPlan::Single { price: dec!(82000), quantity: 12 });
    }

    #[test]
    fn test_premium_listing_override() {
        let group = GroupSettings::sample("g", Protocol::Ordinals);
        let mut settings = EngineSettings::sample(vec![group.clone()]);
        settings.premiums.insert(
            "rare".to_string(),
            PremiumConfig {
                multiplier: dec!(3),
                tiers: vec![PremiumTier { min_reference: dec!(150000), multiplier: dec!(2) }],
            },
        );
        let planner = PricePlanner::new(&settings);
        let snap = snapshot(&[(dec!(100000), dec!(1))], &[]);
        let plan = planner.plan(&group, &snap, Decimal::ZERO).unwrap();

        assert_eq!(planner.listing_price_for(&group, &plan, "rare"), dec!(300000));
        assert_eq!(planner.listing_price_for(&group, &plan, "plain"), dec!(120000));
    }
}
