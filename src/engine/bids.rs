//! Bid reconciliation.
//!
//! Compares the bids we already have open for a group against the plan
//! for this cycle and decides between leaving them alone and replacing
//! the whole set. Replacement is always one cancel covering every
//! existing bid followed by one create per planned order, so two
//! generations of bids never coexist.

use rust_decimal::Decimal;
use std::fmt;

use crate::types::{BidPlan, OpenBid};

/// Decimal places used when grouping bids into price levels.
const LEVEL_PRECISION: u32 = 8;

/// Outcome class for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidState {
    /// No existing bids; create whatever the plan asks for.
    NoBids,
    Unchanged,
    NeedsCancelAndRecreate,
}

impl fmt::Display for BidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BidState::NoBids => write!(f, "no-bids"),
            BidState::Unchanged => write!(f, "unchanged"),
            BidState::NeedsCancelAndRecreate => write!(f, "recreate"),
        }
    }
}

/// One bid to create.
#[derive(Debug, Clone, PartialEq)]
pub struct BidOrder {
    /// Position in the plan (0 for single bids).
    pub step: usize,
    pub unit_price: Decimal,
    pub quantity: u64,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BidOperation {
    Cancel { bid_ids: Vec<String> },
    Create(BidOrder),
}

/// Decision for one group, with the operations to carry it out in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: BidState,
    pub reason: String,
    pub operations: Vec<BidOperation>,
}

impl Reconciliation {
    fn unchanged(reason: impl Into<String>) -> Self {
        Self { state: BidState::Unchanged, reason: reason.into(), operations: Vec::new() }
    }

    pub fn cancel_ids(&self) -> Vec<String> {
        self.operations
            .iter()
            .flat_map(|op| match op {
                BidOperation::Cancel { bid_ids } => bid_ids.clone(),
                BidOperation::Create(_) => Vec::new(),
            })
            .collect()
    }

    pub fn creates(&self) -> Vec<&BidOrder> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                BidOperation::Create(order) => Some(order),
                BidOperation::Cancel { .. } => None,
            })
            .collect()
    }
}

/// Thresholds for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileParams {
    /// Relative price change that forces a reprice. Strict: equal is kept.
    pub update_threshold: Decimal,
    /// Relative quantity drift tolerated per ladder step.
    pub quantity_tolerance: Decimal,
    /// Ceiling on the summed value of the group's open bids.
    pub ceiling: Option<Decimal>,
    /// Highest unit price an open bid may stand at.
    pub max_price: Option<Decimal>,
}

/// Existing bids sharing one unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub bid_ids: Vec<String>,
}

/// Group bids by unit price, highest first.
pub fn price_levels(bids: &[OpenBid]) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = Vec::new();
    for bid in bids {
        let unit_price = bid.unit_price().round_dp(LEVEL_PRECISION).normalize();
        let quantity = if bid.quantity > Decimal::ZERO { bid.quantity } else { Decimal::ONE };
        match levels.iter_mut().find(|l| l.unit_price == unit_price) {
            Some(level) => {
                level.quantity += quantity;
                level.bid_ids.push(bid.id.clone());
            }
            None => levels.push(PriceLevel { unit_price, quantity, bid_ids: vec![bid.id.clone()] }),
        }
    }
    levels.sort_by(|a, b| b.unit_price.cmp(&a.unit_price));
    levels
}

/// Planned orders merged by unit price, highest first. Steps clamped or
/// rounded onto the same price reconcile as one level.
fn desired_levels(desired: &[BidOrder]) -> Vec<(Decimal, Decimal)> {
    let mut levels: Vec<(Decimal, Decimal)> = Vec::new();
    for order in desired {
        let unit_price = order.unit_price.round_dp(LEVEL_PRECISION).normalize();
        let quantity = Decimal::from(order.quantity);
        match levels.iter_mut().find(|(p, _)| *p == unit_price) {
            Some((_, q)) => *q += quantity,
            None => levels.push((unit_price, quantity)),
        }
    }
    levels.sort_by(|a, b| b.0.cmp(&a.0));
    levels
}

/// `|old - new| / old`. A zero old price counts as fully changed.
pub fn relative_change(old: Decimal, new: Decimal) -> Decimal {
    if old.is_zero() {
        return if new.is_zero() { Decimal::ZERO } else { Decimal::ONE };
    }
    ((old - new) / old).abs()
}

/// Decide what to do with `existing` bids given this cycle's `plan`.
pub fn reconcile(existing: &[OpenBid], plan: &BidPlan, params: &ReconcileParams) -> Reconciliation {
    let desired: Vec<BidOrder> = plan
        .orders()
        .into_iter()
        .enumerate()
        .filter(|(_, (price, qty))| *qty > 0 && *price > Decimal::ZERO)
        .map(|(step, (unit_price, quantity))| BidOrder {
            step,
            unit_price,
            quantity,
            total_price: unit_price * Decimal::from(quantity),
        })
        .collect();

    if existing.is_empty() {
        let reason = if desired.is_empty() {
            "no existing bids and nothing to place".to_string()
        } else {
            format!("placing {} new order(s)", desired.len())
        };
        return Reconciliation {
            state: BidState::NoBids,
            reason,
            operations: desired.into_iter().map(BidOperation::Create).collect(),
        };
    }

    let existing_total: Decimal = existing.iter().map(|b| b.total_price).sum();
    if let Some(ceiling) = params.ceiling {
        if existing_total > ceiling {
            return recreate(
                existing,
                desired,
                format!("open bids total {existing_total} exceeds ceiling {ceiling}"),
            );
        }
    }

    let levels = price_levels(existing);

    if let Some(max_price) = params.max_price {
        let limit = max_price.round_dp(LEVEL_PRECISION);
        if let Some(top) = levels.first().filter(|l| l.unit_price > limit) {
            return recreate(
                existing,
                desired,
                format!("open bid at {} above bid ceiling {max_price}", top.unit_price),
            );
        }
    }

    if desired.is_empty() {
        return without_orders(existing, &levels, plan, params);
    }

    let mismatch = if plan.is_ladder() {
        ladder_mismatch(&levels, &desired, params)
    } else {
        single_mismatch(&levels, &desired[0], params)
    };

    match mismatch {
        Some(reason) => recreate(existing, desired, reason),
        None => Reconciliation::unchanged("existing bids match plan"),
    }
}

/// Nothing to place this cycle. Bids still priced within threshold of the
/// plan are kept; stale ones are cancelled without replacement.
fn without_orders(
    existing: &[OpenBid],
    levels: &[PriceLevel],
    plan: &BidPlan,
    params: &ReconcileParams,
) -> Reconciliation {
    if let BidPlan::Single { price, .. } = plan {
        if *price > Decimal::ZERO {
            let stale = levels
                .iter()
                .find(|l| relative_change(l.unit_price, *price) > params.update_threshold);
            if let Some(level) = stale {
                return recreate(
                    existing,
                    Vec::new(),
                    format!("price moved ({} -> {price}) with no capacity to replace", level.unit_price),
                );
            }
        }
    }
    Reconciliation::unchanged("plan has no orders; existing bids still in range")
}

fn recreate(existing: &[OpenBid], desired: Vec<BidOrder>, reason: String) -> Reconciliation {
    let mut operations = Vec::with_capacity(desired.len() + 1);
    operations.push(BidOperation::Cancel {
        bid_ids: existing.iter().map(|b| b.id.clone()).collect(),
    });
    operations.extend(desired.into_iter().map(BidOperation::Create));
    Reconciliation { state: BidState::NeedsCancelAndRecreate, reason, operations }
}

fn single_mismatch(levels: &[PriceLevel], order: &BidOrder, params: &ReconcileParams) -> Option<String> {
    if levels.len() > 1 {
        return Some(format!("{} price levels open for a single-price plan", levels.len()));
    }
    let level = &levels[0];
    let change = relative_change(level.unit_price, order.unit_price);
    if change > params.update_threshold {
        return Some(format!(
            "price moved {}% ({} -> {})",
            (change * Decimal::ONE_HUNDRED).round_dp(2),
            level.unit_price,
            order.unit_price
        ));
    }
    let planned = Decimal::from(order.quantity);
    if planned > level.quantity {
        return Some(format!("capacity grew from {} to {}", level.quantity, planned));
    }
    None
}

fn ladder_mismatch(levels: &[PriceLevel], desired: &[BidOrder], params: &ReconcileParams) -> Option<String> {
    let wanted = desired_levels(desired);
    if levels.len() != wanted.len() {
        return Some(format!("ladder has {} open steps, plan wants {}", levels.len(), wanted.len()));
    }

    for (i, (level, (price, planned))) in levels.iter().zip(wanted).enumerate() {
        let change = relative_change(level.unit_price, price);
        if change > params.update_threshold {
            return Some(format!("step {i} price {} -> {}", level.unit_price, price));
        }
        if relative_change(planned, level.quantity) > params.quantity_tolerance {
            return Some(format!("step {i} quantity {} -> {}", level.quantity, planned));
        }
    }
    None
}
