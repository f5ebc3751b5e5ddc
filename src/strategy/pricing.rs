//! Reference price and price-adjustment primitives.
//!
//! All functions are pure and operate on `Decimal` sats. Offers are
//! expected to be pre-filtered (positive price and quantity) by the
//! snapshot builder but are re-sorted here where order matters.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::config::PremiumConfig;
use crate::types::{MarketOffer, OfferSide};

/// Width of the band in which dynamic pricing steps inside the best offer.
const DYNAMIC_BAND: Decimal = dec!(0.01);

/// Mean unit price of the `n` cheapest offers. Zero when there are none.
pub fn cheapest_n_average(offers: &[MarketOffer], n: usize) -> Decimal {
    if n == 0 {
        return Decimal::ZERO;
    }
    let mut prices: Vec<Decimal> = offers.iter().map(|o| o.unit_price).collect();
    prices.sort();
    let slice = &prices[..prices.len().min(n)];
    if slice.is_empty() {
        return Decimal::ZERO;
    }
    slice.iter().copied().sum::<Decimal>() / Decimal::from(slice.len())
}

/// Quantity-weighted mean price of the cheapest offers that could be bought
/// with `budget` sats. The last offer is taken partially.
pub fn depth_weighted_average(offers: &[MarketOffer], budget: Decimal) -> Decimal {
    if offers.is_empty() || budget <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut sorted: Vec<&MarketOffer> = offers
        .iter()
        .filter(|o| o.unit_price > Decimal::ZERO && o.quantity > Decimal::ZERO)
        .collect();
    sorted.sort_by(|a, b| a.unit_price.cmp(&b.unit_price));

    let mut remaining = budget;
    let mut units = Decimal::ZERO;
    let mut spent = Decimal::ZERO;

    for offer in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        let value = offer.total_value();
        let (take, cost) = if value <= remaining {
            (offer.quantity, value)
        } else {
            (remaining / offer.unit_price, remaining)
        };
        units += take;
        spent += offer.unit_price * take;
        remaining -= cost;
    }

    if units > Decimal::ZERO {
        spent / units
    } else {
        Decimal::ZERO
    }
}

/// `max(reference, floor)` when a floor is configured.
pub fn apply_floor(reference: Decimal, floor: Option<Decimal>) -> Decimal {
    match floor {
        Some(f) if f > reference => f,
        _ => reference,
    }
}

/// How `quantize` rounds onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeMode {
    /// Half away from zero.
    Nearest,
    Down,
}

/// Round `price` to a multiple of `quantum`.
pub fn quantize(price: Decimal, quantum: Decimal, mode: QuantizeMode) -> Decimal {
    if quantum <= Decimal::ZERO {
        return price;
    }
    let steps = price / quantum;
    let whole = match mode {
        QuantizeMode::Nearest => steps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        QuantizeMode::Down => steps.floor(),
    };
    whole * quantum
}

/// Step inside the best opposing price when the target is within 1% of it.
///
/// Sell side: `best <= target <= best * 1.01` returns `best - tick`.
/// Buy side: `best * 0.99 <= target <= best` returns `best + tick`.
/// Anything else, or no best offer, returns `target` unchanged.
pub fn dynamic_adjust(
    target: Decimal,
    best: Option<Decimal>,
    side: OfferSide,
    tick: Decimal,
) -> Decimal {
    let Some(best) = best else {
        return target;
    };
    match side {
        OfferSide::Sell => {
            if target >= best && target <= best * (Decimal::ONE + DYNAMIC_BAND) {
                best - tick
            } else {
                target
            }
        }
        OfferSide::Buy => {
            if target <= best && target >= best * (Decimal::ONE - DYNAMIC_BAND) {
                best + tick
            } else {
                target
            }
        }
    }
}

/// Multiplier for a premium asset: the highest tier whose `min_reference`
/// the reference price reaches, else the base multiplier.
pub fn premium_multiplier(rule: &PremiumConfig, reference: Decimal) -> Decimal {
    rule.tiers
        .iter()
        .filter(|t| reference >= t.min_reference)
        .max_by(|a, b| a.min_reference.cmp(&b.min_reference))
        .map(|t| t.multiplier)
        .unwrap_or(rule.multiplier)
}

/// Highest bid allowed: `lowest_sell * ratio`, rounded down onto `quantum`.
pub fn bid_ceiling(lowest_sell: Decimal, ratio: Decimal, quantum: Option<Decimal>) -> Decimal {
    let raw = lowest_sell * ratio;
    match quantum {
        Some(q) => quantize(raw, q, QuantizeMode::Down),
        None => raw,
    }
}
