//! Listing reconciliation: keep, create or reprice one held asset.

use rust_decimal::Decimal;
use std::fmt;

use super::bids::relative_change;
use crate::types::OpenListing;

#[derive(Debug, Clone, PartialEq)]
pub enum ListingDecision {
    /// Current listing is within the update threshold, or no usable price.
    Skip { current: Option<Decimal>, target: Decimal },
    /// Asset is not listed yet.
    List { price: Decimal },
    /// Listed, but the price drifted past the threshold.
    Reprice { from: Decimal, to: Decimal },
}

impl ListingDecision {
    /// Price to list at, when the decision requires a listing call.
    pub fn price(&self) -> Option<Decimal> {
        match self {
            ListingDecision::Skip { .. } => None,
            ListingDecision::List { price } => Some(*price),
            ListingDecision::Reprice { to, .. } => Some(*to),
        }
    }
}

impl fmt::Display for ListingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingDecision::Skip { current: Some(c), target } => write!(f, "skip ({c} within threshold of {target})"),
            ListingDecision::Skip { current: None, target } => write!(f, "skip (unusable target {target})"),
            ListingDecision::List { price } => write!(f, "list @ {price}"),
            ListingDecision::Reprice { from, to } => write!(f, "reprice {from} -> {to}"),
        }
    }
}

/// Decide what to do with one asset. A change of exactly `threshold` is kept.
pub fn decide(existing: Option<&OpenListing>, target: Decimal, threshold: Decimal) -> ListingDecision {
    if target <= Decimal::ZERO {
        return ListingDecision::Skip { current: existing.map(|l| l.price), target };
    }
    match existing {
        None => ListingDecision::List { price: target },
        Some(listing) => {
            if relative_change(listing.price, target) <= threshold {
                ListingDecision::Skip { current: Some(listing.price), target }
            } else {
                ListingDecision::Reprice { from: listing.price, to: target }
            }
        }
    }
}
