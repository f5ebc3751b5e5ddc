//! Shared types for the SATMAKER agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wallet::SigningError;

// ---------------------------------------------------------------------------
// Asset groups
// ---------------------------------------------------------------------------

/// Asset protocol. Selects the collection manager that handles a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Non-fungible inscriptions priced per item.
    Ordinals,
    /// Fungible tokens priced per unit.
    Runes,
}

impl Protocol {
    /// Whether units of this protocol are interchangeable.
    pub fn is_fungible(&self) -> bool {
        matches!(self, Protocol::Runes)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ordinals => write!(f, "ordinals"),
            Protocol::Runes => write!(f, "runes"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ordinals" | "ordinal" | "inscriptions" => Ok(Protocol::Ordinals),
            "runes" | "rune" => Ok(Protocol::Runes),
            _ => Err(anyhow::anyhow!("Unknown protocol: {s}")),
        }
    }
}

/// A collection or fungible-token ticker whose members are priced together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGroup {
    /// Configuration key, e.g. "nodemonkes" or "dog".
    pub id: String,
    pub protocol: Protocol,
    /// Key used by order-book feeds (collection symbol or rune API ticker).
    pub market_symbol: String,
    /// Key used by the marketplace for bids and holdings
    /// (collection id or full spaced rune name).
    pub bid_slug: String,
    /// Decimal places of a fungible token; 0 for inscriptions.
    pub divisibility: u8,
    pub symbol: Option<String>,
}

impl fmt::Display for AssetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.id)
    }
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

/// Which side of the book an offer rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferSide {
    Sell,
    Buy,
}

impl OfferSide {
    pub fn opposite(&self) -> Self {
        match self {
            OfferSide::Sell => OfferSide::Buy,
            OfferSide::Buy => OfferSide::Sell,
        }
    }
}

impl fmt::Display for OfferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferSide::Sell => write!(f, "SELL"),
            OfferSide::Buy => write!(f, "BUY"),
        }
    }
}

/// A single resting offer observed on a marketplace. Rebuilt every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOffer {
    /// Feed name, e.g. "magiceden".
    pub source: String,
    pub side: OfferSide,
    /// Inscription id, or order id for fungible orders.
    pub asset_id: String,
    /// Price per unit in sats. Fractional for fungible tokens.
    pub unit_price: Decimal,
    pub quantity: Decimal,
    /// Seller (sell side) or bidder (buy side) address, when known.
    pub owner: Option<String>,
}

impl fmt::Display for MarketOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} x{} @ {} sats",
            self.source, self.side, self.asset_id, self.quantity, self.unit_price,
        )
    }
}

impl MarketOffer {
    /// Total sats needed to take the whole offer.
    pub fn total_value(&self) -> Decimal {
        self.unit_price * self.quantity
    }

    /// Helper to build a test offer with sensible defaults.
    #[cfg(test)]
    pub fn sample(asset_id: &str, unit_price: Decimal, quantity: Decimal) -> Self {
        MarketOffer {
            source: "magiceden".to_string(),
            side: OfferSide::Sell,
            asset_id: asset_id.to_string(),
            unit_price,
            quantity,
            owner: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Marketplace-owned orders
// ---------------------------------------------------------------------------

/// Kind of standing bid as reported by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BidKind {
    /// Collection-wide bid on any inscription of a collection.
    Collection,
    /// Bid on an amount of a rune.
    Rune,
    Other,
}

/// One of our standing bids. Owned by the marketplace; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenBid {
    pub id: String,
    pub kind: BidKind,
    /// Collection ids or rune names the bid targets.
    pub group_keys: Vec<String>,
    /// Total sats committed by the bid.
    pub total_price: Decimal,
    /// Units requested (items or tokens). Treated as 1 when absent.
    pub quantity: Decimal,
    pub expiry: Option<DateTime<Utc>>,
}

impl OpenBid {
    /// Price per unit, derived from the total price and quantity metadata.
    pub fn unit_price(&self) -> Decimal {
        if self.quantity > Decimal::ZERO {
            self.total_price / self.quantity
        } else {
            self.total_price
        }
    }

    pub fn targets(&self, kind: BidKind, key: &str) -> bool {
        self.kind == kind && self.group_keys.iter().any(|k| k == key)
    }
}

impl fmt::Display for OpenBid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bid {} x{} @ {} sats/unit (total {})",
            self.id,
            self.quantity,
            self.unit_price().round_dp(6),
            self.total_price,
        )
    }
}

/// One of our open listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenListing {
    pub asset_id: String,
    /// Price per unit in sats.
    pub price: Decimal,
}

/// An asset held by the operator's wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldAsset {
    pub asset_id: String,
    /// Collection id or rune name as reported by the marketplace.
    pub group_key: String,
    /// 1 for inscriptions; token amount for runes.
    pub quantity: Decimal,
    pub listing: Option<OpenListing>,
}

// ---------------------------------------------------------------------------
// Price plans
// ---------------------------------------------------------------------------

/// One rung of a bid ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderStep {
    /// Fraction of the reference price, e.g. 0.9.
    pub price_percent: Decimal,
    /// Fraction of the budget assigned to this step.
    pub allocation: Decimal,
    /// Unit price after clamping and quantization.
    pub price: Decimal,
    pub quantity: u64,
}

impl LadderStep {
    pub fn cost(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Desired set of standing bids for a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BidPlan {
    Single { price: Decimal, quantity: u64 },
    Ladder { steps: Vec<LadderStep> },
}

impl BidPlan {
    /// Sats committed if every order in the plan is created.
    pub fn total_cost(&self) -> Decimal {
        match self {
            BidPlan::Single { price, quantity } => *price * Decimal::from(*quantity),
            BidPlan::Ladder { steps } => steps.iter().map(LadderStep::cost).sum(),
        }
    }

    /// `(unit_price, quantity)` per order, in declared order.
    pub fn orders(&self) -> Vec<(Decimal, u64)> {
        match self {
            BidPlan::Single { price, quantity } => vec![(*price, *quantity)],
            BidPlan::Ladder { steps } => steps.iter().map(|s| (s.price, s.quantity)).collect(),
        }
    }

    pub fn is_ladder(&self) -> bool {
        matches!(self, BidPlan::Ladder { .. })
    }
}

impl fmt::Display for BidPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BidPlan::Single { price, quantity } => write!(f, "single {quantity} @ {price}"),
            BidPlan::Ladder { steps } => {
                let parts: Vec<String> = steps
                    .iter()
                    .map(|s| format!("{} @ {}", s.quantity, s.price))
                    .collect();
                write!(f, "ladder [{}]", parts.join(", "))
            }
        }
    }
}

/// Everything the engine needs to reconcile one group this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePlan {
    pub reference_price: Decimal,
    pub listing_price: Decimal,
    /// Highest bid price allowed by the bid-to-list ratio.
    pub max_bid_price: Decimal,
    pub bid_plan: BidPlan,
}

impl fmt::Display for PricePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ref={} list={} max_bid={} bids={}",
            self.reference_price.round_dp(6),
            self.listing_price.round_dp(6),
            self.max_bid_price.round_dp(6),
            self.bid_plan,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SATMAKER.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No usable market data for {group}")]
    MarketDataUnavailable { group: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Budget exhausted for {group}: {detail}")]
    BudgetExceeded { group: String, detail: String },

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Submission failed ({operation}): {message}")]
    Submission { operation: String, message: String },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Errors that stop the whole cycle rather than one group or item.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::AuthenticationFailure(_) | EngineError::InvalidConfig(_)
        )
    }

    pub fn submission(operation: &str, err: impl fmt::Display) -> Self {
        EngineError::Submission {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
