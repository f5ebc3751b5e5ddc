//! Marketplace integrations.
//!
//! Defines the two collaborator traits the engine talks to and provides
//! implementations for:
//! - Magic Eden: read-only order book (`MarketFeed`)
//! - Satflow: holdings, bids and listings (`Marketplace`)
//!
//! Request/response payloads that cross the trait boundary live here so
//! the engine never depends on a specific client.

pub mod magiceden;
pub mod satflow;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AssetGroup, HeldAsset, MarketOffer, OpenBid, OpenListing, Protocol};

/// Read-only source of resting offers for an asset group.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Feed name for logging and `MarketOffer::source`.
    fn name(&self) -> &str;

    /// Multiplier bringing this feed's prices to an all-in basis.
    fn fee_multiplier(&self) -> Decimal {
        Decimal::ONE
    }

    async fn fetch_sell_offers(&self, group: &AssetGroup) -> Result<Vec<MarketOffer>>;

    async fn fetch_buy_offers(&self, group: &AssetGroup) -> Result<Vec<MarketOffer>>;
}

/// The marketplace that holds our bids and listings and accepts signed PSBTs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Fresh authentication challenge for `address`.
    async fn fetch_challenge(&self, address: &str) -> Result<String>;

    /// Address of the escrow wallet that funds our bids.
    async fn bidding_address(&self, address: &str, public_key_hex: &str) -> Result<String>;

    /// Confirmed plus mempool balance of the bidding wallet, in sats.
    async fn bidding_balance(&self, bidding_address: &str) -> Result<Decimal>;

    async fn fetch_holdings(&self, address: &str, protocol: Protocol) -> Result<Vec<HeldAsset>>;

    async fn fetch_open_bids(&self, address: &str) -> Result<Vec<OpenBid>>;

    /// Our live listings for one protocol. Listing prices are totals: the
    /// per-item price for inscriptions, the whole balance's price for runes.
    async fn fetch_open_listings(&self, address: &str, protocol: Protocol) -> Result<Vec<OpenListing>>;

    async fn submit_cancellation(&self, request: &CancelRequest) -> Result<()>;

    async fn submit_bid_creation(&self, submission: &BidSubmission) -> Result<()>;

    /// Ask the marketplace to build the listing PSBTs for an asset.
    async fn get_unsigned_template(&self, request: &ListingRequest) -> Result<ListingTemplate>;

    async fn submit_signed_listing(&self, listing: &SignedListing) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// Cancel a batch of bids, authenticated by the cycle's challenge signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub address: String,
    pub signature: String,
    #[serde(rename = "bidIds")]
    pub bid_ids: Vec<String>,
}

/// Create one bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidSubmission {
    pub bid_expiry: i64,
    pub bidder_payment_address: String,
    pub bidder_payment_address_pubkey: String,
    pub bidder_token_receive_address: String,
    pub meta_type: Protocol,
    pub collection_slug: String,
    /// Per item for collection bids, total for token bids.
    pub price: u64,
    pub quantity: u64,
    pub signed_bidding_message: String,
    pub timestamp: i64,
    /// Challenge auth, required by token bids.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

/// Listing intent for one held asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRequest {
    /// Total asking price in sats.
    pub price: u64,
    pub inscription_id: String,
    pub collection_slug: String,
    pub ord_address: String,
    pub receive_address: String,
    pub tap_key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta_type: Option<Protocol>,
    /// Token amount for fungible listings.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<String>,
}

/// Extra template that must be signed with `ALL|ANYONECANPAY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureTemplate {
    pub base64: String,
    #[serde(rename = "indicesToSign", default)]
    pub indices_to_sign: Vec<usize>,
}

/// Unsigned listing PSBTs returned by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingTemplate {
    /// Primary template; input 0 is signed `SINGLE|ANYONECANPAY`.
    pub unsigned_primary: String,
    pub secure: Vec<SecureTemplate>,
}

/// Signed listing handed back for publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedListing {
    pub signed_listing_psbt: String,
    pub unsigned_listing_psbt: String,
    pub signed_secure_listing_psbts: Vec<String>,
    pub listings: Vec<ListingRequest>,
}
