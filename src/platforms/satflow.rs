//! Satflow marketplace client.
//!
//! Holds our bids and listings, builds listing PSBTs and accepts them back
//! signed. Bids are funded from a marketplace-managed bidding wallet whose
//! balance is read from the Satflow mempool API.
//!
//! API base: https://native.satflow.com
//! Auth: `x-api-key` header on every call; write calls additionally carry
//! a signature over a per-address challenge.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    BidSubmission, CancelRequest, ListingRequest, ListingTemplate, Marketplace, SecureTemplate,
    SignedListing,
};
use crate::types::{BidKind, HeldAsset, OpenBid, OpenListing, Protocol};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const WALLET_PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Debug, Deserialize)]
struct BiddingAddressResponse {
    #[serde(rename = "multiSig", default)]
    multi_sig: Option<MultiSig>,
    #[serde(default)]
    data: Option<Box<BiddingAddressResponse>>,
}

#[derive(Debug, Deserialize)]
struct MultiSig {
    address: String,
}

impl BiddingAddressResponse {
    fn into_address(self) -> Option<String> {
        match self.multi_sig {
            Some(m) => Some(m.address),
            None => self.data.and_then(|d| d.into_address()),
        }
    }
}

/// Esplora `/address/{addr}` body.
#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: TxoStats,
    mempool_stats: TxoStats,
}

#[derive(Debug, Deserialize)]
struct TxoStats {
    funded_txo_sum: i64,
    spent_txo_sum: i64,
}

impl AddressStats {
    fn balance(&self) -> i64 {
        (self.chain_stats.funded_txo_sum - self.chain_stats.spent_txo_sum)
            + (self.mempool_stats.funded_txo_sum - self.mempool_stats.spent_txo_sum)
    }
}

#[derive(Debug, Deserialize)]
struct WalletContentsResponse {
    #[serde(default)]
    results: Option<WalletContentsResults>,
}

#[derive(Debug, Deserialize)]
struct WalletContentsResults {
    #[serde(default)]
    items: Vec<WalletItem>,
}

#[derive(Debug, Deserialize)]
struct WalletItem {
    #[serde(default)]
    token: Option<ItemToken>,
    #[serde(default)]
    collection: Option<ItemCollection>,
    #[serde(default)]
    rune: Option<ItemRune>,
    #[serde(default)]
    listing: Option<ItemListing>,
}

#[derive(Debug, Deserialize)]
struct ItemToken {
    inscription_id: String,
}

#[derive(Debug, Deserialize)]
struct ItemCollection {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ItemRune {
    name: String,
    #[serde(default)]
    amount: Option<String>,
    /// Outpoint carrying the balance; used as the asset id.
    #[serde(default)]
    utxo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemListing {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct WalletBidsResponse {
    #[serde(default)]
    results: Vec<WalletBid>,
}

#[derive(Debug, Deserialize)]
struct WalletBid {
    bid_id: String,
    #[serde(rename = "type")]
    kind: String,
    price: Decimal,
    #[serde(default)]
    quantity: Option<Decimal>,
    #[serde(default)]
    bid_expiry: Option<i64>,
    #[serde(default)]
    inscription_metadata: Option<InscriptionMetadata>,
    #[serde(default)]
    runes_metadata: Option<RunesMetadata>,
}

#[derive(Debug, Deserialize)]
struct InscriptionMetadata {
    #[serde(default)]
    collection: Option<ItemCollection>,
}

#[derive(Debug, Deserialize)]
struct RunesMetadata {
    #[serde(default)]
    runes: Vec<RuneName>,
}

#[derive(Debug, Deserialize)]
struct RuneName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IntentSellResponse {
    seller: IntentSeller,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentSeller {
    #[serde(rename = "unsignedListingPSBTBase64")]
    unsigned_listing_psbt_base64: Option<String>,
    #[serde(rename = "secureListingPSBTs", default)]
    secure_listing_psbts: Vec<SecureTemplate>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SatflowClient {
    http: Client,
    base_url: String,
    balance_url: String,
    api_key: SecretString,
}

impl SatflowClient {
    pub fn new(base_url: &str, balance_url: &str, api_key: SecretString, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("SATMAKER/0.1.0")
            .build()
            .context("Failed to build HTTP client for Satflow")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            balance_url: balance_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(url = %url, "Satflow GET");

        let resp = self
            .http
            .get(url)
            .query(query)
            .header("x-api-key", self.api_key.expose_secret())
            .send()
            .await
            .context("Satflow API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Satflow API error {status}: {body}");
        }

        resp.json().await.with_context(|| format!("Failed to parse Satflow response from {url}"))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Satflow POST");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .context("Satflow API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Satflow API error {status} on {path}: {text}");
        }

        resp.json().await.with_context(|| format!("Failed to parse Satflow response from {path}"))
    }

    async fn wallet_items(&self, address: &str, protocol: Protocol) -> Result<Vec<WalletItem>> {
        let item_type = match protocol {
            Protocol::Ordinals => "inscription",
            Protocol::Runes => "rune",
        };
        let page_size = WALLET_PAGE_SIZE.to_string();
        let resp: WalletContentsResponse = self
            .get(
                &format!("{}/walletContents", self.base_url),
                &[
                    ("address", address),
                    ("connectedAddress", address),
                    ("page", "1"),
                    ("page_size", &page_size),
                    ("itemType", item_type),
                ],
            )
            .await?;
        Ok(resp.results.map(|r| r.items).unwrap_or_default())
    }
}

fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn item_to_holding(item: WalletItem) -> Option<HeldAsset> {
    let listing_price = item.listing.map(|l| l.price);
    if let (Some(token), Some(collection)) = (item.token, item.collection) {
        return Some(HeldAsset {
            listing: listing_price.map(|price| OpenListing { asset_id: token.inscription_id.clone(), price }),
            asset_id: token.inscription_id,
            group_key: collection.id,
            quantity: Decimal::ONE,
        });
    }
    let rune = item.rune?;
    let quantity = rune
        .amount
        .as_deref()
        .and_then(|a| Decimal::from_str(a).ok())
        .unwrap_or(Decimal::ZERO);
    let asset_id = rune.utxo.unwrap_or_else(|| rune.name.clone());
    Some(HeldAsset {
        listing: listing_price.map(|price| OpenListing { asset_id: asset_id.clone(), price }),
        asset_id,
        group_key: rune.name,
        quantity,
    })
}

fn wallet_bid_to_open_bid(bid: WalletBid) -> OpenBid {
    let (kind, group_keys) = match bid.kind.as_str() {
        "collection" => (
            BidKind::Collection,
            bid.inscription_metadata
                .and_then(|m| m.collection)
                .map(|c| vec![c.id])
                .unwrap_or_default(),
        ),
        "rune" => (
            BidKind::Rune,
            bid.runes_metadata
                .map(|m| m.runes.into_iter().map(|r| r.name).collect())
                .unwrap_or_default(),
        ),
        _ => (BidKind::Other, Vec::new()),
    };
    let quantity = bid.quantity.filter(|q| *q > Decimal::ZERO).unwrap_or(Decimal::ONE);
    // Collection bids quote per item; rune bids quote the total.
    let total_price = match kind {
        BidKind::Collection => bid.price * quantity,
        _ => bid.price,
    };
    OpenBid {
        id: bid.bid_id,
        kind,
        group_keys,
        total_price,
        quantity,
        expiry: bid.bid_expiry.and_then(ms_to_datetime),
    }
}

#[async_trait]
impl Marketplace for SatflowClient {
    async fn fetch_challenge(&self, address: &str) -> Result<String> {
        let resp: ChallengeResponse = self
            .get(&format!("{}/satflow/getChallenge", self.base_url), &[("address", address)])
            .await?;
        Ok(resp.challenge)
    }

    async fn bidding_address(&self, address: &str, public_key_hex: &str) -> Result<String> {
        let resp: BiddingAddressResponse = self
            .get(
                &format!("{}/biddingWallet/address", self.base_url),
                &[
                    ("ordinalsAddress", address),
                    ("paymentAddress", address),
                    ("paymentPubkey", public_key_hex),
                ],
            )
            .await?;
        resp.into_address().context("Bidding wallet response has no multiSig address")
    }

    async fn bidding_balance(&self, bidding_address: &str) -> Result<Decimal> {
        let url = format!("{}/address/{}", self.balance_url, urlencoding::encode(bidding_address));
        debug!(url = %url, "Fetching bidding wallet balance");

        let resp = self.http.get(&url).send().await.context("Balance API request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Balance API error {status}: {body}");
        }
        let stats: AddressStats = resp.json().await.context("Failed to parse balance response")?;
        Ok(Decimal::from(stats.balance()))
    }

    async fn fetch_holdings(&self, address: &str, protocol: Protocol) -> Result<Vec<HeldAsset>> {
        let items = self.wallet_items(address, protocol).await?;
        let holdings: Vec<HeldAsset> = items.into_iter().filter_map(item_to_holding).collect();
        debug!(protocol = %protocol, count = holdings.len(), "Holdings fetched");
        Ok(holdings)
    }

    async fn fetch_open_bids(&self, address: &str) -> Result<Vec<OpenBid>> {
        let resp: WalletBidsResponse = self
            .get(&format!("{}/walletBids", self.base_url), &[("address", address)])
            .await?;
        Ok(resp.results.into_iter().map(wallet_bid_to_open_bid).collect())
    }

    async fn fetch_open_listings(&self, address: &str, protocol: Protocol) -> Result<Vec<OpenListing>> {
        let items = self.wallet_items(address, protocol).await?;
        Ok(items
            .into_iter()
            .filter_map(item_to_holding)
            .filter_map(|h| h.listing)
            .collect())
    }

    async fn submit_cancellation(&self, request: &CancelRequest) -> Result<()> {
        let _: serde_json::Value = self.post("/cancel", request).await?;
        info!(count = request.bid_ids.len(), "Bids cancelled");
        Ok(())
    }

    async fn submit_bid_creation(&self, submission: &BidSubmission) -> Result<()> {
        let _: serde_json::Value = self.post("/bid", submission).await?;
        info!(
            slug = %submission.collection_slug,
            price = submission.price,
            quantity = submission.quantity,
            "Bid created"
        );
        Ok(())
    }

    async fn get_unsigned_template(&self, request: &ListingRequest) -> Result<ListingTemplate> {
        let resp: IntentSellResponse = self.post("/intent/sell", request).await?;
        let unsigned_primary = resp
            .seller
            .unsigned_listing_psbt_base64
            .filter(|s| !s.is_empty())
            .context("No PSBT found in intent/sell response")?;
        Ok(ListingTemplate {
            unsigned_primary,
            secure: resp
                .seller
                .secure_listing_psbts
                .into_iter()
                .filter(|t| !t.base64.is_empty())
                .collect(),
        })
    }

    async fn submit_signed_listing(&self, listing: &SignedListing) -> Result<()> {
        let _: serde_json::Value = self.post("/bulkList", listing).await?;
        Ok(())
    }
}
