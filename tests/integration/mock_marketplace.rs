//! In-memory marketplace and order-book feed for integration testing.
//!
//! `InMemoryMarketplace` keeps bids, holdings and listings in memory and
//! applies cancellations, bid creations and signed listings to that state,
//! so consecutive cycles observe the effects of earlier ones.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

use satmaker::platforms::{
    BidSubmission, CancelRequest, ListingRequest, ListingTemplate, MarketFeed, Marketplace,
    SecureTemplate, SignedListing,
};
use satmaker::types::{AssetGroup, BidKind, HeldAsset, MarketOffer, OfferSide, OpenBid, OpenListing, Protocol};
use satmaker::wallet::psbt::{decode_base64, encode_base64};

/// Everything the marketplace knows about us.
#[derive(Debug, Default)]
pub struct MarketState {
    pub balance: Decimal,
    pub bids: Vec<OpenBid>,
    pub holdings: Vec<(Protocol, HeldAsset)>,
    pub listings: Vec<OpenListing>,
    pub cancellations: Vec<CancelRequest>,
    pub submissions: Vec<BidSubmission>,
    pub signed_listings: Vec<SignedListing>,
    pub next_id: u64,
    /// If set, cancellations fail with this message.
    pub fail_cancel: Option<String>,
    /// If set, the open-bid lookup fails.
    pub fail_open_bids: bool,
}

pub struct InMemoryMarketplace {
    state: Arc<Mutex<MarketState>>,
    /// Script our listing templates spend from.
    seller_script: ScriptBuf,
}

impl InMemoryMarketplace {
    pub fn new(balance: Decimal, seller_script: ScriptBuf) -> Self {
        Self {
            state: Arc::new(Mutex::new(MarketState { balance, ..Default::default() })),
            seller_script,
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MarketState> {
        self.state.lock().unwrap()
    }

    pub fn hold(&self, protocol: Protocol, asset_id: &str, group_key: &str, quantity: Decimal) {
        self.state().holdings.push((
            protocol,
            HeldAsset {
                asset_id: asset_id.to_string(),
                group_key: group_key.to_string(),
                quantity,
                listing: None,
            },
        ));
    }

    /// One-input, one-output template spending a seller-owned P2WPKH output.
    fn template(&self, seed: u8) -> String {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array([seed; 32]), vout: 0 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(100_000), script_pubkey: self.seller_script.clone() }],
        };
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        psbt.inputs[0].witness_utxo =
            Some(TxOut { value: Amount::from_sat(546), script_pubkey: self.seller_script.clone() });
        encode_base64(&psbt)
    }
}

#[async_trait]
impl Marketplace for InMemoryMarketplace {
    async fn fetch_challenge(&self, _address: &str) -> Result<String> {
        Ok("6368616c6c656e6765".to_string())
    }

    async fn bidding_address(&self, _address: &str, _public_key_hex: &str) -> Result<String> {
        Ok("bc1qescrowescrowescrowescrowescrowescrow".to_string())
    }

    async fn bidding_balance(&self, _bidding_address: &str) -> Result<Decimal> {
        Ok(self.state().balance)
    }

    async fn fetch_holdings(&self, _address: &str, protocol: Protocol) -> Result<Vec<HeldAsset>> {
        let state = self.state();
        Ok(state
            .holdings
            .iter()
            .filter(|(p, _)| *p == protocol)
            .map(|(_, h)| h.clone())
            .collect())
    }

    async fn fetch_open_bids(&self, _address: &str) -> Result<Vec<OpenBid>> {
        let state = self.state();
        if state.fail_open_bids {
            return Err(anyhow!("walletBids unavailable"));
        }
        Ok(state.bids.clone())
    }

    async fn fetch_open_listings(&self, _address: &str, protocol: Protocol) -> Result<Vec<OpenListing>> {
        let state = self.state();
        Ok(state
            .listings
            .iter()
            .filter(|l| state.holdings.iter().any(|(p, h)| *p == protocol && h.asset_id == l.asset_id))
            .cloned()
            .collect())
    }

    async fn submit_cancellation(&self, request: &CancelRequest) -> Result<()> {
        let mut state = self.state();
        if let Some(msg) = &state.fail_cancel {
            return Err(anyhow!("{msg}"));
        }
        state.bids.retain(|b| !request.bid_ids.contains(&b.id));
        state.cancellations.push(request.clone());
        Ok(())
    }

    async fn submit_bid_creation(&self, submission: &BidSubmission) -> Result<()> {
        let mut state = self.state();
        state.next_id += 1;
        let quantity = Decimal::from(submission.quantity);
        let price = Decimal::from(submission.price);
        let (kind, total_price) = match submission.meta_type {
            Protocol::Ordinals => (BidKind::Collection, price * quantity),
            Protocol::Runes => (BidKind::Rune, price),
        };
        let bid = OpenBid {
            id: format!("bid-{}", state.next_id),
            kind,
            group_keys: vec![submission.collection_slug.clone()],
            total_price,
            quantity,
            expiry: None,
        };
        state.bids.push(bid);
        state.submissions.push(submission.clone());
        Ok(())
    }

    async fn get_unsigned_template(&self, _request: &ListingRequest) -> Result<ListingTemplate> {
        Ok(ListingTemplate {
            unsigned_primary: self.template(1),
            secure: vec![SecureTemplate { base64: self.template(2), indices_to_sign: vec![0] }],
        })
    }

    async fn submit_signed_listing(&self, listing: &SignedListing) -> Result<()> {
        let signed = decode_base64(&listing.signed_listing_psbt).map_err(|e| anyhow!("{e}"))?;
        if signed.inputs[0].partial_sigs.is_empty() {
            return Err(anyhow!("listing PSBT is not signed"));
        }
        let mut state = self.state();
        for request in &listing.listings {
            state.listings.retain(|l| l.asset_id != request.inscription_id);
            state.listings.push(OpenListing {
                asset_id: request.inscription_id.clone(),
                price: Decimal::from(request.price),
            });
        }
        state.signed_listings.push(listing.clone());
        Ok(())
    }
}

/// Order-book feed returning whatever the test last set.
#[derive(Default)]
pub struct StaticFeed {
    sells: Mutex<Vec<MarketOffer>>,
    buys: Mutex<Vec<MarketOffer>>,
}

impl StaticFeed {
    pub fn set_sells(&self, offers: Vec<MarketOffer>) {
        *self.sells.lock().unwrap() = offers;
    }

    pub fn set_buys(&self, offers: Vec<MarketOffer>) {
        *self.buys.lock().unwrap() = offers;
    }
}

pub fn offer(side: OfferSide, id: &str, unit_price: Decimal, quantity: Decimal, owner: Option<&str>) -> MarketOffer {
    MarketOffer {
        source: "static".to_string(),
        side,
        asset_id: id.to_string(),
        unit_price,
        quantity,
        owner: owner.map(str::to_string),
    }
}

/// Single-unit sell offers at the given prices.
pub fn sells(prices: &[Decimal]) -> Vec<MarketOffer> {
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| offer(OfferSide::Sell, &format!("ask{i}"), *p, Decimal::ONE, None))
        .collect()
}

#[async_trait]
impl MarketFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_sell_offers(&self, _group: &AssetGroup) -> Result<Vec<MarketOffer>> {
        Ok(self.sells.lock().unwrap().clone())
    }

    async fn fetch_buy_offers(&self, _group: &AssetGroup) -> Result<Vec<MarketOffer>> {
        Ok(self.buys.lock().unwrap().clone())
    }
}
