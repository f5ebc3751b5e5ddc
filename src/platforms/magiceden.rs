//! Magic Eden order-book feed (read-only).
//!
//! API base: https://api-mainnet.magiceden.us/v2/ord/btc
//! - `GET /tokens?collectionSymbol[]=..&sortBy=priceAsc`: inscription listings
//! - `GET /collection-offers/collection/{symbol}`: collection-wide bids
//! - `GET /runes/orders/{ticker}?side=sell|buy`: rune orders
//!
//! No auth needed for reads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::MarketFeed;
use crate::types::{AssetGroup, MarketOffer, OfferSide, Protocol};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const FEED_NAME: &str = "magiceden";

/// Listings fetched per collection (API max is 100).
const TOKEN_PAGE_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    tokens: Vec<TokenListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenListing {
    id: String,
    #[serde(default)]
    listed_price: Option<Decimal>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionOffersResponse {
    #[serde(default)]
    offers: Vec<CollectionOffer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionOffer {
    id: String,
    price: OfferPrice,
    #[serde(default)]
    quantity: Option<Decimal>,
    #[serde(default)]
    maker_payment_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OfferPrice {
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct RuneOrdersResponse {
    #[serde(default)]
    orders: Vec<RuneOrder>,
}

/// Amounts arrive as decimal strings already scaled by divisibility.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuneOrder {
    id: String,
    side: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    is_pending: bool,
    #[serde(default)]
    formatted_amount: Option<String>,
    #[serde(default)]
    formatted_unit_price: Option<String>,
    #[serde(default)]
    maker_address: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct MagicEdenFeed {
    http: Client,
    base_url: String,
    fee_multiplier: Decimal,
}

impl MagicEdenFeed {
    pub fn new(base_url: &str, fee_multiplier: Decimal, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("SATMAKER/0.1.0")
            .build()
            .context("Failed to build HTTP client for Magic Eden")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            fee_multiplier,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching Magic Eden");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Magic Eden API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Magic Eden API error {status}: {body}");
        }

        resp.json().await.context("Failed to parse Magic Eden response")
    }

    fn rune_orders_url(&self, ticker: &str, side: OfferSide) -> String {
        let (side, sort) = match side {
            OfferSide::Sell => ("sell", "unitPriceAsc"),
            OfferSide::Buy => ("buy", "unitPriceDesc"),
        };
        format!(
            "{}/runes/orders/{}?offset=0&sort={sort}&includePending=false&side={side}",
            self.base_url,
            urlencoding::encode(ticker),
        )
    }
}

#[async_trait]
impl MarketFeed for MagicEdenFeed {
    fn name(&self) -> &str {
        FEED_NAME
    }

    fn fee_multiplier(&self) -> Decimal {
        self.fee_multiplier
    }

    async fn fetch_sell_offers(&self, group: &AssetGroup) -> Result<Vec<MarketOffer>> {
        match group.protocol {
            Protocol::Ordinals => {
                let url = format!(
                    "{}/tokens?offset=0&limit={TOKEN_PAGE_LIMIT}&collectionSymbol[]={}&sortBy=priceAsc\
                     &disablePendingTransactions=false&showAll=true&rbfPreventionListingOnly=false",
                    self.base_url,
                    urlencoding::encode(&group.market_symbol),
                );
                let resp: TokensResponse = self.get(&url).await?;
                Ok(listings_to_offers(resp))
            }
            Protocol::Runes => {
                let url = self.rune_orders_url(&group.market_symbol, OfferSide::Sell);
                let resp: RuneOrdersResponse = self.get(&url).await?;
                Ok(rune_orders_to_offers(resp, OfferSide::Sell))
            }
        }
    }

    async fn fetch_buy_offers(&self, group: &AssetGroup) -> Result<Vec<MarketOffer>> {
        match group.protocol {
            Protocol::Ordinals => {
                let url = format!(
                    "{}/collection-offers/collection/{}?sort=priceDesc&status[]=valid&limit=100",
                    self.base_url,
                    urlencoding::encode(&group.market_symbol),
                );
                let resp: CollectionOffersResponse = self.get(&url).await?;
                Ok(collection_offers_to_offers(resp))
            }
            Protocol::Runes => {
                let url = self.rune_orders_url(&group.market_symbol, OfferSide::Buy);
                let resp: RuneOrdersResponse = self.get(&url).await?;
                Ok(rune_orders_to_offers(resp, OfferSide::Buy))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn parse_amount(raw: Option<&str>) -> Option<Decimal> {
    let s = raw?.trim();
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
}

fn listings_to_offers(resp: TokensResponse) -> Vec<MarketOffer> {
    resp.tokens
        .into_iter()
        .filter_map(|t| {
            let price = t.listed_price.filter(|p| *p > Decimal::ZERO)?;
            Some(MarketOffer {
                source: FEED_NAME.to_string(),
                side: OfferSide::Sell,
                asset_id: t.id,
                unit_price: price,
                quantity: Decimal::ONE,
                owner: t.owner,
            })
        })
        .collect()
}

fn collection_offers_to_offers(resp: CollectionOffersResponse) -> Vec<MarketOffer> {
    resp.offers
        .into_iter()
        .filter(|o| o.price.amount > Decimal::ZERO)
        .map(|o| MarketOffer {
            source: FEED_NAME.to_string(),
            side: OfferSide::Buy,
            asset_id: o.id,
            unit_price: o.price.amount,
            quantity: o.quantity.unwrap_or(Decimal::ONE),
            owner: o.maker_payment_address,
        })
        .collect()
}

fn rune_orders_to_offers(resp: RuneOrdersResponse, side: OfferSide) -> Vec<MarketOffer> {
    let wanted = match side {
        OfferSide::Sell => "sell",
        OfferSide::Buy => "buy",
    };
    resp.orders
        .into_iter()
        .filter(|o| o.side == wanted && o.status == "valid" && !o.is_pending)
        .filter_map(|o| {
            let quantity = parse_amount(o.formatted_amount.as_deref())?;
            let unit_price = parse_amount(o.formatted_unit_price.as_deref())?;
            if quantity <= Decimal::ZERO || unit_price <= Decimal::ZERO {
                return None;
            }
            Some(MarketOffer {
                source: FEED_NAME.to_string(),
                side,
                asset_id: o.id,
                unit_price,
                quantity,
                owner: o.maker_address,
            })
        })
        .collect()
}
