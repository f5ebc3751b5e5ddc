//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (seed phrase, API keys) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.
//!
//! The raw file is validated once at startup into [`EngineSettings`], the
//! typed inputs consumed by the price planner and reconciliation engine.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;

use crate::types::{AssetGroup, EngineError, Protocol};

/// Tolerance for floating point noise in summed ladder allocations.
const ALLOCATION_EPSILON: Decimal = dec!(0.001);

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Listing multiplier overrides keyed by inscription id.
    #[serde(default)]
    pub premium: HashMap<String, PremiumConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_loop_seconds")]
    pub loop_seconds: u64,
    /// Relative price change that triggers a reprice (0.01 = 1%).
    pub update_threshold: Decimal,
    /// Bids never exceed this fraction of the lowest listing.
    pub max_bid_to_list_ratio: Decimal,
    /// Relative quantity drift tolerated per ladder step.
    #[serde(default = "default_quantity_tolerance")]
    pub ladder_quantity_tolerance: Decimal,
    /// Price improvement used when stepping inside the spread.
    #[serde(default = "default_tick_sats")]
    pub tick_sats: Decimal,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub seed_env: String,
    pub derivation_path: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            seed_env: "LOCAL_WALLET_SEED".to_string(),
            derivation_path: crate::wallet::DEFAULT_DERIVATION_PATH.to_string(),
        }
    }
}

impl WalletConfig {
    /// Read the mnemonic from the configured environment variable.
    pub fn load_seed(&self) -> Result<SecretString> {
        let phrase = AppConfig::resolve_env(&self.seed_env)?;
        Ok(SecretString::new(phrase))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    pub base_url: String,
    /// Esplora-style API used for bidding wallet balances.
    pub balance_url: String,
    pub api_key_env: String,
    pub bid_expiry_days: i64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://native.satflow.com".to_string(),
            balance_url: "https://memflow.satflow.com/api".to_string(),
            api_key_env: "SATFLOW_API_KEY".to_string(),
            bid_expiry_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketDataConfig {
    pub base_url: String,
    /// All-in price multiplier for offers from this feed (taker fee).
    pub fee_multiplier: Decimal,
    /// Extra addresses treated as our own when building snapshots.
    #[serde(default)]
    pub exclude_addresses: Vec<String>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-mainnet.magiceden.us/v2/ord/btc".to_string(),
            fee_multiplier: Decimal::ONE,
            exclude_addresses: Vec::new(),
        }
    }
}

/// How the reference price is derived from the sell side.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    CheapestN,
    Depth,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LadderStepConfig {
    pub price_percent: Decimal,
    pub allocation: Decimal,
}

/// Per-group options as written in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct GroupConfig {
    pub id: String,
    pub protocol: Protocol,
    /// Order-book key; defaults to `id`.
    #[serde(default)]
    pub market_symbol: Option<String>,
    /// Marketplace key (collection id or full rune name); defaults to `id`.
    #[serde(default)]
    pub bid_slug: Option<String>,
    #[serde(default)]
    pub divisibility: Option<u8>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub list_above: Option<Decimal>,
    #[serde(default)]
    pub bid_below: Option<Decimal>,
    #[serde(default)]
    pub ladder: Vec<LadderStepConfig>,
    #[serde(default)]
    pub reference: Option<ReferenceKind>,
    #[serde(default)]
    pub num_cheapest: Option<usize>,
    #[serde(default)]
    pub market_depth_sats: Option<Decimal>,
    #[serde(default)]
    pub price_floor: Option<Decimal>,
    /// Ceiling on the summed value of this group's open bids.
    #[serde(default)]
    pub max_bid_total: Option<Decimal>,
    #[serde(default)]
    pub bid_quantum_sats: Option<Decimal>,
    #[serde(default)]
    pub min_bid_price: Option<Decimal>,
    #[serde(default)]
    pub dynamic_pricing: bool,
    #[serde(default = "default_true")]
    pub bidding_enabled: bool,
    #[serde(default = "default_true")]
    pub listing_enabled: bool,
}

/// Listing multiplier override for a single inscription.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PremiumConfig {
    /// Multiple of the reference price.
    pub multiplier: Decimal,
    /// Optional price-dependent replacements for `multiplier`.
    #[serde(default)]
    pub tiers: Vec<PremiumTier>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PremiumTier {
    /// Tier applies once the reference price reaches this value.
    pub min_reference: Decimal,
    pub multiplier: Decimal,
}

fn default_loop_seconds() -> u64 {
    15
}

fn default_quantity_tolerance() -> Decimal {
    dec!(0.10)
}

fn default_tick_sats() -> Decimal {
    dec!(1000)
}

fn default_http_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Validated settings
// ---------------------------------------------------------------------------

/// Reference price method with its parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceMethod {
    /// Mean of the N cheapest listings.
    CheapestN(usize),
    /// Quantity-weighted mean of the cheapest offers up to a sats budget.
    DepthWeighted(Decimal),
}

/// Bid plan shape requested for a group.
#[derive(Debug, Clone, PartialEq)]
pub enum BidStrategy {
    Single { bid_below: Decimal },
    Ladder { steps: Vec<LadderStepConfig> },
}

/// Typed, validated settings for one asset group.
#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub group: AssetGroup,
    pub reference: ReferenceMethod,
    pub list_above: Decimal,
    pub bid_strategy: BidStrategy,
    pub price_floor: Option<Decimal>,
    pub max_bid_total: Option<Decimal>,
    /// Bid prices round to this many sats; `None` keeps real-valued prices.
    pub bid_quantum: Option<Decimal>,
    /// Listing prices round down to this many sats; `None` keeps real values.
    pub listing_quantum: Option<Decimal>,
    pub min_bid_price: Decimal,
    pub dynamic_pricing: bool,
    pub bidding_enabled: bool,
    pub listing_enabled: bool,
}

/// Validated engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub update_threshold: Decimal,
    pub max_bid_to_list_ratio: Decimal,
    pub ladder_quantity_tolerance: Decimal,
    pub tick: Decimal,
    pub groups: Vec<GroupSettings>,
    pub premiums: HashMap<String, PremiumConfig>,
}

#[cfg(test)]
impl GroupSettings {
    /// Plain single-bid group: list at 1.2x, bid at 0.8x, cheapest 10.
    pub(crate) fn sample(id: &str, protocol: Protocol) -> Self {
        let (bid_quantum, listing_quantum) = match protocol {
            Protocol::Ordinals => (Some(dec!(1000)), Some(Decimal::ONE)),
            Protocol::Runes => (None, None),
        };
        GroupSettings {
            group: AssetGroup {
                id: id.to_string(),
                protocol,
                market_symbol: id.to_string(),
                bid_slug: id.to_string(),
                divisibility: 0,
                symbol: None,
            },
            reference: ReferenceMethod::CheapestN(10),
            list_above: dec!(1.2),
            bid_strategy: BidStrategy::Single { bid_below: dec!(0.8) },
            price_floor: None,
            max_bid_total: None,
            bid_quantum,
            listing_quantum,
            min_bid_price: Decimal::ZERO,
            dynamic_pricing: false,
            bidding_enabled: true,
            listing_enabled: true,
        }
    }
}

#[cfg(test)]
impl EngineSettings {
    pub(crate) fn sample(groups: Vec<GroupSettings>) -> Self {
        EngineSettings {
            update_threshold: dec!(0.01),
            max_bid_to_list_ratio: dec!(0.9),
            ladder_quantity_tolerance: dec!(0.10),
            tick: dec!(1000),
            groups,
            premiums: HashMap::new(),
        }
    }
}

impl EngineSettings {
    /// Groups configured to list below the reference price.
    pub fn below_floor_groups(&self) -> Vec<(&str, Decimal)> {
        self.groups
            .iter()
            .filter(|g| g.listing_enabled && g.list_above < Decimal::ONE)
            .map(|g| (g.group.id.as_str(), g.list_above))
            .collect()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Validate the raw configuration into typed engine settings.
    pub fn validate(&self) -> Result<EngineSettings, EngineError> {
        let agent = &self.agent;
        if agent.update_threshold < Decimal::ZERO || agent.update_threshold > Decimal::ONE {
            return Err(invalid("update_threshold must be between 0 and 1"));
        }
        if agent.max_bid_to_list_ratio <= Decimal::ZERO
            || agent.max_bid_to_list_ratio >= Decimal::ONE
        {
            return Err(invalid("max_bid_to_list_ratio must be between 0 and 1 (exclusive)"));
        }
        if agent.ladder_quantity_tolerance < Decimal::ZERO {
            return Err(invalid("ladder_quantity_tolerance must not be negative"));
        }
        if agent.tick_sats <= Decimal::ZERO {
            return Err(invalid("tick_sats must be positive"));
        }
        if self.groups.is_empty() {
            return Err(invalid("at least one [[groups]] entry is required"));
        }

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(self.groups.len());
        for raw in &self.groups {
            if !seen.insert(raw.id.to_lowercase()) {
                return Err(invalid(&format!("duplicate group id: {}", raw.id)));
            }
            groups.push(validate_group(raw)?);
        }

        for (asset_id, premium) in &self.premium {
            if premium.multiplier <= Decimal::ZERO
                || premium.tiers.iter().any(|t| t.multiplier <= Decimal::ZERO)
            {
                return Err(invalid(&format!("premium multipliers for {asset_id} must be positive")));
            }
        }

        Ok(EngineSettings {
            update_threshold: agent.update_threshold,
            max_bid_to_list_ratio: agent.max_bid_to_list_ratio,
            ladder_quantity_tolerance: agent.ladder_quantity_tolerance,
            tick: agent.tick_sats,
            groups,
            premiums: self.premium.clone(),
        })
    }
}

fn invalid(msg: &str) -> EngineError {
    EngineError::InvalidConfig(msg.to_string())
}

/// Validate ladder steps: each percent in (0, 1), each allocation in (0, 1],
/// and the allocations summing to at most 100%.
pub fn validate_ladder(steps: &[LadderStepConfig]) -> Result<(), EngineError> {
    for step in steps {
        if step.price_percent <= Decimal::ZERO || step.price_percent >= Decimal::ONE {
            return Err(invalid("ladder price_percent must be between 0 and 1"));
        }
        if step.allocation <= Decimal::ZERO || step.allocation > Decimal::ONE {
            return Err(invalid("ladder allocation must be between 0 and 1"));
        }
    }
    let total: Decimal = steps.iter().map(|s| s.allocation).sum();
    if total > Decimal::ONE + ALLOCATION_EPSILON {
        return Err(invalid(&format!(
            "ladder allocation totals {}% which exceeds 100%",
            (total * dec!(100)).round_dp(1)
        )));
    }
    Ok(())
}

fn validate_group(raw: &GroupConfig) -> Result<GroupSettings, EngineError> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(invalid("group id must not be empty"));
    }

    let list_above = raw.list_above.unwrap_or(dec!(1.2));
    if list_above <= Decimal::ZERO {
        return Err(invalid(&format!("{id}: list_above must be positive")));
    }

    let bid_strategy = if raw.ladder.is_empty() {
        let bid_below = raw.bid_below.unwrap_or(dec!(0.8));
        if bid_below <= Decimal::ZERO || bid_below >= Decimal::ONE {
            return Err(invalid(&format!("{id}: bid_below must be a number between 0 and 1")));
        }
        BidStrategy::Single { bid_below }
    } else {
        validate_ladder(&raw.ladder).map_err(|e| match e {
            EngineError::InvalidConfig(msg) => invalid(&format!("{id}: {msg}")),
            other => other,
        })?;
        BidStrategy::Ladder { steps: raw.ladder.clone() }
    };

    let kind = raw.reference.unwrap_or(match raw.protocol {
        Protocol::Ordinals => ReferenceKind::CheapestN,
        Protocol::Runes => ReferenceKind::Depth,
    });
    let reference = match kind {
        ReferenceKind::CheapestN => {
            let n = raw.num_cheapest.unwrap_or(10);
            if n == 0 {
                return Err(invalid(&format!("{id}: num_cheapest must be at least 1")));
            }
            ReferenceMethod::CheapestN(n)
        }
        ReferenceKind::Depth => match raw.market_depth_sats {
            Some(depth) if depth > Decimal::ZERO => ReferenceMethod::DepthWeighted(depth),
            Some(_) => return Err(invalid(&format!("{id}: market_depth_sats must be positive"))),
            None => return Err(invalid(&format!("{id}: market_depth_sats is required"))),
        },
    };

    if raw.protocol == Protocol::Runes && raw.bid_slug.is_none() {
        return Err(invalid(&format!("{id}: runes groups need bid_slug (the full rune name)")));
    }
    if let Some(limit) = raw.max_bid_total {
        if limit < Decimal::ZERO {
            return Err(invalid(&format!("{id}: max_bid_total must not be negative")));
        }
    }
    if let Some(q) = raw.bid_quantum_sats {
        if q <= Decimal::ZERO {
            return Err(invalid(&format!("{id}: bid_quantum_sats must be positive")));
        }
    }

    let (bid_quantum, listing_quantum) = match raw.protocol {
        Protocol::Ordinals => (
            Some(raw.bid_quantum_sats.unwrap_or(dec!(1000))),
            Some(Decimal::ONE),
        ),
        Protocol::Runes => (raw.bid_quantum_sats, None),
    };

    Ok(GroupSettings {
        group: AssetGroup {
            id: id.to_string(),
            protocol: raw.protocol,
            market_symbol: raw.market_symbol.clone().unwrap_or_else(|| id.to_string()),
            bid_slug: raw.bid_slug.clone().unwrap_or_else(|| id.to_string()),
            divisibility: raw.divisibility.unwrap_or(0),
            symbol: raw.symbol.clone(),
        },
        reference,
        list_above,
        bid_strategy,
        price_floor: raw.price_floor,
        max_bid_total: raw.max_bid_total,
        bid_quantum,
        listing_quantum,
        min_bid_price: raw.min_bid_price.unwrap_or(Decimal::ZERO),
        dynamic_pricing: raw.dynamic_pricing,
        bidding_enabled: raw.bidding_enabled,
        listing_enabled: raw.listing_enabled,
    })
}
