use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CATEGORY: Category = Category::Crypto;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_WARMUP_RETRY_MS: u64 = 2_500;
pub const DEFAULT_MOCK_MODE: bool = false;
pub const DEFAULT_MOCK_WARMUP_POLLS: u8 = 0;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 200;
pub const MIN_WARMUP_RETRY_MS: u64 = 250;
pub const MAX_WARMUP_RETRY_MS: u64 = 60_000;

/// Instrument categories served by the dashboard backend. Each category has a
/// curated ranking used to order the default (no-query) watchlist view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Crypto,
    Stocks,
    Forex,
    Indices,
    Commodities,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Crypto,
        Category::Stocks,
        Category::Forex,
        Category::Indices,
        Category::Commodities,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Stocks => "stocks",
            Self::Forex => "forex",
            Self::Indices => "indices",
            Self::Commodities => "commodities",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crypto" => Ok(Self::Crypto),
            "stocks" => Ok(Self::Stocks),
            "forex" => Ok(Self::Forex),
            "indices" => Ok(Self::Indices),
            "commodities" => Ok(Self::Commodities),
            other => Err(AppError::InvalidArgument(format!(
                "unknown category '{other}'"
            ))),
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Crypto => "Crypto",
            Self::Stocks => "Stocks",
            Self::Forex => "Forex",
            Self::Indices => "Indices",
            Self::Commodities => "Commodities",
        }
    }

    /// Curated "top N" ranking. Symbols listed here sort before everything
    /// else in the no-query view, in list order.
    pub fn priority_symbols(self) -> &'static [&'static str] {
        match self {
            Self::Crypto => &[
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT",
            ],
            Self::Stocks => &["AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "TSLA"],
            Self::Forex => &["EURUSD", "GBPUSD", "USDJPY", "USDCHF", "AUDUSD"],
            Self::Indices => &["SPX", "NDX", "DJI", "DAX", "FTSE"],
            Self::Commodities => &["XAUUSD", "XAGUSD", "WTIUSD", "BRENTUSD", "NATGAS"],
        }
    }
}

/// Transient highlight applied to a row right after a tick, cleared again a
/// moment later by the same task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TickDirection {
    Up,
    Down,
    #[default]
    None,
}

/// One displayed watchlist row. Identity is the normalized symbol; rows are
/// mutated in place by their tick task and only replaced wholesale when a
/// fresh snapshot is applied.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRow {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
    pub direction: TickDirection,
    pub last_change: f64,
}

pub type RowTable = HashMap<String, InstrumentRow>;

/// Strips an exchange prefix (`NASDAQ:AAPL`) and a venue suffix (`BMW.DE`),
/// trims, and uppercases.
pub fn normalize_symbol(raw: &str) -> String {
    let trimmed = raw.trim();
    let after_prefix = match trimmed.rsplit_once(':') {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    let without_suffix = match after_prefix.split_once('.') {
        Some((head, _)) => head,
        None => after_prefix,
    };
    without_suffix.trim().to_ascii_uppercase()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentWire {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
}

impl TryFrom<InstrumentWire> for InstrumentRow {
    type Error = AppError;

    fn try_from(value: InstrumentWire) -> Result<Self, Self::Error> {
        if !value.price.is_finite()
            || !value.volume.is_finite()
            || !value.change.is_finite()
            || !value.change_percent.is_finite()
        {
            return Err(AppError::InvalidArgument(
                "instrument numeric fields must be finite".to_string(),
            ));
        }
        if value.price < 0.0 || value.volume < 0.0 {
            return Err(AppError::InvalidArgument(
                "instrument price and volume must be non-negative".to_string(),
            ));
        }

        let symbol = normalize_symbol(&value.symbol);
        if symbol.is_empty() {
            return Err(AppError::InvalidArgument(format!(
                "instrument symbol '{}' is empty after normalization",
                value.symbol
            )));
        }

        Ok(Self {
            symbol,
            name: value.name.trim().to_string(),
            price: value.price,
            volume: value.volume,
            change: value.change,
            change_percent: value.change_percent,
            direction: TickDirection::None,
            last_change: value.change,
        })
    }
}

/// Fetch lifecycle for the active category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistPhase {
    Idle,
    Fetching,
    Live,
    Warmup,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistStatusSnapshot {
    pub phase: WatchlistPhase,
    pub category: Category,
    pub row_count: usize,
    pub visible_count: usize,
    pub total_matches: usize,
    pub last_snapshot_ms: Option<i64>,
    pub reason: Option<String>,
}

impl WatchlistStatusSnapshot {
    pub fn idle(category: Category, reason: Option<String>) -> Self {
        Self {
            phase: WatchlistPhase::Idle,
            category,
            row_count: 0,
            visible_count: 0,
            total_matches: 0,
            last_snapshot_ms: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchlistArgs {
    pub base_url: Option<String>,
    pub category: Option<Category>,
    pub page_size: Option<usize>,
    pub warmup_retry_ms: Option<u64>,
    pub mock_mode: Option<bool>,
    pub mock_warmup_polls: Option<u8>,
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    pub base_url: String,
    pub category: Category,
    pub page_size: usize,
    pub warmup_retry_ms: u64,
    pub mock_mode: bool,
    pub mock_warmup_polls: u8,
    pub rng_seed: Option<u64>,
}

impl StartWatchlistArgs {
    pub fn normalize(self) -> Result<WatchlistConfig, AppError> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(AppError::InvalidArgument(
                "baseUrl must be non-empty".to_string(),
            ));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::InvalidArgument(format!(
                "pageSize must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }

        let warmup_retry_ms = self.warmup_retry_ms.unwrap_or(DEFAULT_WARMUP_RETRY_MS);
        if !(MIN_WARMUP_RETRY_MS..=MAX_WARMUP_RETRY_MS).contains(&warmup_retry_ms) {
            return Err(AppError::InvalidArgument(format!(
                "warmupRetryMs must be between {MIN_WARMUP_RETRY_MS} and {MAX_WARMUP_RETRY_MS}"
            )));
        }

        Ok(WatchlistConfig {
            base_url,
            category: self.category.unwrap_or(DEFAULT_CATEGORY),
            page_size,
            warmup_retry_ms,
            mock_mode: self.mock_mode.unwrap_or(DEFAULT_MOCK_MODE),
            mock_warmup_polls: self.mock_warmup_polls.unwrap_or(DEFAULT_MOCK_WARMUP_POLLS),
            rng_seed: self.rng_seed,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSession {
    pub running: bool,
    pub base_url: String,
    pub category: Category,
    pub page_size: usize,
    pub warmup_retry_ms: u64,
    pub mock_mode: bool,
}

impl WatchlistSession {
    pub fn from_config(config: &WatchlistConfig) -> Self {
        Self {
            running: true,
            base_url: config.base_url.clone(),
            category: config.category,
            page_size: config.page_size,
            warmup_retry_ms: config.warmup_retry_ms,
            mock_mode: config.mock_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistPreferencesSnapshot {
    pub category: Category,
    pub page_size: usize,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveWatchlistPreferencesArgs {
    pub category: Category,
    pub page_size: usize,
}

impl SaveWatchlistPreferencesArgs {
    pub fn normalize(self) -> Result<Self, AppError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(AppError::InvalidArgument(format!(
                "pageSize must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(self)
    }
}
