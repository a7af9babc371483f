use crate::error::AppError;
use crate::quotes::types::{Category, InstrumentRow, InstrumentWire, TickDirection};
use reqwest::{Client, StatusCode};

/// Outcome of one snapshot request. `NotReady` means the backend cache for
/// this category is still warming up; it is not an error and must never be
/// surfaced as one.
#[derive(Debug)]
pub enum SnapshotOutcome {
    Ready(Vec<InstrumentRow>),
    NotReady,
}

fn snapshot_endpoint(base_url: &str, category: Category) -> String {
    format!("{base_url}/api/market/{}/snapshot", category.as_str())
}

/// Fetches the current snapshot for a category. A 503 from the backend is the
/// warm-up signal and is mapped to `NotReady` here, at the transport
/// boundary; callers never look at status codes.
pub async fn fetch_snapshot(
    client: &Client,
    base_url: &str,
    category: Category,
) -> Result<SnapshotOutcome, AppError> {
    let endpoint = snapshot_endpoint(base_url, category);
    let response = client.get(endpoint).send().await?;

    if response.status() == StatusCode::SERVICE_UNAVAILABLE {
        return Ok(SnapshotOutcome::NotReady);
    }

    let response = response.error_for_status()?;
    let payload = response.json::<Vec<InstrumentWire>>().await?;

    let mut rows = Vec::with_capacity(payload.len());
    for wire in payload {
        rows.push(wire.try_into()?);
    }
    Ok(SnapshotOutcome::Ready(rows))
}

fn mock_extra_symbols(category: Category) -> &'static [&'static str] {
    match category {
        Category::Crypto => &["DOGEUSDT", "DOTUSDT", "LINKUSDT", "AVAXUSDT", "LTCUSDT"],
        Category::Stocks => &["AMD", "INTC", "NFLX", "ORCL", "CRM"],
        Category::Forex => &["NZDUSD", "USDCAD", "EURGBP", "EURJPY"],
        Category::Indices => &["CAC", "NIKKEI", "HSI", "RUT"],
        Category::Commodities => &["COPPER", "PLATINUM", "CORN", "WHEAT"],
    }
}

/// Deterministic in-process snapshot used when `mock_mode` is on: the curated
/// symbols for the category plus a tail of extras, with values derived from
/// the symbol index so repeated fetches agree.
pub fn build_mock_snapshot(category: Category) -> Vec<InstrumentRow> {
    let symbols: Vec<&str> = category
        .priority_symbols()
        .iter()
        .chain(mock_extra_symbols(category).iter())
        .copied()
        .collect();

    let mut rows = Vec::with_capacity(symbols.len());
    for (index, symbol) in symbols.iter().enumerate() {
        let step = index as f64;
        let price = 40.0 + step * 17.5;
        let change = ((index % 7) as f64 - 3.0) * 1.35;
        let change_percent = if price == 0.0 {
            0.0
        } else {
            (change / price * 10_000.0).round() / 100.0
        };
        rows.push(InstrumentRow {
            symbol: (*symbol).to_string(),
            name: format!("{} {}", category.title(), symbol),
            price,
            volume: 10_000.0 + step * 1_250.0,
            change,
            change_percent,
            direction: TickDirection::None,
            last_change: change,
        });
    }
    rows
}
