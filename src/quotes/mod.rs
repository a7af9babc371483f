pub mod baseline;
pub mod engine;
pub mod persistence;
pub mod resolver;
pub mod scheduler;
pub mod transport;
pub mod types;

use crate::quotes::types::WatchlistStatusSnapshot;
use serde::Serialize;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Signals pushed to the host render layer. `RowsMutated` is the minimal
/// dirty hint for hosts that do not dirty-check the rows themselves.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum WatchlistEvent {
    RowsMutated,
    Status(WatchlistStatusSnapshot),
}
