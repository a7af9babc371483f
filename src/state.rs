use crate::quotes::engine::QuoteEngine;
use crate::quotes::types::{WatchlistStatusSnapshot, DEFAULT_CATEGORY};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub struct WatchlistHandle {
    pub engine: QuoteEngine,
    pub startup: JoinHandle<()>,
}

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub watchlist: Mutex<Option<WatchlistHandle>>,
    pub watchlist_status: Arc<RwLock<WatchlistStatusSnapshot>>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        let watchlist_status =
            WatchlistStatusSnapshot::idle(DEFAULT_CATEGORY, Some("watchlist idle".to_string()));

        Self {
            started_at: Instant::now(),
            db_pool,
            watchlist: Mutex::new(None),
            watchlist_status: Arc::new(RwLock::new(watchlist_status)),
        }
    }
}
