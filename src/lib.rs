pub mod commands;
pub mod db;
pub mod error;
pub mod quotes;
pub mod state;

pub use error::AppError;
pub use quotes::engine::QuoteEngine;
pub use quotes::WatchlistEvent;
pub use state::AppState;
