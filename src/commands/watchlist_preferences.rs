use crate::error::AppError;
use crate::quotes::persistence::{get_watchlist_preferences, save_watchlist_preferences};
use crate::quotes::types::{SaveWatchlistPreferencesArgs, WatchlistPreferencesSnapshot};
use crate::state::AppState;

pub async fn watchlist_preferences_get(
    state: &AppState,
) -> Result<WatchlistPreferencesSnapshot, AppError> {
    get_watchlist_preferences(&state.db_pool).await
}

pub async fn watchlist_preferences_save(
    state: &AppState,
    args: SaveWatchlistPreferencesArgs,
) -> Result<WatchlistPreferencesSnapshot, AppError> {
    save_watchlist_preferences(&state.db_pool, args).await
}
