use crate::error::AppError;
use crate::quotes::engine::QuoteEngine;
use crate::quotes::types::{
    Category, InstrumentRow, StartWatchlistArgs, WatchlistSession, WatchlistStatusSnapshot,
    WatchlistStopResult,
};
use crate::state::{AppState, WatchlistHandle};
use std::sync::Arc;

pub async fn start_watchlist(
    state: &AppState,
    args: Option<StartWatchlistArgs>,
) -> Result<WatchlistSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut watchlist_slot = state.watchlist.lock().await;
        watchlist_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.engine.shutdown().await;
        let _ = handle.startup.await;
    }

    let engine = QuoteEngine::new(config.clone(), Arc::clone(&state.watchlist_status));
    let startup_engine = engine.clone();
    let startup = tokio::spawn(async move {
        startup_engine.start().await;
    });

    {
        let mut watchlist_slot = state.watchlist.lock().await;
        *watchlist_slot = Some(WatchlistHandle { engine, startup });
    }

    Ok(WatchlistSession::from_config(&config))
}

pub async fn stop_watchlist(state: &AppState) -> Result<WatchlistStopResult, AppError> {
    let existing_handle = {
        let mut watchlist_slot = state.watchlist.lock().await;
        watchlist_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.engine.shutdown().await;
        let _ = handle.startup.await;
        true
    } else {
        false
    };

    Ok(WatchlistStopResult { stopped })
}

pub async fn watchlist_status(state: &AppState) -> Result<WatchlistStatusSnapshot, AppError> {
    Ok(state.watchlist_status.read().await.clone())
}

async fn running_engine(state: &AppState) -> Result<QuoteEngine, AppError> {
    let watchlist_slot = state.watchlist.lock().await;
    watchlist_slot
        .as_ref()
        .map(|handle| handle.engine.clone())
        .ok_or(AppError::WatchlistNotRunning)
}

pub async fn watchlist_set_query(state: &AppState, query: String) -> Result<(), AppError> {
    running_engine(state).await?.set_query(&query).await;
    Ok(())
}

pub async fn watchlist_set_category(state: &AppState, category: Category) -> Result<(), AppError> {
    running_engine(state).await?.set_category(category).await;
    Ok(())
}

pub async fn watchlist_set_page(state: &AppState, page_index: usize) -> Result<(), AppError> {
    running_engine(state).await?.set_page(page_index).await;
    Ok(())
}

pub async fn watchlist_refresh(state: &AppState) -> Result<(), AppError> {
    running_engine(state).await?.refresh().await;
    Ok(())
}

pub async fn watchlist_visible_rows(state: &AppState) -> Result<Vec<InstrumentRow>, AppError> {
    Ok(running_engine(state).await?.visible_rows())
}
