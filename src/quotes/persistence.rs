use crate::error::AppError;
use crate::quotes::types::{
    Category, SaveWatchlistPreferencesArgs, WatchlistPreferencesSnapshot, DEFAULT_CATEGORY,
    DEFAULT_PAGE_SIZE,
};
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn map_preferences_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<WatchlistPreferencesSnapshot, AppError> {
    let category_raw: String = row.try_get("category")?;
    let page_size_raw: i64 = row.try_get("page_size")?;
    let updated_at_ms: i64 = row.try_get("updated_at_ms")?;

    Ok(WatchlistPreferencesSnapshot {
        category: Category::parse_str(&category_raw)?,
        page_size: page_size_raw.max(0) as usize,
        updated_at_ms,
    })
}

async fn ensure_watchlist_preferences_seed(pool: &SqlitePool) -> Result<(), AppError> {
    let updated_at_ms = now_unix_ms();
    sqlx::query(
        "INSERT OR IGNORE INTO watchlist_preferences (id, category, page_size, updated_at_ms) VALUES (1, ?, ?, ?)",
    )
    .bind(DEFAULT_CATEGORY.as_str())
    .bind(DEFAULT_PAGE_SIZE as i64)
    .bind(updated_at_ms)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_watchlist_preferences(
    pool: &SqlitePool,
) -> Result<WatchlistPreferencesSnapshot, AppError> {
    ensure_watchlist_preferences_seed(pool).await?;

    let row = sqlx::query(
        "SELECT category, page_size, updated_at_ms FROM watchlist_preferences WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;

    map_preferences_row(&row)
}

pub async fn save_watchlist_preferences(
    pool: &SqlitePool,
    args: SaveWatchlistPreferencesArgs,
) -> Result<WatchlistPreferencesSnapshot, AppError> {
    let normalized = args.normalize()?;
    let updated_at_ms = now_unix_ms();

    sqlx::query(
        "INSERT INTO watchlist_preferences (id, category, page_size, updated_at_ms) VALUES (1, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET category=excluded.category, page_size=excluded.page_size, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(normalized.category.as_str())
    .bind(normalized.page_size as i64)
    .bind(updated_at_ms)
    .execute(pool)
    .await?;

    get_watchlist_preferences(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    // One connection only: every pooled connection to `sqlite::memory:` gets
    // its own database, so the migrated schema must stay on the connection
    // the queries use.
    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should initialize");
        run_migrations(&pool)
            .await
            .expect("migrations should apply");
        pool
    }

    #[tokio::test]
    async fn get_seeds_default_preferences() {
        let pool = memory_pool().await;

        let snapshot = get_watchlist_preferences(&pool)
            .await
            .expect("preferences should be readable");

        assert_eq!(snapshot.category, DEFAULT_CATEGORY);
        assert_eq!(snapshot.page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn save_round_trips_preferences() {
        let pool = memory_pool().await;

        let saved = save_watchlist_preferences(
            &pool,
            SaveWatchlistPreferencesArgs {
                category: Category::Forex,
                page_size: 25,
            },
        )
        .await
        .expect("preferences should save");

        assert_eq!(saved.category, Category::Forex);
        assert_eq!(saved.page_size, 25);

        let reread = get_watchlist_preferences(&pool)
            .await
            .expect("preferences should be readable");
        assert_eq!(reread.category, Category::Forex);
        assert_eq!(reread.page_size, 25);
    }

    #[tokio::test]
    async fn save_rejects_out_of_range_page_size() {
        let pool = memory_pool().await;

        let result = save_watchlist_preferences(
            &pool,
            SaveWatchlistPreferencesArgs {
                category: Category::Stocks,
                page_size: 0,
            },
        )
        .await;

        assert!(result.is_err());
    }
}
