use crate::error::AppError;
use crate::quotes::baseline::BaselineStore;
use crate::quotes::resolver;
use crate::quotes::scheduler::{self, TaskRegistry};
use crate::quotes::transport::{self, SnapshotOutcome};
use crate::quotes::types::{
    Category, InstrumentRow, RowTable, WatchlistConfig, WatchlistPhase, WatchlistStatusSnapshot,
};
use crate::quotes::{WatchlistEvent, EVENT_CHANNEL_CAPACITY};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything the resolver and tick tasks read or mutate, behind one lock:
/// the row table, the baselines for the current snapshot cycle, and the view
/// parameters that define the visible set.
pub(crate) struct WatchState {
    pub(crate) category: Category,
    pub(crate) query: String,
    pub(crate) page_index: usize,
    pub(crate) rows: RowTable,
    pub(crate) baselines: BaselineStore,
    pub(crate) visible: Vec<String>,
    pub(crate) total_matches: usize,
    pub(crate) last_snapshot_ms: Option<i64>,
}

struct WarmupHandle {
    token: CancellationToken,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

pub(crate) struct EngineInner {
    pub(crate) config: WatchlistConfig,
    http: Client,
    pub(crate) data: Mutex<WatchState>,
    pub(crate) registry: Mutex<TaskRegistry>,
    warmup: Mutex<Option<WarmupHandle>>,
    status: Arc<RwLock<WatchlistStatusSnapshot>>,
    pub(crate) events: broadcast::Sender<WatchlistEvent>,
    rng: Mutex<SmallRng>,
    pub(crate) root_token: CancellationToken,
    mock_warmup_left: AtomicU8,
}

impl EngineInner {
    pub(crate) fn next_task_seed(&self) -> u64 {
        self.rng.lock().next_u64()
    }

    pub(crate) fn is_symbol_visible(&self, symbol: &str) -> bool {
        self.data
            .lock()
            .visible
            .iter()
            .any(|visible| visible == symbol)
    }
}

/// The live-quote engine for one watchlist screen: polls category snapshots,
/// retries through server warm-up, and keeps one tick task running per
/// visible instrument.
#[derive(Clone)]
pub struct QuoteEngine {
    inner: Arc<EngineInner>,
}

impl QuoteEngine {
    pub fn new(config: WatchlistConfig, status: Arc<RwLock<WatchlistStatusSnapshot>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let initial_category = config.category;
        let mock_warmup_left = AtomicU8::new(config.mock_warmup_polls);

        let inner = Arc::new(EngineInner {
            http: Client::new(),
            data: Mutex::new(WatchState {
                category: initial_category,
                query: String::new(),
                page_index: 0,
                rows: RowTable::new(),
                baselines: BaselineStore::new(),
                visible: Vec::new(),
                total_matches: 0,
                last_snapshot_ms: None,
            }),
            registry: Mutex::new(TaskRegistry::default()),
            warmup: Mutex::new(None),
            status,
            events,
            rng: Mutex::new(rng),
            root_token: CancellationToken::new(),
            mock_warmup_left,
            config,
        });

        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchlistEvent> {
        self.inner.events.subscribe()
    }

    /// Issues the initial snapshot fetch for the configured category.
    pub async fn start(&self) {
        let category = self.inner.data.lock().category;
        run_fetch_cycle(&self.inner, category).await;
    }

    /// Cancels the warm-up loop and every tick task, then reports `Stopped`.
    pub async fn shutdown(&self) {
        self.inner.root_token.cancel();
        cancel_warmup(&self.inner);

        let tasks = { self.inner.registry.lock().drain() };
        for task in tasks {
            task.token.cancel();
            let _ = task.join.await;
        }

        publish_status(
            &self.inner,
            WatchlistPhase::Stopped,
            Some("watchlist stopped".to_string()),
        )
        .await;
    }

    pub async fn set_query(&self, query: &str) {
        {
            let mut state = self.inner.data.lock();
            state.query = query.to_string();
            state.page_index = 0;
            recompute_visible(&mut state, self.inner.config.page_size);
        }
        scheduler::reconcile(&self.inner);
        let _ = self.inner.events.send(WatchlistEvent::RowsMutated);
        publish_current_status(&self.inner).await;
    }

    pub async fn set_page(&self, page_index: usize) {
        {
            let mut state = self.inner.data.lock();
            state.page_index = page_index;
            recompute_visible(&mut state, self.inner.config.page_size);
        }
        scheduler::reconcile(&self.inner);
        let _ = self.inner.events.send(WatchlistEvent::RowsMutated);
        publish_current_status(&self.inner).await;
    }

    /// Switching category cancels any in-flight warm-up loop before the new
    /// request goes out; a stale loop can never write into the new category.
    pub async fn set_category(&self, category: Category) {
        let unchanged = { self.inner.data.lock().category == category };
        if unchanged {
            return;
        }
        run_fetch_cycle(&self.inner, category).await;
    }

    pub async fn refresh(&self) {
        let category = self.inner.data.lock().category;
        run_fetch_cycle(&self.inner, category).await;
    }

    /// The ordered page currently on screen, cloned from the in-place-mutated
    /// rows.
    pub fn visible_rows(&self) -> Vec<InstrumentRow> {
        let state = self.inner.data.lock();
        state
            .visible
            .iter()
            .filter_map(|symbol| state.rows.get(symbol).cloned())
            .collect()
    }

    pub async fn status(&self) -> WatchlistStatusSnapshot {
        self.inner.status.read().await.clone()
    }
}

async fn run_fetch_cycle(inner: &Arc<EngineInner>, category: Category) {
    cancel_warmup(inner);
    {
        let mut state = inner.data.lock();
        if state.category != category {
            state.category = category;
            state.page_index = 0;
        }
        // Baselines die the moment the next request is issued; tick tasks
        // idle until the fresh snapshot lands.
        state.baselines.clear();
    }
    publish_status(
        inner,
        WatchlistPhase::Fetching,
        Some(format!("loading {} snapshot", category.as_str())),
    )
    .await;

    match fetch_once(inner, category).await {
        Ok(SnapshotOutcome::Ready(rows)) => finish_ready(inner, category, rows).await,
        Ok(SnapshotOutcome::NotReady) => {
            start_warmup(inner, category);
            publish_status(
                inner,
                WatchlistPhase::Warmup,
                Some("server cache warming up".to_string()),
            )
            .await;
        }
        Err(error) => handle_fetch_failure(inner, &error).await,
    }
}

async fn fetch_once(
    inner: &Arc<EngineInner>,
    category: Category,
) -> Result<SnapshotOutcome, AppError> {
    if inner.config.mock_mode {
        let pending =
            inner
                .mock_warmup_left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                    left.checked_sub(1)
                });
        if pending.is_ok() {
            return Ok(SnapshotOutcome::NotReady);
        }
        return Ok(SnapshotOutcome::Ready(transport::build_mock_snapshot(
            category,
        )));
    }

    transport::fetch_snapshot(&inner.http, &inner.config.base_url, category).await
}

async fn finish_ready(inner: &Arc<EngineInner>, category: Category, rows: Vec<InstrumentRow>) {
    if !apply_ready(inner, category, rows) {
        return;
    }
    scheduler::reconcile(inner);
    let _ = inner.events.send(WatchlistEvent::RowsMutated);
    publish_status(inner, WatchlistPhase::Live, None).await;
}

/// Replaces rows and baselines wholesale and recomputes the visible set.
/// Returns false when the response belongs to a category the user has
/// already left, in which case nothing is touched.
fn apply_ready(inner: &Arc<EngineInner>, category: Category, rows: Vec<InstrumentRow>) -> bool {
    if inner.root_token.is_cancelled() {
        return false;
    }
    let mut state = inner.data.lock();
    if state.category != category {
        return false;
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
    let mut deduped: Vec<InstrumentRow> = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(row.symbol.clone()) {
            deduped.push(row);
        }
    }

    state.baselines.replace_all(&deduped);
    state.rows = deduped
        .into_iter()
        .map(|row| (row.symbol.clone(), row))
        .collect();
    state.last_snapshot_ms = Some(now_unix_ms());
    recompute_visible(&mut state, inner.config.page_size);
    true
}

async fn handle_fetch_failure(inner: &Arc<EngineInner>, error: &AppError) {
    tracing::warn!(%error, "snapshot fetch failed; keeping last good rows");
    publish_status(inner, WatchlistPhase::Error, Some(error.to_string())).await;
}

/// Arms the warm-up retry loop unless one is already running. Returns true
/// when a new loop was started.
fn start_warmup(inner: &Arc<EngineInner>, category: Category) -> bool {
    let mut slot = inner.warmup.lock();
    if let Some(handle) = slot.as_ref() {
        if !handle.token.is_cancelled() {
            return false;
        }
    }

    let token = inner.root_token.child_token();
    let task_inner = Arc::clone(inner);
    let task_token = token.clone();
    let join = tokio::spawn(async move {
        run_warmup_poller(task_inner, category, task_token).await;
    });
    *slot = Some(WarmupHandle { token, join });
    true
}

fn cancel_warmup(inner: &Arc<EngineInner>) {
    if let Some(handle) = inner.warmup.lock().take() {
        handle.token.cancel();
    }
}

/// Re-issues the fetch on a fixed interval until the cache is ready or a real
/// error shows up. The token marks itself cancelled on exit so the next
/// `NotReady` can arm a fresh loop.
async fn run_warmup_poller(inner: Arc<EngineInner>, category: Category, token: CancellationToken) {
    let interval = Duration::from_millis(inner.config.warmup_retry_ms);
    let mut attempt = 0_u32;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        attempt += 1;
        match fetch_once(&inner, category).await {
            Ok(SnapshotOutcome::Ready(rows)) => {
                if !token.is_cancelled() {
                    finish_ready(&inner, category, rows).await;
                }
                break;
            }
            Ok(SnapshotOutcome::NotReady) => {
                if !token.is_cancelled() {
                    publish_status(
                        &inner,
                        WatchlistPhase::Warmup,
                        Some(format!("server cache warming up (attempt {attempt})")),
                    )
                    .await;
                }
            }
            Err(error) => {
                if !token.is_cancelled() {
                    handle_fetch_failure(&inner, &error).await;
                }
                break;
            }
        }
    }

    token.cancel();
}

fn recompute_visible(state: &mut WatchState, page_size: usize) {
    let page = resolver::resolve_page(
        &state.rows,
        state.category,
        &state.query,
        state.page_index,
        page_size,
    );
    state.visible = page.symbols;
    state.total_matches = page.total_matches;
}

async fn publish_status(
    inner: &Arc<EngineInner>,
    phase: WatchlistPhase,
    reason: Option<String>,
) {
    let snapshot = {
        let state = inner.data.lock();
        WatchlistStatusSnapshot {
            phase,
            category: state.category,
            row_count: state.rows.len(),
            visible_count: state.visible.len(),
            total_matches: state.total_matches,
            last_snapshot_ms: state.last_snapshot_ms,
            reason,
        }
    };

    {
        let mut writable = inner.status.write().await;
        *writable = snapshot.clone();
    }
    let _ = inner.events.send(WatchlistEvent::Status(snapshot));
}

async fn publish_current_status(inner: &Arc<EngineInner>) {
    let (phase, reason) = {
        let readable = inner.status.read().await;
        (readable.phase, readable.reason.clone())
    };
    publish_status(inner, phase, reason).await;
}

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::scheduler::{apply_tick, clear_direction, reconcile, round2, scale_percent};
    use crate::quotes::types::{StartWatchlistArgs, TickDirection};

    fn test_engine(mock_warmup_polls: u8) -> QuoteEngine {
        let config = StartWatchlistArgs {
            mock_mode: Some(true),
            mock_warmup_polls: Some(mock_warmup_polls),
            rng_seed: Some(42),
            page_size: Some(4),
            ..Default::default()
        }
        .normalize()
        .expect("test args should be valid");

        let status = Arc::new(RwLock::new(WatchlistStatusSnapshot::idle(
            config.category,
            None,
        )));
        QuoteEngine::new(config, status)
    }

    fn scenario_row(symbol: &str, change: f64, change_percent: f64) -> InstrumentRow {
        InstrumentRow {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price: 190.0,
            volume: 5_000.0,
            change,
            change_percent,
            direction: TickDirection::None,
            last_change: change,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_snapshot_goes_live_and_schedules_visible_tasks() {
        let engine = test_engine(0);
        engine.start().await;

        let status = engine.status().await;
        assert_eq!(status.phase, WatchlistPhase::Live);
        assert_eq!(status.visible_count, 4);
        assert!(status.last_snapshot_ms.is_some());

        let visible = { engine.inner.data.lock().visible.clone() };
        assert_eq!(visible[0], "BTCUSDT");

        let mut expected = visible.clone();
        expected.sort_unstable();
        assert_eq!(engine.inner.registry.lock().symbols(), expected);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_perturbs_within_the_factor_window() {
        let engine = test_engine(0);
        engine.start().await;

        let symbol = { engine.inner.data.lock().visible[0].clone() };
        let baseline = {
            engine
                .inner
                .data
                .lock()
                .baselines
                .get(&symbol)
                .expect("visible symbol should have a baseline")
        };

        tokio::time::sleep(Duration::from_millis(1_400)).await;

        let row = engine
            .visible_rows()
            .into_iter()
            .find(|row| row.symbol == symbol)
            .expect("symbol should still be visible");

        let bound_a = round2(baseline.reference_change * 0.995);
        let bound_b = round2(baseline.reference_change * 1.005);
        let low = bound_a.min(bound_b);
        let high = bound_a.max(bound_b);
        assert!(
            row.change >= low && row.change <= high,
            "change {} escaped [{low}, {high}]",
            row.change
        );
        assert_eq!(
            row.change_percent,
            scale_percent(
                baseline.reference_percent,
                baseline.reference_change,
                row.change
            )
        );

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_instrument_scenario_stays_in_expected_window() {
        let engine = test_engine(0);
        assert!(apply_ready(
            &engine.inner,
            Category::Crypto,
            vec![scenario_row("AAPL", 2.0, 1.5)],
        ));
        reconcile(&engine.inner);

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let row = engine
            .visible_rows()
            .into_iter()
            .find(|row| row.symbol == "AAPL")
            .expect("row should be visible");
        assert!(row.change >= 1.99 && row.change <= 2.01);
        assert_eq!(row.change_percent, scale_percent(1.5, 2.0, row.change));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn direction_flag_compares_against_previously_displayed_change() {
        let engine = test_engine(0);
        engine.start().await;

        let symbol = { engine.inner.data.lock().visible[0].clone() };
        {
            let mut state = engine.inner.data.lock();
            state.rows.get_mut(&symbol).expect("row exists").change = 999.0;
        }

        let mut rng = SmallRng::seed_from_u64(9);
        assert!(apply_tick(&engine.inner, &symbol, &mut rng));

        let row = { engine.inner.data.lock().rows.get(&symbol).cloned().unwrap() };
        assert_eq!(row.last_change, 999.0);
        // The new change hugs the baseline, far below the previously shown
        // 999.0, so the flag must read Down regardless of the baseline.
        assert_eq!(row.direction, TickDirection::Down);

        assert!(clear_direction(&engine.inner, &symbol));
        let row = { engine.inner.data.lock().rows.get(&symbol).cloned().unwrap() };
        assert_eq!(row.direction, TickDirection::None);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_twice_causes_no_churn() {
        let engine = test_engine(0);
        engine.start().await;

        let (started, cancelled) = reconcile(&engine.inner);
        assert_eq!((started, cancelled), (0, 0));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paging_out_cancels_tasks_before_their_next_tick() {
        let engine = test_engine(0);
        engine.start().await;

        let parked = { engine.inner.data.lock().visible[0].clone() };
        let frozen = {
            engine
                .inner
                .data
                .lock()
                .rows
                .get(&parked)
                .cloned()
                .expect("row exists")
        };

        engine.set_page(1).await;
        assert!(!engine.inner.registry.lock().contains(&parked));

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let row = {
            engine
                .inner
                .data
                .lock()
                .rows
                .get(&parked)
                .cloned()
                .expect("row exists")
        };
        assert_eq!(row, frozen);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn query_change_rebuilds_visible_set_and_tasks() {
        let engine = test_engine(0);
        engine.start().await;

        engine.set_query("doge").await;
        let visible = { engine.inner.data.lock().visible.clone() };
        assert_eq!(visible, vec!["DOGEUSDT"]);
        assert_eq!(engine.inner.registry.lock().symbols(), vec!["DOGEUSDT"]);

        engine.set_query("").await;
        assert_eq!(engine.inner.registry.lock().len(), 4);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_starts_a_single_retry_loop_and_recovers() {
        let engine = test_engine(2);
        engine.start().await;

        assert_eq!(engine.status().await.phase, WatchlistPhase::Warmup);
        assert_eq!(engine.inner.registry.lock().len(), 0);

        // A second NotReady observed before the first retry fires must not
        // arm another loop.
        assert!(!start_warmup(&engine.inner, Category::Crypto));

        tokio::time::sleep(Duration::from_millis(6_000)).await;

        let status = engine.status().await;
        assert_eq!(status.phase, WatchlistPhase::Live);
        assert_eq!(engine.inner.registry.lock().len(), 4);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn category_switch_cancels_warmup_and_ignores_stale_state() {
        let engine = test_engine(1);
        engine.start().await;
        assert_eq!(engine.status().await.phase, WatchlistPhase::Warmup);

        let stale_token = {
            engine
                .inner
                .warmup
                .lock()
                .as_ref()
                .expect("warm-up loop should be armed")
                .token
                .clone()
        };

        engine.set_category(Category::Stocks).await;
        assert!(stale_token.is_cancelled());

        let status = engine.status().await;
        assert_eq!(status.phase, WatchlistPhase::Live);
        assert_eq!(status.category, Category::Stocks);

        tokio::time::sleep(Duration::from_millis(10_000)).await;

        {
            let state = engine.inner.data.lock();
            assert_eq!(state.category, Category::Stocks);
            assert!(state.rows.contains_key("AAPL"));
            assert!(!state.rows.contains_key("BTCUSDT"));
            assert!(state.baselines.get("AAPL").is_some());
            assert!(state.baselines.get("BTCUSDT").is_none());
        }

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ready_payload_for_previous_category_is_dropped() {
        let engine = test_engine(0);
        engine.start().await;

        let stale = transport::build_mock_snapshot(Category::Stocks);
        assert!(!apply_ready(&engine.inner, Category::Stocks, stale));
        assert!(engine.inner.data.lock().rows.contains_key("BTCUSDT"));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_keeps_last_good_rows_on_screen() {
        let engine = test_engine(0);
        engine.start().await;
        let before = engine.visible_rows();

        handle_fetch_failure(
            &engine.inner,
            &AppError::InvalidArgument("backend offline".to_string()),
        )
        .await;

        let status = engine.status().await;
        assert_eq!(status.phase, WatchlistPhase::Error);
        assert_eq!(engine.visible_rows().len(), before.len());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_task_survives_a_cleared_baseline() {
        let engine = test_engine(0);
        engine.start().await;

        {
            engine.inner.data.lock().baselines.clear();
        }
        let before = engine.visible_rows();

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(engine.visible_rows(), before);
        assert_eq!(engine.inner.registry.lock().len(), 4);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dedupes_rows_that_normalize_to_the_same_symbol() {
        let engine = test_engine(0);
        assert!(apply_ready(
            &engine.inner,
            Category::Crypto,
            vec![scenario_row("AAPL", 2.0, 1.5), scenario_row("AAPL", 9.0, 4.0)],
        ));

        let state = engine.inner.data.lock();
        assert_eq!(state.rows.len(), 1);
        assert_eq!(state.rows.get("AAPL").unwrap().change, 2.0);
        assert_eq!(state.baselines.get("AAPL").unwrap().reference_change, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_every_task() {
        let engine = test_engine(0);
        engine.start().await;
        engine.shutdown().await;

        assert_eq!(engine.inner.registry.lock().len(), 0);
        assert_eq!(engine.status().await.phase, WatchlistPhase::Stopped);
    }
}
