use crate::quotes::engine::EngineInner;
use crate::quotes::types::TickDirection;
use crate::quotes::WatchlistEvent;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TICK_DELAY_MIN_MS: u64 = 500;
pub const TICK_DELAY_MAX_MS: u64 = 1_000;
pub const TICK_FACTOR_EPSILON: f64 = 0.005;
pub const DIRECTION_FLASH_MS: u64 = 300;

/// One live tick task. The token cancels all future wake-ups; a wake-up
/// already past its timer is allowed to finish its current step.
pub(crate) struct ScheduledTask {
    pub(crate) token: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

/// Registry of live tick tasks, keyed by symbol. At most one task per symbol
/// at any time.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: HashMap<String, ScheduledTask>,
}

impl TaskRegistry {
    pub(crate) fn contains(&self, symbol: &str) -> bool {
        self.tasks.contains_key(symbol)
    }

    pub(crate) fn insert(&mut self, symbol: String, task: ScheduledTask) {
        self.tasks.insert(symbol, task);
    }

    /// Cancels and removes every task whose symbol is not in `desired`.
    /// Returns how many were cancelled.
    pub(crate) fn cancel_except(&mut self, desired: &[String]) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|symbol, task| {
            let keep = desired.iter().any(|wanted| wanted == symbol);
            if !keep {
                task.token.cancel();
            }
            keep
        });
        before - self.tasks.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<ScheduledTask> {
        self.tasks.drain().map(|(_, task)| task).collect()
    }

    pub(crate) fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tasks.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Brings the live task set exactly in line with the current visible set:
/// a set difference in both directions, idempotent, never two tasks for one
/// symbol. Returns (started, cancelled).
pub(crate) fn reconcile(inner: &Arc<EngineInner>) -> (usize, usize) {
    let desired: Vec<String> = inner.data.lock().visible.clone();
    let mut registry = inner.registry.lock();

    let cancelled = registry.cancel_except(&desired);

    let mut started = 0;
    for symbol in desired {
        if registry.contains(&symbol) {
            continue;
        }
        let token = inner.root_token.child_token();
        let seed = inner.next_task_seed();
        let task_inner = Arc::clone(inner);
        let task_symbol = symbol.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            run_tick_task(
                task_inner,
                task_symbol,
                task_token,
                SmallRng::seed_from_u64(seed),
            )
            .await;
        });
        registry.insert(symbol, ScheduledTask { token, join });
        started += 1;
    }

    if started > 0 || cancelled > 0 {
        tracing::debug!(started, cancelled, "reconciled tick tasks");
    }
    (started, cancelled)
}

/// One symbol's self-rescheduling tick loop. Missing row or baseline is a
/// transient condition, not a reason to terminate; reconciliation owns the
/// task's lifetime, the visibility check at the bottom is a safety net.
pub(crate) async fn run_tick_task(
    inner: Arc<EngineInner>,
    symbol: String,
    token: CancellationToken,
    mut rng: SmallRng,
) {
    loop {
        let delay = tick_delay(&mut rng);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if !apply_tick(&inner, &symbol, &mut rng) {
            continue;
        }
        let _ = inner.events.send(WatchlistEvent::RowsMutated);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(DIRECTION_FLASH_MS)) => {}
        }
        if clear_direction(&inner, &symbol) {
            let _ = inner.events.send(WatchlistEvent::RowsMutated);
        }

        if !inner.is_symbol_visible(&symbol) {
            break;
        }
    }
}

pub(crate) fn apply_tick(inner: &EngineInner, symbol: &str, rng: &mut impl Rng) -> bool {
    let mut state = inner.data.lock();
    if !state.visible.iter().any(|visible| visible == symbol) {
        return false;
    }
    let Some(baseline) = state.baselines.get(symbol) else {
        return false;
    };
    let Some(row) = state.rows.get_mut(symbol) else {
        return false;
    };

    let factor = draw_factor(rng);
    let new_change = round2(baseline.reference_change * factor);
    let new_percent = scale_percent(
        baseline.reference_percent,
        baseline.reference_change,
        new_change,
    );

    let previous = row.change;
    row.last_change = previous;
    row.change = new_change;
    row.change_percent = new_percent;
    row.direction = if new_change > previous {
        TickDirection::Up
    } else if new_change < previous {
        TickDirection::Down
    } else {
        TickDirection::None
    };
    true
}

pub(crate) fn clear_direction(inner: &EngineInner, symbol: &str) -> bool {
    let mut state = inner.data.lock();
    match state.rows.get_mut(symbol) {
        Some(row) if row.direction != TickDirection::None => {
            row.direction = TickDirection::None;
            true
        }
        _ => false,
    }
}

pub(crate) fn tick_delay(rng: &mut impl Rng) -> Duration {
    Duration::from_millis(rng.random_range(TICK_DELAY_MIN_MS..=TICK_DELAY_MAX_MS))
}

pub(crate) fn draw_factor(rng: &mut impl Rng) -> f64 {
    rng.random_range(1.0 - TICK_FACTOR_EPSILON..=1.0 + TICK_FACTOR_EPSILON)
}

/// Two decimals, half away from zero. The signed nudge keeps values whose
/// binary form sits just under an `.xx5` boundary from rounding down.
pub fn round2(value: f64) -> f64 {
    let nudge = if value.is_sign_negative() {
        -1e-9
    } else {
        1e-9
    };
    ((value + nudge) * 100.0).round() / 100.0
}

/// Rule-of-three rescale of the reference percent; a zero reference change
/// pins the ratio to zero instead of dividing by it.
pub(crate) fn scale_percent(reference_percent: f64, reference_change: f64, new_change: f64) -> f64 {
    let ratio = if reference_change == 0.0 {
        0.0
    } else {
        new_change / reference_change
    };
    round2(reference_percent * ratio)
}
