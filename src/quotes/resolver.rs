use crate::quotes::types::{Category, InstrumentRow, RowTable};

const EXACT_SCORE: u32 = 3_000_000;
const PREFIX_SCORE: u32 = 2_000_000;
const SUBSTRING_SCORE: u32 = 1_000_000;

/// The ordered page of symbols to render, plus the match count before
/// pagination (for the host's pager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisiblePage {
    pub symbols: Vec<String>,
    pub total_matches: usize,
}

/// Pure and synchronous: safe to call on every keystroke and page click.
/// Without a query, rows order by the category's curated ranking and then
/// alphabetically; with a query, by textual relevance descending. The page
/// window is applied last; an out-of-range page yields an empty page.
pub fn resolve_page(
    rows: &RowTable,
    category: Category,
    query: &str,
    page_index: usize,
    page_size: usize,
) -> VisiblePage {
    let needle = query.trim().to_ascii_uppercase();

    let mut matched: Vec<(u32, &InstrumentRow)> = if needle.is_empty() {
        rows.values().map(|row| (0, row)).collect()
    } else {
        rows.values()
            .filter_map(|row| relevance(row, &needle).map(|score| (score, row)))
            .collect()
    };

    if needle.is_empty() {
        matched.sort_unstable_by(|(_, a), (_, b)| {
            priority_rank(category, &a.symbol)
                .cmp(&priority_rank(category, &b.symbol))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
    } else {
        matched.sort_unstable_by(|(score_a, a), (score_b, b)| {
            score_b
                .cmp(score_a)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
    }

    let total_matches = matched.len();
    let symbols = matched
        .iter()
        .skip(page_index.saturating_mul(page_size))
        .take(page_size)
        .map(|(_, row)| row.symbol.clone())
        .collect();

    VisiblePage {
        symbols,
        total_matches,
    }
}

fn priority_rank(category: Category, symbol: &str) -> usize {
    category
        .priority_symbols()
        .iter()
        .position(|candidate| *candidate == symbol)
        .unwrap_or(usize::MAX)
}

fn relevance(row: &InstrumentRow, needle: &str) -> Option<u32> {
    let symbol_score = tier_score(&row.symbol, needle);
    let name_score = tier_score(&row.name.to_ascii_uppercase(), needle);

    match symbol_score.max(name_score) {
        Some(score) => Some(score),
        None => fuzzy_score(&row.symbol, needle),
    }
}

fn tier_score(hay: &str, needle: &str) -> Option<u32> {
    if hay == needle {
        Some(EXACT_SCORE)
    } else if hay.starts_with(needle) {
        Some(PREFIX_SCORE)
    } else if hay.contains(needle) {
        Some(SUBSTRING_SCORE)
    } else {
        None
    }
}

/// Accepts a near-miss only within an edit-distance budget that grows with
/// the query length; longer queries tolerate more typos.
fn fuzzy_score(symbol: &str, needle: &str) -> Option<u32> {
    let budget = (needle.len() / 3).max(1);
    let distance = edit_distance(symbol, needle);
    if distance > budget {
        return None;
    }

    let span = symbol.len().max(needle.len()).max(1);
    let score = (1_000 * (span - distance) / span) as u32;
    Some(score.max(1))
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &char_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &char_b) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(char_a != char_b);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
