//! Windowed metric aggregation.
//!
//! This module turns an event table plus per-category opportunity totals
//! into ranked per-category rows, one ranking per trailing window.

use crate::error::AggregationError;
use crate::models::{
    round_percent, CategoryField, Event, MissingTotalPolicy, OpportunityTotals,
    RankedMetricRow, WindowRanking, SLOTS_PER_DAY,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Hex identifiers longer than this are shortened for display.
const HEX_DISPLAY_CHARS: usize = 9;

/// Compute the slot cutoff of a trailing window: `max(slot) - days * 7200`.
///
/// Events with `slot > cutoff` fall inside the window. The result is signed
/// because short tables can produce a cutoff before genesis.
pub fn compute_window_cutoff<'a, I>(events: I, window_days: u32) -> Result<i64, AggregationError>
where
    I: IntoIterator<Item = &'a Event>,
{
    let max_slot = events
        .into_iter()
        .map(|e| e.slot)
        .max()
        .ok_or(AggregationError::EmptyInput)?;

    let max_slot =
        i64::try_from(max_slot).map_err(|_| AggregationError::MalformedSlot(max_slot.to_string()))?;
    Ok(max_slot - i64::from(window_days) * SLOTS_PER_DAY as i64)
}

/// Borrowing view over the events of a table with `slot > cutoff_slot`.
///
/// The view is lazy and restartable: every call to [`WindowView::iter`]
/// walks the underlying slice again, so several windows over one table can
/// coexist without copying or mutating it.
#[derive(Debug, Clone, Copy)]
pub struct WindowView<'a> {
    events: &'a [Event],
    cutoff_slot: i64,
}

impl<'a> WindowView<'a> {
    pub fn cutoff_slot(&self) -> i64 {
        self.cutoff_slot
    }

    pub fn iter(&self) -> WindowIter<'a> {
        WindowIter {
            inner: self.events.iter(),
            cutoff_slot: self.cutoff_slot,
        }
    }

    /// Number of events inside the window (walks the slice).
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Narrow the view further. Refining with the view's own cutoff is a no-op.
    pub fn refine(self, cutoff_slot: i64) -> WindowView<'a> {
        WindowView {
            events: self.events,
            cutoff_slot: self.cutoff_slot.max(cutoff_slot),
        }
    }
}

impl<'a> IntoIterator for WindowView<'a> {
    type Item = &'a Event;
    type IntoIter = WindowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &WindowView<'a> {
    type Item = &'a Event;
    type IntoIter = WindowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the events of a [`WindowView`].
#[derive(Debug, Clone)]
pub struct WindowIter<'a> {
    inner: std::slice::Iter<'a, Event>,
    cutoff_slot: i64,
}

impl<'a> Iterator for WindowIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let cutoff = self.cutoff_slot;
        // a negative cutoff admits every slot
        self.inner
            .by_ref()
            .find(|e| cutoff < 0 || e.slot > cutoff as u64)
    }
}

/// Restrict events to `slot > cutoff_slot`, preserving row order.
pub fn filter_window(events: &[Event], cutoff_slot: i64) -> WindowView<'_> {
    WindowView {
        events,
        cutoff_slot,
    }
}

/// Rank category values by their share of opportunity totals.
///
/// Order of operations matters for tie-breaks and truncation: exclusion,
/// first-seen counting, join with totals (per `policy`), percentage,
/// display normalization, stable descending sort, truncation, ranking.
/// Rows whose category value is unset are skipped like excluded ones.
pub fn rank_by_category<'a, I>(
    events: I,
    field: CategoryField,
    totals: &OpportunityTotals,
    exclude: &HashSet<String>,
    top_n: Option<usize>,
    policy: MissingTotalPolicy,
) -> Result<Vec<RankedMetricRow>, AggregationError>
where
    I: IntoIterator<Item = &'a Event>,
{
    if totals.is_empty() {
        return Err(AggregationError::MissingTotals {
            field,
            category: None,
        });
    }

    let counts = count_by_category(events, field, exclude);

    let mut rows = Vec::with_capacity(counts.len());
    for (category, count) in counts {
        let relative_percentage = match lookup_total(totals, &category) {
            Some(total) => Some(round_percent(count as f64 / total as f64 * 100.0)),
            None => match policy {
                MissingTotalPolicy::Drop => {
                    debug!("Dropping {} '{}': no opportunity total", field, category);
                    continue;
                }
                MissingTotalPolicy::Null => None,
                MissingTotalPolicy::Fail => {
                    return Err(AggregationError::MissingTotals {
                        field,
                        category: Some(category),
                    })
                }
            },
        };

        if count == 0 {
            continue;
        }

        rows.push(RankedMetricRow {
            display_name: normalize_display_name(&category),
            category,
            absolute_count: count,
            relative_percentage,
            rank: 0,
        });
    }

    // Vec::sort_by is stable; equal shares keep first-seen order
    rows.sort_by(|a, b| compare_share_desc(a.relative_percentage, b.relative_percentage));

    if let Some(n) = top_n {
        rows.truncate(n);
    }

    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    Ok(rows)
}

/// Rank one category dimension for each trailing window.
pub fn window_rankings(
    events: &[Event],
    field: CategoryField,
    totals: &OpportunityTotals,
    exclude: &HashSet<String>,
    windows: &[u32],
    top_n: Option<usize>,
    policy: MissingTotalPolicy,
) -> Result<Vec<WindowRanking>, AggregationError> {
    windows
        .iter()
        .map(|&window_days| {
            let cutoff_slot = compute_window_cutoff(events, window_days)?;
            let view = filter_window(events, cutoff_slot);
            let rows = rank_by_category(view, field, totals, exclude, top_n, policy)?;
            Ok(WindowRanking {
                window_days,
                cutoff_slot: view.cutoff_slot(),
                rows,
            })
        })
        .collect()
}

/// Count events per category value, in first-seen order.
pub(crate) fn count_by_category<'a, I>(
    events: I,
    field: CategoryField,
    exclude: &HashSet<String>,
) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();

    for value in events.into_iter().filter_map(|e| e.category(field)) {
        if exclude.contains(value) {
            continue;
        }
        match index.get(value) {
            Some(&pos) => counts[pos].1 += 1,
            None => {
                index.insert(value, counts.len());
                counts.push((value.to_string(), 1));
            }
        }
    }

    counts
}

/// Opportunity total for a category; a zero total counts as missing.
pub(crate) fn lookup_total(totals: &OpportunityTotals, category: &str) -> Option<u64> {
    totals.get(category).filter(|&total| total > 0)
}

/// Descending by share; rows without a share sort after all others.
fn compare_share_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Normalize a category value for display.
///
/// Hex identifiers (`0x...`) are cut to their first 9 characters plus
/// `...`; anything else gets its first letter capitalized.
pub fn normalize_display_name(value: &str) -> String {
    if value.starts_with("0x") {
        if value.chars().count() > HEX_DISPLAY_CHARS {
            let prefix: String = value.chars().take(HEX_DISPLAY_CHARS).collect();
            return format!("{}...", prefix);
        }
        return value.to_string();
    }

    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MISSED_SENTINEL, UNKNOWN_SENTINEL};

    fn default_exclusions() -> HashSet<String> {
        [MISSED_SENTINEL, UNKNOWN_SENTINEL]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn labeled(slot: u64, label: &str) -> Event {
        Event::new(slot).with_category(CategoryField::ClClient, label)
    }

    fn client_totals(pairs: &[(&str, u64)]) -> OpportunityTotals {
        OpportunityTotals::from_pairs(CategoryField::ClClient, pairs.iter().copied())
    }

    #[test]
    fn test_compute_window_cutoff() {
        let events = vec![labeled(5, "A"), labeled(7205, "A"), labeled(100, "B")];
        assert_eq!(compute_window_cutoff(&events, 1), Ok(5));
        assert_eq!(compute_window_cutoff(&events, 2), Ok(7205 - 14400));
    }

    #[test]
    fn test_compute_window_cutoff_empty() {
        let events: Vec<Event> = Vec::new();
        assert_eq!(
            compute_window_cutoff(&events, 7),
            Err(AggregationError::EmptyInput)
        );
    }

    #[test]
    fn test_window_over_huge_slots() {
        let events = vec![labeled(5, "A"), labeled(u64::MAX, "B")];
        assert_eq!(
            compute_window_cutoff(&events, 1),
            Err(AggregationError::MalformedSlot(u64::MAX.to_string()))
        );

        let slots: Vec<u64> = filter_window(&events, -10).iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![5, u64::MAX]);
        let slots: Vec<u64> = filter_window(&events, i64::MAX).iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![u64::MAX]);
    }

    #[test]
    fn test_filter_window_strict_inequality() {
        let events = vec![labeled(5, "A"), labeled(6, "B"), labeled(7205, "A")];
        let cutoff = compute_window_cutoff(&events, 1).unwrap();
        let view = filter_window(&events, cutoff);

        let slots: Vec<u64> = view.iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![6, 7205]);
        assert_eq!(view.len(), 2);
        // source untouched
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_filter_window_is_restartable_and_idempotent() {
        let events: Vec<Event> = (0..50).map(|s| labeled(s * 10, "A")).collect();
        let view = filter_window(&events, 200);

        let first: Vec<u64> = view.iter().map(|e| e.slot).collect();
        let second: Vec<u64> = view.iter().map(|e| e.slot).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|&s| s as i64 > 200));

        let materialized: Vec<Event> = view.iter().cloned().collect();
        let again: Vec<Event> = filter_window(&materialized, 200).iter().cloned().collect();
        assert_eq!(materialized, again);
        assert_eq!(view.refine(200).len(), materialized.len());
        assert_eq!(view.refine(100).cutoff_slot(), 200);

        // every retained row exists in the source
        assert!(materialized.iter().all(|e| events.contains(e)));
    }

    #[test]
    fn test_independent_windows_over_one_table() {
        let events: Vec<Event> = (0..5).map(|d| labeled(d * SLOTS_PER_DAY, "A")).collect();
        let wide = filter_window(&events, -1);
        let narrow = filter_window(&events, (3 * SLOTS_PER_DAY) as i64);

        assert_eq!(narrow.len(), 1);
        assert_eq!(wide.len(), 5);
        assert_eq!(narrow.len(), 1);
    }

    #[test]
    fn test_rank_by_category_tie_keeps_first_seen() {
        let events = vec![labeled(100, "A"), labeled(101, "B"), labeled(132, "A")];
        let totals = client_totals(&[("A", 10), ("B", 5)]);
        let view = filter_window(&events, 0);

        let rows = rank_by_category(
            view,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category, "A");
        assert_eq!(rows[0].absolute_count, 2);
        assert_eq!(rows[0].relative_percentage, Some(20.0));
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].category, "B");
        assert_eq!(rows[1].absolute_count, 1);
        assert_eq!(rows[1].relative_percentage, Some(20.0));
        assert_eq!(rows[1].rank, 2);
    }

    #[test]
    fn test_rank_by_category_exclusions() {
        let events: Vec<Event> = ["A", "missed", "B", "Unknown", "A"]
            .iter()
            .enumerate()
            .map(|(i, label)| labeled(i as u64, label))
            .collect();
        let totals = client_totals(&[("A", 100), ("B", 100), ("missed", 100)]);

        let rows = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &default_exclusions(),
            None,
            MissingTotalPolicy::Fail,
        )
        .unwrap();

        let counts: Vec<(&str, usize)> = rows
            .iter()
            .map(|r| (r.category.as_str(), r.absolute_count))
            .collect();
        assert_eq!(counts, vec![("A", 2), ("B", 1)]);
    }

    #[test]
    fn test_rank_by_category_sorts_by_share_not_count() {
        let mut events = Vec::new();
        for slot in 0..6 {
            events.push(labeled(slot, "big"));
        }
        events.push(labeled(10, "small"));
        events.push(labeled(11, "small"));
        let totals = client_totals(&[("big", 600), ("small", 4)]);

        let rows = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();

        assert_eq!(rows[0].category, "small");
        assert_eq!(rows[0].relative_percentage, Some(50.0));
        assert_eq!(rows[1].category, "big");
        assert_eq!(rows[1].relative_percentage, Some(1.0));
    }

    #[test]
    fn test_rank_by_category_top_n_and_count_bound() {
        let labels = ["a", "b", "c", "a", "d", "e", "b", "x"];
        let events: Vec<Event> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| labeled(i as u64, l))
            .collect();
        let totals = client_totals(&[("a", 10), ("b", 10), ("c", 10), ("d", 10), ("e", 10), ("x", 10)]);
        let exclude: HashSet<String> = ["x".to_string()].into_iter().collect();

        let all = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &exclude,
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();
        let total: usize = all.iter().map(|r| r.absolute_count).sum();
        assert_eq!(total, 7);

        let top = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &exclude,
            Some(3),
            MissingTotalPolicy::Drop,
        )
        .unwrap();
        assert_eq!(top.len(), 3);
        assert!(top.iter().map(|r| r.absolute_count).sum::<usize>() <= 7);
        assert_eq!(top.last().map(|r| r.rank), Some(3));
        assert!(top
            .iter()
            .all(|r| r.relative_percentage.unwrap() >= 0.0 && r.relative_percentage.unwrap() <= 100.0));
    }

    #[test]
    fn test_rank_by_category_missing_total_policies() {
        let events = vec![labeled(1, "A"), labeled(2, "Z"), labeled(3, "Z")];
        let totals = client_totals(&[("A", 4)]);
        let none = HashSet::new();

        let dropped = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &none,
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].category, "A");

        let nulled = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &none,
            None,
            MissingTotalPolicy::Null,
        )
        .unwrap();
        assert_eq!(nulled.len(), 2);
        assert_eq!(nulled[0].category, "A");
        assert_eq!(nulled[1].category, "Z");
        assert_eq!(nulled[1].relative_percentage, None);
        assert_eq!(nulled[1].absolute_count, 2);

        let failed = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &none,
            None,
            MissingTotalPolicy::Fail,
        );
        assert_eq!(
            failed,
            Err(AggregationError::MissingTotals {
                field: CategoryField::ClClient,
                category: Some("Z".to_string()),
            })
        );
    }

    #[test]
    fn test_rank_by_category_empty_totals() {
        let events = vec![labeled(1, "A")];
        let totals = OpportunityTotals::new(CategoryField::ClClient);
        let result = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            None,
            MissingTotalPolicy::Null,
        );
        assert_eq!(
            result,
            Err(AggregationError::MissingTotals {
                field: CategoryField::ClClient,
                category: None,
            })
        );
    }

    #[test]
    fn test_rank_by_category_zero_total_is_missing() {
        let events = vec![labeled(1, "A")];
        let totals = client_totals(&[("A", 0), ("B", 3)]);
        let rows = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            None,
            MissingTotalPolicy::Null,
        )
        .unwrap();
        assert_eq!(rows[0].relative_percentage, None);
    }

    #[test]
    fn test_rank_by_category_skips_unset_values() {
        let events = vec![labeled(1, "A"), Event::new(2), Event::new(3)];
        let totals = client_totals(&[("A", 1)]);
        let rows = rank_by_category(
            &events,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].relative_percentage, Some(100.0));
    }

    #[test]
    fn test_window_rankings() {
        let events = vec![
            labeled(1, "A"),
            labeled(2, "B"),
            labeled(SLOTS_PER_DAY + 10, "B"),
        ];
        let totals = client_totals(&[("A", 10), ("B", 10)]);

        let rankings = window_rankings(
            &events,
            CategoryField::ClClient,
            &totals,
            &HashSet::new(),
            &[1, 7],
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();

        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].window_days, 1);
        assert_eq!(rankings[0].cutoff_slot, 10);
        assert_eq!(rankings[0].rows.len(), 1);
        assert_eq!(rankings[0].rows[0].category, "B");
        assert_eq!(rankings[1].rows.len(), 2);
        assert_eq!(rankings[1].rows[0].category, "B");
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("lighthouse"), "Lighthouse");
        assert_eq!(normalize_display_name("Prysm"), "Prysm");
        assert_eq!(
            normalize_display_name("0xb67eaa5efcfa1d17319c344e1e5167811afbfe7e"),
            "0xb67eaa5..."
        );
        assert_eq!(normalize_display_name("0xabc"), "0xabc");
        assert_eq!(normalize_display_name(""), "");
    }
}
