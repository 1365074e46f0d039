//! Time- and position-bucketed series for trend charts.

use crate::analysis::aggregator::lookup_total;
use crate::error::AggregationError;
use crate::models::{
    round_percent, CategoryField, DailyCount, DayBucket, Event, MissingTotalPolicy,
    OpportunityTotals, PositionMode, SlotPositionBucket, SLOTS_PER_EPOCH,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Trailing window of the daily moving average.
pub const MOVING_AVERAGE_DAYS: usize = 7;

/// Assigns each category value a stable sort position.
///
/// Values present in `ranking` sort by their position in it; all other
/// values follow in first-seen order.
struct CategoryOrder<'a> {
    positions: HashMap<&'a str, usize>,
    next: usize,
}

impl<'a> CategoryOrder<'a> {
    fn new(ranking: Option<&'a [String]>) -> Self {
        let positions: HashMap<&'a str, usize> = ranking
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, value)| (value.as_str(), i))
            .collect();
        let next = positions.len();
        Self { positions, next }
    }

    fn position(&mut self, value: &'a str) -> usize {
        if let Some(&pos) = self.positions.get(value) {
            return pos;
        }
        let pos = self.next;
        self.positions.insert(value, pos);
        self.next += 1;
        pos
    }
}

/// Group events by `(UTC date, category value)`.
///
/// With `totals`, each bucket also carries `count / category_total * 100`.
/// The denominator is the category's total over the whole lookback horizon,
/// not a per-day total. Output is ascending by date, then by `order`
/// (unlisted values after, first-seen) or first-seen order.
pub fn bucket_by_day_and_category<'a, I>(
    events: I,
    field: CategoryField,
    totals: Option<&OpportunityTotals>,
    exclude: &HashSet<String>,
    order: Option<&'a [String]>,
    policy: MissingTotalPolicy,
) -> Result<Vec<DayBucket>, AggregationError>
where
    I: IntoIterator<Item = &'a Event>,
{
    if totals.is_some_and(|t| t.is_empty()) {
        return Err(AggregationError::MissingTotals {
            field,
            category: None,
        });
    }

    let mut category_order = CategoryOrder::new(order);
    let mut counts: BTreeMap<(NaiveDate, usize), (&'a str, usize)> = BTreeMap::new();

    for event in events {
        let Some(value) = event.category(field) else {
            continue;
        };
        if exclude.contains(value) {
            continue;
        }
        let pos = category_order.position(value);
        counts.entry((event.date(), pos)).or_insert((value, 0)).1 += 1;
    }

    let mut buckets = Vec::with_capacity(counts.len());
    for ((date, _), (category, count)) in counts {
        let relative_percentage = match totals {
            None => None,
            Some(totals) => match lookup_total(totals, category) {
                Some(total) => Some(round_percent(count as f64 / total as f64 * 100.0)),
                None => match policy {
                    MissingTotalPolicy::Drop => continue,
                    MissingTotalPolicy::Null => None,
                    MissingTotalPolicy::Fail => {
                        return Err(AggregationError::MissingTotals {
                            field,
                            category: Some(category.to_string()),
                        })
                    }
                },
            },
        };

        buckets.push(DayBucket {
            date,
            category: category.to_string(),
            count,
            relative_percentage,
        });
    }

    Ok(buckets)
}

/// Count events per position within the epoch (0..=31).
///
/// Without `split` this is a single series over every event and `exclude`
/// is not consulted. With `split`, one series per category value of that
/// dimension (unset and excluded values skipped).
/// `Dense` emits all 32 positions for every series; `Sparse` only the
/// observed combinations.
pub fn bucket_by_slot_position<'a, I>(
    events: I,
    exclude: &HashSet<String>,
    split: Option<CategoryField>,
    mode: PositionMode,
) -> Vec<SlotPositionBucket>
where
    I: IntoIterator<Item = &'a Event>,
{
    let positions = SLOTS_PER_EPOCH as usize;

    let Some(field) = split else {
        let mut counts = vec![0usize; positions];
        for event in events {
            counts[event.slot_in_epoch() as usize] += 1;
        }
        return counts
            .into_iter()
            .enumerate()
            .filter(|(_, count)| mode == PositionMode::Dense || *count > 0)
            .map(|(pos, count)| SlotPositionBucket {
                slot_in_epoch: pos as u8,
                category: None,
                count,
            })
            .collect();
    };

    let mut categories: Vec<&'a str> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut counts: Vec<Vec<usize>> = Vec::new();

    for event in events {
        let Some(value) = event.category(field) else {
            continue;
        };
        if exclude.contains(value) {
            continue;
        }
        let idx = *index.entry(value).or_insert_with(|| {
            categories.push(value);
            counts.push(vec![0; positions]);
            categories.len() - 1
        });
        counts[idx][event.slot_in_epoch() as usize] += 1;
    }

    let mut buckets = Vec::new();
    for pos in 0..positions {
        for (idx, category) in categories.iter().enumerate() {
            let count = counts[idx][pos];
            if mode == PositionMode::Sparse && count == 0 {
                continue;
            }
            buckets.push(SlotPositionBucket {
                slot_in_epoch: pos as u8,
                category: Some(category.to_string()),
                count,
            });
        }
    }

    buckets
}

/// Events per UTC day (observed days only) with a 7-day trailing average.
pub fn daily_counts<'a, I>(events: I) -> Vec<DailyCount>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for event in events {
        *per_day.entry(event.date()).or_default() += 1;
    }

    let values: Vec<f64> = per_day.values().map(|&c| c as f64).collect();
    let averages = moving_average(&values, MOVING_AVERAGE_DAYS);

    per_day
        .into_iter()
        .zip(averages)
        .map(|((date, count), moving_average)| DailyCount {
            date,
            count,
            moving_average,
        })
        .collect()
}

/// Trailing mean over `window` values; the first entries average whatever
/// is available (at least one value).
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut sum = 0.0;

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            sum += value;
            if i >= window {
                sum -= values[i - window];
            }
            sum / (i + 1).min(window) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SLOTS_PER_DAY;

    fn client(slot: u64, label: &str) -> Event {
        Event::new(slot).with_category(CategoryField::ClClient, label)
    }

    #[test]
    fn test_dense_slot_positions_always_32() {
        let events = vec![client(96, "A"), client(97, "A"), client(129, "B")];
        let buckets =
            bucket_by_slot_position(&events, &HashSet::new(), None, PositionMode::Dense);

        assert_eq!(buckets.len(), 32);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[1].count, 2);
        assert!(buckets[2..].iter().all(|b| b.count == 0));
        assert!(buckets
            .iter()
            .enumerate()
            .all(|(i, b)| b.slot_in_epoch as usize == i));

        let empty: Vec<Event> = Vec::new();
        let buckets = bucket_by_slot_position(&empty, &HashSet::new(), None, PositionMode::Dense);
        assert_eq!(buckets.len(), 32);
    }

    #[test]
    fn test_unsplit_slot_positions_ignore_exclusions() {
        let events = vec![client(96, "missed"), client(97, "A")];
        let exclude: HashSet<String> = ["missed".to_string()].into_iter().collect();

        let buckets = bucket_by_slot_position(&events, &exclude, None, PositionMode::Sparse);
        let counts: Vec<(u8, usize)> = buckets.iter().map(|b| (b.slot_in_epoch, b.count)).collect();
        assert_eq!(counts, vec![(0, 1), (1, 1)]);

        let split = bucket_by_slot_position(
            &events,
            &exclude,
            Some(CategoryField::ClClient),
            PositionMode::Sparse,
        );
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].category.as_deref(), Some("A"));
    }

    #[test]
    fn test_sparse_slot_positions_by_category() {
        let events = vec![
            client(96, "B"),
            client(97, "A"),
            client(128, "A"),
            client(130, "missed"),
        ];
        let exclude: HashSet<String> = ["missed".to_string()].into_iter().collect();
        let buckets = bucket_by_slot_position(
            &events,
            &exclude,
            Some(CategoryField::ClClient),
            PositionMode::Sparse,
        );

        let flat: Vec<(u8, &str, usize)> = buckets
            .iter()
            .map(|b| (b.slot_in_epoch, b.category.as_deref().unwrap(), b.count))
            .collect();
        assert_eq!(flat, vec![(0, "B", 1), (0, "A", 1), (1, "A", 1)]);
    }

    #[test]
    fn test_dense_slot_positions_by_category() {
        let events = vec![client(0, "A"), client(1, "B")];
        let buckets = bucket_by_slot_position(
            &events,
            &HashSet::new(),
            Some(CategoryField::ClClient),
            PositionMode::Dense,
        );
        assert_eq!(buckets.len(), 64);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 2);
    }

    #[test]
    fn test_bucket_by_day_and_category() {
        let day = SLOTS_PER_DAY;
        let events = vec![
            client(10, "A"),
            client(11, "B"),
            client(12, "A"),
            client(day + 10, "B"),
            client(day + 11, "Unknown"),
        ];
        let totals = OpportunityTotals::from_pairs(
            CategoryField::ClClient,
            vec![("A", 4), ("B", 8)],
        );
        let exclude: HashSet<String> = ["Unknown".to_string()].into_iter().collect();

        let buckets = bucket_by_day_and_category(
            &events,
            CategoryField::ClClient,
            Some(&totals),
            &exclude,
            None,
            MissingTotalPolicy::Drop,
        )
        .unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].category, "A");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].relative_percentage, Some(50.0));
        assert_eq!(buckets[1].category, "B");
        assert_eq!(buckets[1].relative_percentage, Some(12.5));
        assert!(buckets[2].date > buckets[1].date);
        assert_eq!(buckets[2].category, "B");
    }

    #[test]
    fn test_bucket_by_day_external_order() {
        let events = vec![client(1, "A"), client(2, "C"), client(3, "B")];
        let order = vec!["B".to_string(), "A".to_string()];

        let buckets = bucket_by_day_and_category(
            &events,
            CategoryField::ClClient,
            None,
            &HashSet::new(),
            Some(order.as_slice()),
            MissingTotalPolicy::Fail,
        )
        .unwrap();

        let cats: Vec<&str> = buckets.iter().map(|b| b.category.as_str()).collect();
        assert_eq!(cats, vec!["B", "A", "C"]);
        assert!(buckets.iter().all(|b| b.relative_percentage.is_none()));
    }

    #[test]
    fn test_bucket_by_day_missing_totals() {
        let events = vec![client(1, "A"), client(2, "Z")];
        let totals = OpportunityTotals::from_pairs(CategoryField::ClClient, vec![("A", 2)]);

        let result = bucket_by_day_and_category(
            &events,
            CategoryField::ClClient,
            Some(&totals),
            &HashSet::new(),
            None,
            MissingTotalPolicy::Fail,
        );
        assert!(matches!(
            result,
            Err(AggregationError::MissingTotals { category: Some(ref c), .. }) if c == "Z"
        ));

        let empty = OpportunityTotals::new(CategoryField::ClClient);
        let result = bucket_by_day_and_category(
            &events,
            CategoryField::ClClient,
            Some(&empty),
            &HashSet::new(),
            None,
            MissingTotalPolicy::Drop,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_daily_counts_with_moving_average() {
        let day = SLOTS_PER_DAY;
        let events = vec![client(1, "A"), client(2, "A"), client(day + 1, "A")];
        let daily = daily_counts(&events);

        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].count, 2);
        assert_eq!(daily[0].moving_average, 2.0);
        assert_eq!(daily[1].count, 1);
        assert_eq!(daily[1].moving_average, 1.5);
    }

    #[test]
    fn test_moving_average() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(moving_average(&values, 2), vec![1.0, 1.5, 2.5, 3.5]);
        assert_eq!(moving_average(&values, 10), vec![1.0, 1.5, 2.0, 2.5]);
        assert!(moving_average(&[], 7).is_empty());
    }
}
