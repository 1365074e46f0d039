//! Headline statistics and auxiliary series for the dashboard.

use crate::analysis::aggregator::{compute_window_cutoff, filter_window};
use crate::models::{epoch_url, slot_url, Event, EventTable};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Headline numbers shown in the dashboard's stat cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    /// Number of events in the table.
    pub total: usize,
    /// UTC date of the most recent event.
    pub latest_date: Option<NaiveDate>,
    /// Events on the most recent event's UTC date.
    pub latest_day: usize,
    /// Events within the trailing 7-day window.
    pub last_7_days: usize,
    /// Events within the trailing 30-day window.
    pub last_30_days: usize,
    pub avg_depth: Option<f64>,
    pub max_depth: Option<u32>,
    /// Human label of the lookback horizon, e.g. "last 3 months".
    pub period_label: String,
}

/// Compute headline statistics. An empty table yields zero counts.
pub fn summarize(table: &EventTable, lookback_days: u32) -> SummaryStats {
    let events = table.as_slice();
    let period_label = period_label(lookback_days);

    let Some(max_slot) = table.max_slot() else {
        return SummaryStats {
            period_label,
            ..SummaryStats::default()
        };
    };

    let window_count = |days: u32| {
        compute_window_cutoff(events, days)
            .map(|cutoff| filter_window(events, cutoff).len())
            .unwrap_or(0)
    };

    let latest_date = Event::new(max_slot).date();
    let latest_day = events.iter().filter(|e| e.date() == latest_date).count();

    let depths: Vec<u32> = events.iter().filter_map(|e| e.depth).collect();
    let avg_depth = if depths.is_empty() {
        None
    } else {
        Some(depths.iter().map(|&d| f64::from(d)).sum::<f64>() / depths.len() as f64)
    };

    SummaryStats {
        total: events.len(),
        latest_date: Some(latest_date),
        latest_day,
        last_7_days: window_count(7),
        last_30_days: window_count(30),
        avg_depth,
        max_depth: depths.iter().copied().max(),
        period_label,
    }
}

/// Describe a lookback horizon in the largest whole unit.
pub fn period_label(days: u32) -> String {
    let (n, unit) = if days >= 365 {
        (days / 365, "year")
    } else if days >= 30 {
        (days / 30, "month")
    } else if days >= 7 {
        (days / 7, "week")
    } else {
        (days, "day")
    };

    if n == 1 {
        format!("last {}", unit)
    } else {
        format!("last {} {}s", n, unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthCount {
    pub depth: u32,
    pub count: usize,
}

/// Count reorgs per depth, ascending by depth.
pub fn depth_distribution<'a, I>(events: I) -> Vec<DepthCount>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for depth in events.into_iter().filter_map(|e| e.depth) {
        *counts.entry(depth).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(depth, count)| DepthCount { depth, count })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCount {
    pub epoch: u64,
    pub count: usize,
}

/// Events per epoch for the most recent `last_n` epochs that had events.
pub fn epoch_counts<'a, I>(events: I, last_n: usize) -> Vec<EpochCount>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for event in events {
        *counts.entry(event.epoch()).or_default() += 1;
    }
    let skip = counts.len().saturating_sub(last_n);
    counts
        .into_iter()
        .skip(skip)
        .map(|(epoch, count)| EpochCount { epoch, count })
        .collect()
}

/// Event counts by hour of day (rows, 0..24) and weekday (columns,
/// Monday..Sunday), zero-filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heatmap {
    pub days: Vec<String>,
    pub hours: Vec<u32>,
    pub counts: Vec<Vec<usize>>,
}

pub fn hour_weekday_heatmap<'a, I>(events: I) -> Heatmap
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut counts = vec![vec![0usize; 7]; 24];
    for event in events {
        let dt = event.datetime();
        let weekday = dt.weekday().num_days_from_monday() as usize;
        counts[dt.hour() as usize][weekday] += 1;
    }

    Heatmap {
        days: WEEKDAYS.iter().map(|d| d.to_string()).collect(),
        hours: (0..24).collect(),
        counts,
    }
}

/// One row of the "recent events" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEvent {
    pub slot: u64,
    pub epoch: u64,
    pub slot_in_epoch: u8,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cl_client: Option<String>,
    pub slot_url: String,
    pub epoch_url: String,
}

/// The latest `n` events, newest first.
pub fn recent_events(table: &EventTable, n: usize) -> Vec<RecentEvent> {
    let mut events: Vec<&Event> = table.iter().collect();
    events.sort_by(|a, b| b.slot.cmp(&a.slot));
    events
        .into_iter()
        .take(n)
        .map(|e| RecentEvent {
            slot: e.slot,
            epoch: e.epoch(),
            slot_in_epoch: e.slot_in_epoch(),
            time: e.datetime(),
            depth: e.depth,
            cl_client: e.cl_client.clone(),
            slot_url: slot_url(e.slot),
            epoch_url: epoch_url(e.epoch()),
        })
        .collect()
}
