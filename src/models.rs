//! Data models for the reorg dashboard.
//!
//! This module contains the core data structures used throughout the
//! application: slot events, opportunity totals, and the ranked/bucketed
//! rows handed to the chart layer.

use crate::error::AggregationError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Unix time of slot 0 on mainnet.
pub const GENESIS_EPOCH_SECONDS: i64 = 1_606_824_023;

/// Duration of one slot in seconds.
pub const SECONDS_PER_SLOT: i64 = 12;

/// Number of slots in one epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Number of slots in one day (86400 / 12).
pub const SLOTS_PER_DAY: u64 = 7200;

/// Precision (decimal places) of relative percentages.
pub const PERCENT_PRECISION: i32 = 5;

/// Sentinel category values that are usually excluded from rankings.
pub const MISSED_SENTINEL: &str = "missed";
pub const UNKNOWN_SENTINEL: &str = "Unknown";

const BEACONCHAIN_URL: &str = "https://beaconcha.in";

/// 9999-12-31T23:59:59Z
const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Largest slot whose timestamp falls before year 10000.
pub const MAX_SLOT: u64 = ((MAX_TIMESTAMP - GENESIS_EPOCH_SECONDS) / SECONDS_PER_SLOT) as u64;

/// Convert a slot number to its unix timestamp. Slots past [`MAX_SLOT`] clamp to it.
pub fn slot_timestamp(slot: u64) -> i64 {
    // MAX_SLOT * 12 fits comfortably in i64
    GENESIS_EPOCH_SECONDS + slot.min(MAX_SLOT) as i64 * SECONDS_PER_SLOT
}

/// Convert a slot number to a UTC datetime.
pub fn slot_datetime(slot: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(slot_timestamp(slot), 0).unwrap_or_default()
}

/// Position of a slot within its epoch (0..=31).
pub fn slot_in_epoch(slot: u64) -> u8 {
    (slot % SLOTS_PER_EPOCH) as u8
}

/// Epoch containing the given slot.
pub fn epoch_of(slot: u64) -> u64 {
    slot / SLOTS_PER_EPOCH
}

pub fn slot_url(slot: u64) -> String {
    format!("{}/slot/{}", BEACONCHAIN_URL, slot)
}

pub fn epoch_url(epoch: u64) -> String {
    format!("{}/epoch/{}", BEACONCHAIN_URL, epoch)
}

/// Markdown link decoration used by the extraction job for the slot column.
pub fn slot_markdown_link(slot: u64) -> String {
    format!("[{}]({})", slot, slot_url(slot))
}

/// Parse a slot cell, accepting either a bare integer or the markdown link
/// decoration `[N](https://beaconcha.in/slot/N)`.
pub fn parse_slot(raw: &str) -> Result<u64, AggregationError> {
    let trimmed = raw.trim();
    let digits = match trimmed.strip_prefix('[') {
        Some(rest) => rest
            .split_once(']')
            .map(|(inner, _)| inner.trim())
            .ok_or_else(|| AggregationError::MalformedSlot(raw.to_string()))?,
        None => trimmed,
    };

    // pandas writes integer columns with NaNs as floats ("123.0")
    let digits = digits.strip_suffix(".0").unwrap_or(digits);

    match digits.parse::<u64>() {
        Ok(slot) if slot <= MAX_SLOT => Ok(slot),
        _ => Err(AggregationError::MalformedSlot(raw.to_string())),
    }
}

/// Round a value to `PERCENT_PRECISION` decimal places.
pub fn round_percent(value: f64) -> f64 {
    let factor = 10f64.powi(PERCENT_PRECISION);
    (value * factor).round() / factor
}

/// A category dimension attributed to each slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryField {
    /// Consensus-layer client of the proposer
    ClClient,
    /// Proposer validator index (or the "missed" sentinel)
    ValidatorId,
    /// Staking entity the proposer belongs to
    Validator,
    /// MEV-Boost relay
    Relay,
    /// MEV-Boost block builder
    Builder,
}

impl CategoryField {
    /// Fields that have an opportunity-totals table.
    pub const RANKED: [CategoryField; 4] = [
        CategoryField::ClClient,
        CategoryField::Validator,
        CategoryField::Relay,
        CategoryField::Builder,
    ];

    /// CSV column name.
    pub fn column(&self) -> &'static str {
        match self {
            CategoryField::ClClient => "cl_client",
            CategoryField::ValidatorId => "validator_id",
            CategoryField::Validator => "validator",
            CategoryField::Relay => "relay",
            CategoryField::Builder => "builder",
        }
    }

    /// Human readable label for chart titles.
    pub fn label(&self) -> &'static str {
        match self {
            CategoryField::ClClient => "CL Client",
            CategoryField::ValidatorId => "Validator ID",
            CategoryField::Validator => "Validator",
            CategoryField::Relay => "Relay",
            CategoryField::Builder => "Builder",
        }
    }
}

impl fmt::Display for CategoryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl FromStr for CategoryField {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "cl_client" | "client" => Ok(CategoryField::ClClient),
            "validator_id" => Ok(CategoryField::ValidatorId),
            "validator" => Ok(CategoryField::Validator),
            "relay" => Ok(CategoryField::Relay),
            "builder" => Ok(CategoryField::Builder),
            _ => Err(AggregationError::UnknownField(s.to_string())),
        }
    }
}

/// One row per on-chain slot outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Slot number, unique within a loaded table.
    pub slot: u64,
    pub cl_client: Option<String>,
    pub validator_id: Option<String>,
    pub validator: Option<String>,
    pub relay: Option<String>,
    pub builder: Option<String>,
    /// Whether the slot was not produced.
    pub missed: bool,
    /// Reorg depth in blocks, for reorg tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl Event {
    /// Creates an event with every category dimension unset.
    pub fn new(slot: u64) -> Self {
        Self {
            slot,
            cl_client: None,
            validator_id: None,
            validator: None,
            relay: None,
            builder: None,
            missed: false,
            depth: None,
        }
    }

    /// Returns a copy with one category dimension set.
    #[cfg(test)]
    pub fn with_category(mut self, field: CategoryField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            CategoryField::ClClient => self.cl_client = value,
            CategoryField::ValidatorId => self.validator_id = value,
            CategoryField::Validator => self.validator = value,
            CategoryField::Relay => self.relay = value,
            CategoryField::Builder => self.builder = value,
        }
        self
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        slot_datetime(self.slot)
    }

    /// UTC calendar date of the slot.
    pub fn date(&self) -> NaiveDate {
        self.datetime().date_naive()
    }

    pub fn slot_in_epoch(&self) -> u8 {
        slot_in_epoch(self.slot)
    }

    pub fn epoch(&self) -> u64 {
        epoch_of(self.slot)
    }

    pub fn is_missed(&self) -> bool {
        self.missed
    }

    /// Value of a category dimension, if set.
    pub fn category(&self, field: CategoryField) -> Option<&str> {
        match field {
            CategoryField::ClClient => self.cl_client.as_deref(),
            CategoryField::ValidatorId => self.validator_id.as_deref(),
            CategoryField::Validator => self.validator.as_deref(),
            CategoryField::Relay => self.relay.as_deref(),
            CategoryField::Builder => self.builder.as_deref(),
        }
    }
}

/// An immutable table of events with unique slots, in load order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventTable {
    events: Vec<Event>,
}

impl EventTable {
    /// Builds a table, collapsing rows that share a slot. The first row wins,
    /// except that the smallest reported depth is kept.
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut index: HashMap<u64, usize> = HashMap::with_capacity(events.len());
        let mut unique: Vec<Event> = Vec::with_capacity(events.len());

        for event in events {
            match index.get(&event.slot) {
                Some(&pos) => {
                    let kept = &mut unique[pos];
                    kept.depth = match (kept.depth, event.depth) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                None => {
                    index.insert(event.slot, unique.len());
                    unique.push(event);
                }
            }
        }

        Self { events: unique }
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_slot(&self) -> Option<u64> {
        self.events.iter().map(|e| e.slot).max()
    }
}

impl<'a> IntoIterator for &'a EventTable {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Total slots assigned to each category value over the lookback horizon.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityTotals {
    field: CategoryField,
    totals: HashMap<String, u64>,
    /// Category values in source order (the extraction job sorts by slots).
    order: Vec<String>,
}

impl OpportunityTotals {
    pub fn new(field: CategoryField) -> Self {
        Self {
            field,
            totals: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Builds totals from `(category, slots)` pairs; later duplicates add up.
    pub fn from_pairs<I, S>(field: CategoryField, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut totals = Self::new(field);
        for (category, slots) in pairs {
            totals.insert(category, slots);
        }
        totals
    }

    pub fn insert(&mut self, category: impl Into<String>, slots: u64) {
        let category = category.into();
        match self.totals.get_mut(&category) {
            Some(existing) => *existing += slots,
            None => {
                self.order.push(category.clone());
                self.totals.insert(category, slots);
            }
        }
    }

    pub fn field(&self) -> CategoryField {
        self.field
    }

    pub fn get(&self, category: &str) -> Option<u64> {
        self.totals.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Category values in source order.
    pub fn ranking(&self) -> &[String] {
        &self.order
    }
}

/// How to treat category values that have no opportunity total.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MissingTotalPolicy {
    /// Remove the row from the output
    #[default]
    Drop,
    /// Keep the row with no relative percentage
    Null,
    /// Fail the aggregation
    Fail,
}

/// One row of a per-category ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMetricRow {
    /// Raw category value as found in the events.
    pub category: String,
    /// Normalized value for display.
    pub display_name: String,
    pub absolute_count: usize,
    /// `round(count / total * 100, 5)`; `None` when the total is missing.
    pub relative_percentage: Option<f64>,
    /// 1-based position after sorting.
    pub rank: usize,
}

/// A ranking restricted to one trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRanking {
    pub window_days: u32,
    pub cutoff_slot: i64,
    pub rows: Vec<RankedMetricRow>,
}

/// Count of events per UTC day and category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub category: String,
    pub count: usize,
    /// Share of the category's opportunity total, not of the day.
    pub relative_percentage: Option<f64>,
}

/// Count of events at one position within the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPositionBucket {
    pub slot_in_epoch: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub count: usize,
}

/// Whether absent slot positions are materialized as zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    /// Always emit all 32 positions per series.
    Dense,
    /// Emit observed combinations only.
    Sparse,
}

/// Events per UTC day with a trailing moving average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
    pub moving_average: f64,
}

/// Which event table a report section is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Missed,
    Reorg,
}

impl EventKind {
    pub fn noun(&self) -> &'static str {
        match self {
            EventKind::Missed => "Missed Slots",
            EventKind::Reorg => "Reorgs",
        }
    }

    /// Identifier fragment for chart ids and anchors.
    pub fn slug(&self) -> &'static str {
        match self {
            EventKind::Missed => "missed",
            EventKind::Reorg => "reorgs",
        }
    }
}

/// Everything a dashboard generation run reads, loaded once and shared
/// immutably by every aggregation and rendering call.
#[derive(Debug, Clone)]
pub struct DashboardContext {
    pub missed: EventTable,
    pub reorgs: EventTable,
    pub totals: HashMap<CategoryField, OpportunityTotals>,
    pub loaded_at: DateTime<Utc>,
}

impl DashboardContext {
    pub fn events(&self, kind: EventKind) -> &EventTable {
        match kind {
            EventKind::Missed => &self.missed,
            EventKind::Reorg => &self.reorgs,
        }
    }

    pub fn totals(&self, field: CategoryField) -> Option<&OpportunityTotals> {
        self.totals.get(&field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_arithmetic() {
        assert_eq!(slot_in_epoch(96), 0);
        assert_eq!(slot_in_epoch(127), 31);
        assert_eq!(slot_timestamp(96), 1_606_825_175);
        assert_eq!(epoch_of(96), 3);
        assert_eq!(
            slot_datetime(0).format("%Y-%m-%d %H:%M:%S").to_string(),
            "2020-12-01 12:00:23"
        );
    }

    #[test]
    fn test_parse_slot() {
        assert_eq!(parse_slot("7205"), Ok(7205));
        assert_eq!(parse_slot(" 42 "), Ok(42));
        assert_eq!(parse_slot("123.0"), Ok(123));
        assert_eq!(
            parse_slot("[8123456](https://beaconcha.in/slot/8123456)"),
            Ok(8_123_456)
        );
        assert_eq!(parse_slot(&slot_markdown_link(96)), Ok(96));
    }

    #[test]
    fn test_parse_slot_malformed() {
        for raw in ["", "abc", "[12", "[x](https://beaconcha.in/slot/x)", "-5"] {
            assert_eq!(
                parse_slot(raw),
                Err(AggregationError::MalformedSlot(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_parse_slot_out_of_range() {
        assert_eq!(parse_slot(&MAX_SLOT.to_string()), Ok(MAX_SLOT));
        for raw in ["1000000000000000000", "18446744073709551615"] {
            assert_eq!(
                parse_slot(raw),
                Err(AggregationError::MalformedSlot(raw.to_string()))
            );
        }
        let next = (MAX_SLOT + 1).to_string();
        assert!(parse_slot(&next).is_err());
    }

    #[test]
    fn test_slot_time_of_far_slots_does_not_overflow() {
        assert_eq!(slot_timestamp(u64::MAX), slot_timestamp(MAX_SLOT));
        assert_eq!(slot_datetime(MAX_SLOT).format("%Y").to_string(), "9999");

        let event = Event::new(1_000_000_000_000_000_000);
        assert_eq!(event.date(), slot_datetime(MAX_SLOT).date_naive());
    }

    #[test]
    fn test_round_percent() {
        assert_eq!(round_percent(100.0 / 3.0), 33.33333);
        assert_eq!(round_percent(20.0), 20.0);
    }

    #[test]
    fn test_category_field_from_str() {
        assert_eq!("cl_client".parse::<CategoryField>(), Ok(CategoryField::ClClient));
        assert_eq!("Relay".parse::<CategoryField>(), Ok(CategoryField::Relay));
        assert_eq!("validator-id".parse::<CategoryField>(), Ok(CategoryField::ValidatorId));
        assert_eq!(
            "proposer".parse::<CategoryField>(),
            Err(AggregationError::UnknownField("proposer".to_string()))
        );
    }

    #[test]
    fn test_event_table_dedups_slots() {
        let mut first = Event::new(10).with_category(CategoryField::ClClient, "Lighthouse");
        first.depth = Some(2);
        let mut dup = Event::new(10).with_category(CategoryField::ClClient, "Prysm");
        dup.depth = Some(1);

        let table = EventTable::from_events(vec![first, Event::new(11), dup]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.as_slice()[0].cl_client.as_deref(), Some("Lighthouse"));
        assert_eq!(table.as_slice()[0].depth, Some(1));
        assert_eq!(table.max_slot(), Some(11));
    }

    #[test]
    fn test_opportunity_totals_order() {
        let totals = OpportunityTotals::from_pairs(
            CategoryField::Relay,
            vec![("ultrasound", 50), ("flashbots", 30), ("ultrasound", 5)],
        );
        assert_eq!(totals.get("ultrasound"), Some(55));
        assert_eq!(totals.ranking(), ["ultrasound", "flashbots"]);
        assert_eq!(totals.get("agnostic"), None);
    }
}
