//! CSV loader for the extracted event and totals files.
//!
//! Reads the well-known files from a data directory and assembles the
//! immutable [`DashboardContext`] that every aggregation and rendering call
//! receives.

use crate::models::{
    parse_slot, CategoryField, DashboardContext, Event, EventKind, EventTable, OpportunityTotals,
    MISSED_SENTINEL,
};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cell literals read as nulls (pandas writes these for missing values).
const NULL_LITERALS: [&str; 5] = ["nan", "none", "null", "na", "<na>"];

/// Where to find the input files.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub data_dir: PathBuf,
    pub missed_file: String,
    pub reorg_file: String,
    /// Totals file per ranked dimension.
    pub totals_files: Vec<(CategoryField, String)>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::from(&crate::config::DataConfig::default())
    }
}

impl From<&crate::config::DataConfig> for LoadConfig {
    fn from(config: &crate::config::DataConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.dir),
            missed_file: config.missed_file.clone(),
            reorg_file: config.reorg_file.clone(),
            totals_files: vec![
                (CategoryField::Validator, config.validator_totals.clone()),
                (CategoryField::Relay, config.relay_totals.clone()),
                (CategoryField::Builder, config.builder_totals.clone()),
                (CategoryField::ClClient, config.client_totals.clone()),
            ],
        }
    }
}

/// Raw event row. Columns other than these (date, epoch, ...) are ignored.
#[derive(Debug, Deserialize)]
struct EventRecord {
    slot: String,
    #[serde(default)]
    cl_client: Option<String>,
    #[serde(default)]
    validator_id: Option<String>,
    #[serde(default)]
    validator: Option<String>,
    #[serde(default)]
    relay: Option<String>,
    #[serde(default)]
    builder: Option<String>,
    #[serde(default)]
    depth: Option<String>,
    #[serde(default)]
    is_missed: Option<String>,
}

impl EventRecord {
    fn into_event(self) -> Result<Event> {
        let slot = parse_slot(&self.slot)?;
        let validator_id = clean_cell(self.validator_id);

        let missed = match clean_cell(self.is_missed) {
            Some(flag) => parse_flag(&flag)?,
            None => validator_id.as_deref() == Some(MISSED_SENTINEL),
        };

        let depth = match clean_cell(self.depth) {
            Some(raw) => Some(
                parse_count(&raw)
                    .and_then(|d| u32::try_from(d).ok())
                    .with_context(|| format!("Invalid depth '{}' at slot {}", raw, slot))?,
            ),
            None => None,
        };

        Ok(Event {
            slot,
            cl_client: clean_cell(self.cl_client),
            validator_id,
            validator: clean_cell(self.validator),
            relay: clean_cell(self.relay),
            builder: clean_cell(self.builder),
            missed,
            depth,
        })
    }
}

/// Trims a cell and maps empty or null literals to `None`.
fn clean_cell(cell: Option<String>) -> Option<String> {
    let cell = cell?;
    let trimmed = cell.trim();
    if trimmed.is_empty() || NULL_LITERALS.contains(&trimmed.to_lowercase().as_str()) {
        None
    } else if trimmed.len() == cell.len() {
        Some(cell)
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a non-negative integer, tolerating a float rendering like `"12.0"`.
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.strip_suffix(".0").unwrap_or(raw).parse().ok()
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("Invalid is_missed value '{}'", other),
    }
}

/// Reads event rows from CSV with a header line.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<Event>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut events = Vec::new();

    for (index, record) in csv_reader.deserialize::<EventRecord>().enumerate() {
        // header is line 1
        let line = index + 2;
        let record = record.with_context(|| format!("Failed to parse row on line {}", line))?;
        let event = record
            .into_event()
            .with_context(|| format!("Invalid row on line {}", line))?;
        events.push(event);
    }

    Ok(events)
}

/// Reads `(category, slots)` totals for one dimension.
///
/// The category column is looked up by the dimension's column name; rows
/// with a null category are skipped.
pub fn read_totals<R: Read>(reader: R, field: CategoryField) -> Result<OpportunityTotals> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader
        .headers()
        .context("Failed to read totals header")?
        .clone();

    let position = |name: &str| headers.iter().position(|h| h.trim() == name);
    let category_idx = position(field.column())
        .with_context(|| format!("Totals file has no '{}' column", field.column()))?;
    let slots_idx = position("slots").context("Totals file has no 'slots' column")?;

    let mut pairs = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let line = index + 2;
        let record = record.with_context(|| format!("Failed to parse row on line {}", line))?;

        let Some(category) = clean_cell(record.get(category_idx).map(String::from)) else {
            debug!("Skipping totals row on line {} with no {}", line, field);
            continue;
        };
        let raw_slots = record.get(slots_idx).unwrap_or_default();
        let slots = parse_count(raw_slots)
            .with_context(|| format!("Invalid slots '{}' on line {}", raw_slots, line))?;

        pairs.push((category, slots));
    }

    Ok(OpportunityTotals::from_pairs(field, pairs))
}

/// Loads the dashboard inputs from a data directory.
pub struct DataLoader {
    config: LoadConfig,
}

impl DataLoader {
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Load every input file into an immutable context.
    ///
    /// The missed-slot file is required; missing reorg or totals files
    /// yield empty tables with a warning.
    pub fn load(&self) -> Result<DashboardContext> {
        let dir = &self.config.data_dir;
        if !dir.is_dir() {
            anyhow::bail!("Data directory not found: {}", dir.display());
        }

        let missed = self.load_events(EventKind::Missed)?;
        let reorgs = self.load_events(EventKind::Reorg)?;

        let mut totals = HashMap::new();
        for (field, file_name) in &self.config.totals_files {
            let path = dir.join(file_name);
            if !path.exists() {
                warn!("Totals file not found, {} rankings skipped: {}", field, path.display());
                continue;
            }
            let file = File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let field_totals = read_totals(file, *field)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            debug!("Loaded {} {} totals", field_totals.len(), field_totals.field());
            totals.insert(*field, field_totals);
        }

        info!(
            "Loaded {} missed slots, {} reorgs, {} totals tables",
            missed.len(),
            reorgs.len(),
            totals.len()
        );

        Ok(DashboardContext {
            missed,
            reorgs,
            totals,
            loaded_at: Utc::now(),
        })
    }

    /// Load one event table, deduplicated by slot.
    pub fn load_events(&self, kind: EventKind) -> Result<EventTable> {
        let file_name = match kind {
            EventKind::Missed => &self.config.missed_file,
            EventKind::Reorg => &self.config.reorg_file,
        };
        let path = self.config.data_dir.join(file_name);

        if !path.exists() {
            if kind == EventKind::Missed {
                anyhow::bail!("Missed-slot file not found: {}", path.display());
            }
            warn!("{} file not found, using an empty table: {}", kind.noun(), path.display());
            return Ok(EventTable::default());
        }

        let file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let events =
            read_events(file).with_context(|| format!("Failed to load {}", path.display()))?;

        let rows = events.len();
        let table = EventTable::from_events(events);
        if table.len() < rows {
            debug!(
                "Collapsed {} duplicate slots in {}",
                rows - table.len(),
                path.display()
            );
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregationError;
    use tempfile::TempDir;

    const MISSED_CSV: &str = "\
slot,cl_client,validator_id,validator,relay,builder
[7205](https://beaconcha.in/slot/7205),Lighthouse,missed,Lido,,
7204,Prysm,1234,Coinbase,ultrasound,0xabcdef0123456789
7100,NaN,None,,flashbots,
";

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    fn loader_for(dir: &TempDir) -> DataLoader {
        DataLoader::new(LoadConfig {
            data_dir: dir.path().to_path_buf(),
            ..LoadConfig::default()
        })
    }

    #[test]
    fn test_read_events_cleans_cells() {
        let events = read_events(MISSED_CSV.as_bytes()).unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].slot, 7205);
        assert!(events[0].is_missed());
        assert_eq!(events[0].relay, None);
        assert_eq!(events[1].validator_id.as_deref(), Some("1234"));
        assert!(!events[1].is_missed());
        assert_eq!(events[2].cl_client, None);
        assert_eq!(events[2].validator_id, None);
        assert_eq!(events[2].relay.as_deref(), Some("flashbots"));
    }

    #[test]
    fn test_read_events_depth_and_flag() {
        let csv = "slot,cl_client,depth,is_missed\n10,Teku,2.0,False\n11,Teku,,true\n";
        let events = read_events(csv.as_bytes()).unwrap();

        assert_eq!(events[0].depth, Some(2));
        assert!(!events[0].missed);
        assert_eq!(events[1].depth, None);
        assert!(events[1].missed);
    }

    #[test]
    fn test_read_events_malformed_slot() {
        let csv = "slot,cl_client\nabc,Teku\n";
        let err = read_events(csv.as_bytes()).unwrap_err();

        assert!(err.to_string().contains("line 2"));
        assert_eq!(
            err.downcast_ref::<AggregationError>(),
            Some(&AggregationError::MalformedSlot("abc".to_string()))
        );
    }

    #[test]
    fn test_read_events_rejects_slot_past_calendar() {
        let csv = "slot,cl_client\n1000000000000000000,Teku\n";
        let err = read_events(csv.as_bytes()).unwrap_err();

        assert!(err.to_string().contains("line 2"));
        assert_eq!(
            err.downcast_ref::<AggregationError>(),
            Some(&AggregationError::MalformedSlot(
                "1000000000000000000".to_string()
            ))
        );
    }

    #[test]
    fn test_read_totals() {
        let csv = "relay,slots\nultrasound,500\nflashbots,300.0\n,12\n";
        let totals = read_totals(csv.as_bytes(), CategoryField::Relay).unwrap();

        assert_eq!(totals.len(), 2);
        assert_eq!(totals.get("flashbots"), Some(300));
        assert_eq!(totals.ranking(), ["ultrasound", "flashbots"]);
    }

    #[test]
    fn test_read_totals_wrong_column() {
        let csv = "builder,slots\nbeaver,10\n";
        assert!(read_totals(csv.as_bytes(), CategoryField::Relay).is_err());
    }

    #[test]
    fn test_load_context() {
        let dir = TempDir::new().unwrap();
        write(&dir, "reorg-data.csv", MISSED_CSV);
        write(
            &dir,
            "reorgers-data.csv",
            "slot,cl_client,depth\n500,Teku,2\n500,Teku,1\n",
        );
        write(&dir, "clclient_slots.csv", "cl_client,slots\nLighthouse,100\nPrysm,80\n");

        let context = loader_for(&dir).load().unwrap();

        assert_eq!(context.missed.len(), 3);
        assert_eq!(context.reorgs.len(), 1);
        assert_eq!(context.reorgs.as_slice()[0].depth, Some(1));
        assert!(context.totals(CategoryField::ClClient).is_some());
        assert!(context.totals(CategoryField::Relay).is_none());
    }

    #[test]
    fn test_load_requires_missed_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "reorgers-data.csv", "slot\n1\n");

        let err = loader_for(&dir).load().unwrap_err();
        assert!(err.to_string().contains("Missed-slot file not found"));
    }

    #[test]
    fn test_load_missing_reorg_file_is_empty() {
        let dir = TempDir::new().unwrap();
        write(&dir, "reorg-data.csv", MISSED_CSV);

        let table = loader_for(&dir).load_events(EventKind::Reorg).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_clean_cell() {
        assert_eq!(clean_cell(Some("  Lido ".to_string())).as_deref(), Some("Lido"));
        assert_eq!(clean_cell(Some("NaN".to_string())), None);
        assert_eq!(clean_cell(Some("".to_string())), None);
        assert_eq!(clean_cell(None), None);
    }
}
