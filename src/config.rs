//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.reorgdash.toml` files.

use crate::models::{CategoryField, MissingTotalPolicy, MISSED_SENTINEL, UNKNOWN_SENTINEL};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".reorgdash.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Input data settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Time window settings.
    #[serde(default)]
    pub windows: WindowsConfig,

    /// Ranking settings.
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Chart settings.
    #[serde(default)]
    pub chart: ChartConfig,

    /// Dashboard server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "reorg_dashboard.html".to_string()
}

/// Input file locations. File names are relative to `dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the extracted CSV files.
    #[serde(default = "default_data_dir")]
    pub dir: String,

    /// Missed-slot events.
    #[serde(default = "default_missed_file")]
    pub missed_file: String,

    /// Reorg events.
    #[serde(default = "default_reorg_file")]
    pub reorg_file: String,

    /// Opportunity totals per validator entity.
    #[serde(default = "default_validator_totals")]
    pub validator_totals: String,

    /// Opportunity totals per relay.
    #[serde(default = "default_relay_totals")]
    pub relay_totals: String,

    /// Opportunity totals per builder.
    #[serde(default = "default_builder_totals")]
    pub builder_totals: String,

    /// Opportunity totals per consensus-layer client.
    #[serde(default = "default_client_totals")]
    pub client_totals: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            missed_file: default_missed_file(),
            reorg_file: default_reorg_file(),
            validator_totals: default_validator_totals(),
            relay_totals: default_relay_totals(),
            builder_totals: default_builder_totals(),
            client_totals: default_client_totals(),
        }
    }
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_missed_file() -> String {
    "reorg-data.csv".to_string()
}

fn default_reorg_file() -> String {
    "reorgers-data.csv".to_string()
}

fn default_validator_totals() -> String {
    "validator_slots.csv".to_string()
}

fn default_relay_totals() -> String {
    "relay_slots.csv".to_string()
}

fn default_builder_totals() -> String {
    "builder_slots.csv".to_string()
}

fn default_client_totals() -> String {
    "clclient_slots.csv".to_string()
}

/// Trailing windows, in days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    /// Windows offered by the ranking charts' toggles.
    #[serde(default = "default_ranking_days")]
    pub ranking_days: Vec<u32>,

    /// Windows of the trend charts (in addition to the full lookback).
    #[serde(default = "default_trend_days")]
    pub trend_days: Vec<u32>,

    /// Horizon covered by the extracted data.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            ranking_days: default_ranking_days(),
            trend_days: default_trend_days(),
            lookback_days: default_lookback_days(),
        }
    }
}

fn default_ranking_days() -> Vec<u32> {
    vec![7, 14, 30, 60, 90]
}

fn default_trend_days() -> Vec<u32> {
    vec![90, 30, 7]
}

fn default_lookback_days() -> u32 {
    365
}

/// Per-category ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Rows kept per ranking.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Per-dimension overrides of `top_n`, keyed by column name.
    #[serde(default = "default_top_n_overrides")]
    pub top_n_overrides: BTreeMap<String, usize>,

    /// Category values left out of every ranking.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Treatment of categories without an opportunity total.
    #[serde(default)]
    pub missing_totals: MissingTotalPolicy,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            top_n_overrides: default_top_n_overrides(),
            exclude: default_exclude(),
            missing_totals: MissingTotalPolicy::default(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

fn default_top_n_overrides() -> BTreeMap<String, usize> {
    [("cl_client".to_string(), 7), ("validator".to_string(), 12)]
        .into_iter()
        .collect()
}

fn default_exclude() -> Vec<String> {
    vec![MISSED_SENTINEL.to_string(), UNKNOWN_SENTINEL.to_string()]
}

impl RankingConfig {
    /// Effective top-N for a dimension.
    pub fn top_n_for(&self, field: CategoryField) -> usize {
        self.top_n_overrides
            .iter()
            .find(|(key, _)| key.parse::<CategoryField>().ok() == Some(field))
            .map(|(_, &n)| n)
            .unwrap_or(self.top_n)
    }
}

/// Chart rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Viewport width the charts are laid out for, in pixels.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    /// Rows in the recent events table.
    #[serde(default = "default_recent_rows")]
    pub recent_rows: usize,

    /// Epochs shown in the epoch chart.
    #[serde(default = "default_epoch_count")]
    pub epoch_count: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            recent_rows: default_recent_rows(),
            epoch_count: default_epoch_count(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1400
}

fn default_recent_rows() -> usize {
    100
}

fn default_epoch_count() -> usize {
    100
}

/// Dashboard server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings; only
    /// explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref dir) = args.data_dir {
            self.data.dir = dir.display().to_string();
        }
        if let Some(ref windows) = args.windows {
            self.windows.ranking_days = windows.clone();
        }
        if let Some(top_n) = args.top_n {
            self.ranking.top_n = top_n;
            self.ranking.top_n_overrides.clear();
        }
        if let Some(policy) = args.missing_totals {
            self.ranking.missing_totals = policy;
        }
        if let Some(width) = args.viewport_width {
            self.chart.viewport_width = width;
        }
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values a config file could have set out of range.
    pub fn validate(&self) -> Result<()> {
        if self.windows.ranking_days.is_empty() {
            anyhow::bail!("At least one ranking window is required");
        }
        let all_days = self
            .windows
            .ranking_days
            .iter()
            .chain(&self.windows.trend_days)
            .chain(std::iter::once(&self.windows.lookback_days));
        for &days in all_days {
            if days == 0 {
                anyhow::bail!("Window lengths must be at least 1 day");
            }
        }
        if self.ranking.top_n == 0 || self.ranking.top_n_overrides.values().any(|&n| n == 0) {
            anyhow::bail!("Ranking top_n must be at least 1");
        }
        for key in self.ranking.top_n_overrides.keys() {
            key.parse::<CategoryField>()
                .with_context(|| format!("Invalid key '{}' in [ranking.top_n_overrides]", key))?;
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.missed_file, "reorg-data.csv");
        assert_eq!(config.windows.ranking_days, vec![7, 14, 30, 60, 90]);
        assert_eq!(config.ranking.missing_totals, MissingTotalPolicy::Drop);
        assert!(config.ranking.exclude.contains(&"missed".to_string()));
        assert_eq!(config.server.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom.html"
verbose = true

[data]
dir = "/srv/reorgs"

[windows]
ranking_days = [1, 7]

[ranking]
top_n = 5
missing_totals = "null"

[ranking.top_n_overrides]
relay = 8
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom.html");
        assert!(config.general.verbose);
        assert_eq!(config.data.dir, "/srv/reorgs");
        assert_eq!(config.data.relay_totals, "relay_slots.csv");
        assert_eq!(config.windows.ranking_days, vec![1, 7]);
        assert_eq!(config.windows.trend_days, vec![90, 30, 7]);
        assert_eq!(config.ranking.missing_totals, MissingTotalPolicy::Null);
        assert_eq!(config.ranking.top_n_for(CategoryField::Relay), 8);
        assert_eq!(config.ranking.top_n_for(CategoryField::Builder), 5);
    }

    #[test]
    fn test_top_n_defaults() {
        let ranking = RankingConfig::default();
        assert_eq!(ranking.top_n_for(CategoryField::ClClient), 7);
        assert_eq!(ranking.top_n_for(CategoryField::Validator), 12);
        assert_eq!(ranking.top_n_for(CategoryField::Relay), 10);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.windows.trend_days = vec![30, 0];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ranking.top_n_overrides.insert("proposer".to_string(), 3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[data]"));
        assert!(toml_str.contains("[windows]"));
        assert!(toml_str.contains("[ranking]"));
    }
}
