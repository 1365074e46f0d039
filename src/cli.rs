//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::MissingTotalPolicy;
use clap::Parser;
use std::path::PathBuf;

/// Viewports narrower than this cannot lay out the charts.
const MIN_VIEWPORT_WIDTH: u32 = 320;

/// reorgdash - Ethereum reorg and missed-slot dashboard
///
/// Aggregates extracted slot data into per-client, per-entity, per-relay
/// and per-builder rankings and renders them as a Plotly dashboard.
///
/// Examples:
///   reorgdash --data-dir ./data
///   reorgdash --data-dir ./data --format json -o dashboard.json
///   reorgdash --windows 1,7,30 --top-n 5 --missing-totals null
///   reorgdash --serve --port 8080
///   reorgdash --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory holding the extracted CSV files
    ///
    /// Can also be set via REORGDASH_DATA_DIR env var or .reorgdash.toml config.
    #[arg(short, long, value_name = "DIR", env = "REORGDASH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output file path for the dashboard
    ///
    /// Defaults to reorg_dashboard.<ext> for the selected format.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (html, json, markdown)
    #[arg(long, default_value = "html", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Trailing windows in days for the ranking charts (comma-separated)
    ///
    /// Example: --windows 7,14,30
    #[arg(long, value_name = "DAYS", value_delimiter = ',')]
    pub windows: Option<Vec<u32>>,

    /// Rows kept per ranking (overrides per-dimension settings)
    #[arg(long, value_name = "COUNT")]
    pub top_n: Option<usize>,

    /// Viewport width the charts are laid out for, in pixels
    #[arg(long, value_name = "PIXELS")]
    pub viewport_width: Option<u32>,

    /// Treatment of categories without an opportunity total
    #[arg(long, value_name = "POLICY")]
    pub missing_totals: Option<MissingTotalPolicy>,

    /// Serve the dashboard over HTTP instead of writing a file
    #[arg(long)]
    pub serve: bool,

    /// Address to bind when serving
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on when serving
    #[arg(long, value_name = "PORT", env = "PORT")]
    pub port: Option<u16>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .reorgdash.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load the input files and print their sizes
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .reorgdash.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Self-contained HTML page (default)
    #[default]
    Html,
    /// JSON with every aggregated series
    Json,
    /// Markdown ranking tables
    Markdown,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "md",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.serve && self.output.is_some() {
            return Err("Cannot use --output with --serve".to_string());
        }

        if let Some(ref windows) = self.windows {
            if windows.is_empty() {
                return Err("At least one window is required".to_string());
            }
            if windows.contains(&0) {
                return Err("Windows must be at least 1 day".to_string());
            }
        }

        if self.top_n == Some(0) {
            return Err("Top N must be at least 1".to_string());
        }

        if let Some(width) = self.viewport_width {
            if width < MIN_VIEWPORT_WIDTH {
                return Err(format!(
                    "Viewport width must be at least {} pixels",
                    MIN_VIEWPORT_WIDTH
                ));
            }
        }

        if self.port == Some(0) {
            return Err("Port must be between 1 and 65535".to_string());
        }

        // Validate data directory if provided
        if let Some(ref dir) = self.data_dir {
            if !dir.is_dir() {
                return Err(format!("Data directory does not exist: {}", dir.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `--quiet` wins over `verbose = true` from the config file.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            data_dir: None,
            output: None,
            format: OutputFormat::Html,
            windows: None,
            top_n: None,
            viewport_width: None,
            missing_totals: None,
            serve: false,
            host: None,
            port: None,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "reorgdash",
            "--windows",
            "1,7,30",
            "--format",
            "markdown",
            "--missing-totals",
            "null",
            "--top-n",
            "5",
        ])
        .unwrap();

        assert_eq!(args.windows, Some(vec![1, 7, 30]));
        assert_eq!(args.format, OutputFormat::Markdown);
        assert_eq!(args.missing_totals, Some(MissingTotalPolicy::Null));
        assert_eq!(args.top_n, Some(5));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_window() {
        let mut args = make_args();
        args.windows = Some(vec![7, 0]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.serve = true;
        args.output = Some(PathBuf::from("out.html"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut args = make_args();
        args.top_n = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.viewport_width = Some(100);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.data_dir = Some(PathBuf::from("/definitely/not/here"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(false), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_log_level_from_config() {
        let mut args = make_args();
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }

    #[test]
    fn test_output_extension() {
        assert_eq!(OutputFormat::Html.extension(), "html");
        assert_eq!(OutputFormat::Markdown.extension(), "md");
    }
}
