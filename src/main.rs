//! reorgdash - Ethereum reorg and missed-slot dashboard
//!
//! A CLI tool that loads extracted slot data, ranks consensus clients,
//! staking entities, relays and builders over trailing windows, and
//! renders the result as a Plotly dashboard (or JSON / Markdown).
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, I/O, aggregation precondition)

mod analysis;
mod cli;
mod config;
mod error;
mod loader;
mod models;
mod report;
mod server;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use loader::{DataLoader, LoadConfig};
use models::{CategoryField, DashboardContext, EventKind};
use report::charts::{section_charts, ChartSpec, ChartStyle};
use report::{DashboardReport, ReportSettings};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first: it can turn on verbose logging
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(args.log_level(config.general.verbose));

    info!("reorgdash v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    source.log();

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Dashboard generation failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .reorgdash.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize data files, windows, rankings, and more.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete dashboard workflow. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate()?;

    // Step 1: Load the extracted data
    let data_loader = DataLoader::new(LoadConfig::from(&config.data));
    println!("📥 Loading data from: {}", data_loader.data_dir().display());
    let context = data_loader.load()?;

    // Handle --dry-run: report what was loaded and exit
    if args.dry_run {
        return handle_dry_run(&context);
    }

    // Step 2: Aggregate
    println!(
        "\n🔬 Aggregating {} missed slots and {} reorgs...",
        context.missed.len(),
        context.reorgs.len()
    );
    let settings = ReportSettings::from(&config);
    let dashboard = report::build_report(&context, &settings)?;

    // Step 3: Build charts (only the HTML page embeds them)
    let needs_charts = args.serve || args.format == OutputFormat::Html;
    let charts = if needs_charts {
        println!("\n📈 Building charts...");
        let style = ChartStyle::new(config.chart.viewport_width);
        build_charts(&dashboard, &style, args.quiet)?
    } else {
        Vec::new()
    };

    // Step 4: Serve, or render and save
    if args.serve {
        let payload = server::DashboardPayload {
            html: report::generator::generate_html_dashboard(&dashboard, &charts)?,
            json: report::generator::generate_json_report(&dashboard)?,
        };
        server::serve(&config.server.host, config.server.port, payload).await?;
        return Ok(0);
    }

    println!("\n📝 Generating {:?} report...", args.format);
    let output = match args.format {
        OutputFormat::Html => report::generator::generate_html_dashboard(&dashboard, &charts)?,
        OutputFormat::Json => report::generator::generate_json_report(&dashboard)?,
        OutputFormat::Markdown => report::generator::generate_markdown_report(&dashboard),
    };

    let output_path = resolve_output_path(&args, &config);
    report::generator::write_report(&output, &output_path)?;

    // Print summary
    println!("\n📊 Dashboard Summary:");
    for kind in [EventKind::Missed, EventKind::Reorg] {
        let Some(section) = dashboard.section(kind) else {
            println!("   {}: no data", kind.noun());
            continue;
        };
        let stats = &section.summary;
        println!(
            "   {}: {} total | {} last 7 days | {} last 30 days",
            kind.noun(),
            stats.total,
            stats.last_7_days,
            stats.last_30_days
        );
    }
    if !charts.is_empty() {
        println!("   Charts: {}", charts.len());
    }
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!(
        "\n✅ Dashboard complete! Saved to: {}",
        output_path.display()
    );

    Ok(0)
}

/// Build every chart, one progress tick per section.
fn build_charts(dashboard: &DashboardReport, style: &ChartStyle, quiet: bool) -> Result<Vec<ChartSpec>> {
    let progress_bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(dashboard.sections.len() as u64)
    };
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let mut charts = Vec::new();
    for section in &dashboard.sections {
        progress_bar.set_message(section.kind.noun());
        let section_specs = section_charts(section, style);
        debug!("Built {} {} charts", section_specs.len(), section.kind.slug());
        charts.extend(section_specs);
        progress_bar.inc(1);
    }
    progress_bar.finish_and_clear();

    Ok(charts)
}

/// Explicit --output wins; otherwise the configured path with the format's extension.
fn resolve_output_path(args: &Args, config: &Config) -> PathBuf {
    match args.output {
        Some(ref output) => output.clone(),
        None => PathBuf::from(&config.general.output).with_extension(args.format.extension()),
    }
}

/// Handle --dry-run: print what was loaded, exit.
fn handle_dry_run(context: &DashboardContext) -> Result<i32> {
    println!("\n🔍 Dry run: data loaded, nothing rendered.\n");

    for kind in [EventKind::Missed, EventKind::Reorg] {
        let table = context.events(kind);
        match (table.iter().map(|e| e.slot).min(), table.max_slot()) {
            (Some(first), Some(last)) => println!(
                "   📄 {}: {} rows, {} flagged missed (slots {}..={})",
                kind.noun(),
                table.len(),
                table.iter().filter(|e| e.is_missed()).count(),
                first,
                last
            ),
            _ => println!("   📄 {}: empty", kind.noun()),
        }
    }

    for field in CategoryField::RANKED {
        match context.totals(field) {
            Some(totals) => println!("   📄 {} totals: {} entries", field.label(), totals.len()),
            None => println!("   📄 {} totals: missing", field.label()),
        }
    }

    println!("\n✅ Dry run complete. No output was written.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(CONFIG_FILE_NAME)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::Fallback(e))),
    }
}

/// Where the configuration came from. Logged once the subscriber is up.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    Fallback(anyhow::Error),
}

impl ConfigSource {
    fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
            ConfigSource::Defaults => debug!("No config file found, using defaults"),
            ConfigSource::Fallback(e) => warn!("Failed to load config, using defaults: {:#}", e),
        }
    }
}
