//! Report assembly.
//!
//! [`build_report`] runs every aggregation once against the loaded
//! [`DashboardContext`]; the chart builder and the generators only read the
//! resulting [`DashboardReport`].

pub mod charts;
pub mod generator;

use crate::analysis::{
    bucket_by_day_and_category, bucket_by_slot_position, compute_window_cutoff, daily_counts,
    depth_distribution, epoch_counts, filter_window, hour_weekday_heatmap, recent_events,
    summarize, window_rankings, DepthCount, EpochCount, Heatmap, RecentEvent, SummaryStats,
};
use crate::config::Config;
use crate::models::{
    CategoryField, DailyCount, DashboardContext, DayBucket, EventKind, MissingTotalPolicy,
    PositionMode, SlotPositionBucket, WindowRanking,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Aggregation parameters, resolved from the merged configuration.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub ranking_days: Vec<u32>,
    pub trend_days: Vec<u32>,
    pub lookback_days: u32,
    pub top_n: HashMap<CategoryField, usize>,
    pub default_top_n: usize,
    pub exclude: HashSet<String>,
    pub policy: MissingTotalPolicy,
    pub recent_rows: usize,
    pub epoch_count: usize,
}

impl ReportSettings {
    pub fn top_n_for(&self, field: CategoryField) -> usize {
        self.top_n.get(&field).copied().unwrap_or(self.default_top_n)
    }
}

impl From<&Config> for ReportSettings {
    fn from(config: &Config) -> Self {
        Self {
            ranking_days: config.windows.ranking_days.clone(),
            trend_days: config.windows.trend_days.clone(),
            lookback_days: config.windows.lookback_days,
            top_n: CategoryField::RANKED
                .into_iter()
                .map(|field| (field, config.ranking.top_n_for(field)))
                .collect(),
            default_top_n: config.ranking.top_n,
            exclude: config.ranking.exclude.iter().cloned().collect(),
            policy: config.ranking.missing_totals,
            recent_rows: config.chart.recent_rows,
            epoch_count: config.chart.epoch_count,
        }
    }
}

/// Per-window rankings of one category dimension.
#[derive(Debug, Clone, Serialize)]
pub struct DimensionRanking {
    pub field: CategoryField,
    pub windows: Vec<WindowRanking>,
}

/// Daily counts restricted to one trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSeries {
    pub window_days: u32,
    pub daily: Vec<DailyCount>,
}

/// Everything aggregated from one event table.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub kind: EventKind,
    pub summary: SummaryStats,
    pub rankings: Vec<DimensionRanking>,
    pub trends: Vec<TrendSeries>,
    pub slot_positions: Vec<SlotPositionBucket>,
    pub client_slot_positions: Vec<SlotPositionBucket>,
    pub daily_by_client: Vec<DayBucket>,
    pub depth_distribution: Vec<DepthCount>,
    pub epochs: Vec<EpochCount>,
    pub heatmap: Heatmap,
    pub recent: Vec<RecentEvent>,
}

impl SectionReport {
    /// Whether the table carried reorg depths.
    pub fn has_depth(&self) -> bool {
        !self.depth_distribution.is_empty()
    }
}

/// The aggregated dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub generated_at: DateTime<Utc>,
    pub data_loaded_at: DateTime<Utc>,
    pub lookback_days: u32,
    pub ranking_days: Vec<u32>,
    pub missing_totals: MissingTotalPolicy,
    pub sections: Vec<SectionReport>,
}

impl DashboardReport {
    pub fn section(&self, kind: EventKind) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// Aggregate every section of the dashboard.
///
/// Empty event tables produce no section. Aggregation errors (for example
/// a missing total under `MissingTotalPolicy::Fail`) abort the build.
pub fn build_report(context: &DashboardContext, settings: &ReportSettings) -> Result<DashboardReport> {
    let mut sections = Vec::new();

    for kind in [EventKind::Missed, EventKind::Reorg] {
        if context.events(kind).is_empty() {
            warn!("No {} loaded, section skipped", kind.noun().to_lowercase());
            continue;
        }
        let section = build_section(context, kind, settings)
            .with_context(|| format!("Failed to aggregate {}", kind.noun().to_lowercase()))?;
        sections.push(section);
    }

    info!("Aggregated {} dashboard sections", sections.len());

    Ok(DashboardReport {
        generated_at: Utc::now(),
        data_loaded_at: context.loaded_at,
        lookback_days: settings.lookback_days,
        ranking_days: settings.ranking_days.clone(),
        missing_totals: settings.policy,
        sections,
    })
}

fn build_section(
    context: &DashboardContext,
    kind: EventKind,
    settings: &ReportSettings,
) -> Result<SectionReport> {
    let table = context.events(kind);
    let events = table.as_slice();

    let mut rankings = Vec::new();
    for field in CategoryField::RANKED {
        let Some(totals) = context.totals(field).filter(|t| !t.is_empty()) else {
            warn!("No {} totals, {} ranking skipped", field, kind.slug());
            continue;
        };
        let windows = window_rankings(
            events,
            field,
            totals,
            &settings.exclude,
            &settings.ranking_days,
            Some(settings.top_n_for(field)),
            settings.policy,
        )
        .with_context(|| format!("Failed to rank by {}", field))?;
        debug!("Ranked {} by {} over {} windows", kind.slug(), field, windows.len());
        rankings.push(DimensionRanking { field, windows });
    }

    // trend windows never reach past the lookback period
    let lookback = filter_window(events, compute_window_cutoff(events, settings.lookback_days)?);
    let mut trends = Vec::new();
    for &days in std::iter::once(&settings.lookback_days).chain(&settings.trend_days) {
        let view = lookback.refine(compute_window_cutoff(events, days)?);
        debug!("{} trend over {} days starts after slot {}", kind.slug(), days, view.cutoff_slot());
        trends.push(TrendSeries {
            window_days: days,
            daily: daily_counts(view),
        });
    }

    let client_totals = context
        .totals(CategoryField::ClClient)
        .filter(|t| !t.is_empty());
    let daily_by_client = bucket_by_day_and_category(
        events,
        CategoryField::ClClient,
        client_totals,
        &settings.exclude,
        client_totals.map(|t| t.ranking()),
        settings.policy,
    )
    .context("Failed to bucket by day and client")?;

    Ok(SectionReport {
        kind,
        summary: summarize(table, settings.lookback_days),
        rankings,
        trends,
        slot_positions: bucket_by_slot_position(
            events,
            &settings.exclude,
            None,
            PositionMode::Dense,
        ),
        client_slot_positions: bucket_by_slot_position(
            events,
            &settings.exclude,
            Some(CategoryField::ClClient),
            PositionMode::Sparse,
        ),
        daily_by_client,
        depth_distribution: depth_distribution(events),
        epochs: epoch_counts(events, settings.epoch_count),
        heatmap: hour_weekday_heatmap(events),
        recent: recent_events(table, settings.recent_rows),
    })
}
