//! Dashboard artifact generation.
//!
//! Renders an aggregated [`DashboardReport`] as a self-contained HTML page,
//! a JSON document, or a Markdown summary.

use crate::analysis::RecentEvent;
use crate::models::{slot_markdown_link, CategoryField};
use crate::report::charts::ChartSpec;
use crate::report::{DashboardReport, DimensionRanking, SectionReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const FONT_CSS: &str =
    "https://fonts.googleapis.com/css2?family=Ubuntu+Mono:wght@400;700&display=swap";

const DASHBOARD_CSS: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body {
    font-family: 'Ubuntu Mono', monospace;
    background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
    min-height: 100vh;
}
.container { max-width: 1600px; margin: 0 auto; padding: 30px; }
.header, .section-title, .chart-container, .table-container, .stat-card {
    background: rgba(255, 255, 255, 0.98);
    border-radius: 20px;
    box-shadow: 0 20px 60px rgba(0, 0, 0, 0.15);
}
.header { text-align: center; padding: 50px 30px; margin-bottom: 40px; }
h1 {
    font-size: 3.5em;
    margin-bottom: 15px;
    background: linear-gradient(135deg, #6366f1 0%, #8b5cf6 100%);
    -webkit-background-clip: text;
    -webkit-text-fill-color: transparent;
}
.subtitle { color: #64748b; font-size: 1.1em; letter-spacing: 1px; }
.section-title { padding: 20px 30px; margin: 40px 0 25px; color: #1e293b; font-size: 1.8em; }
.stats-grid {
    display: grid;
    grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
    gap: 25px;
    margin-bottom: 40px;
}
.stat-card { padding: 30px; text-align: center; }
.stat-value { font-size: 2.5em; font-weight: 700; color: #6366f1; }
.stat-label { color: #64748b; margin-top: 10px; text-transform: uppercase; font-size: 0.85em; }
.chart-container { padding: 20px; margin-bottom: 30px; }
.table-container { padding: 30px; margin-bottom: 30px; overflow-x: auto; }
.table-title { font-size: 1.5em; color: #1e293b; margin-bottom: 20px; }
table { width: 100%; border-collapse: collapse; }
th { background: #6366f1; color: white; padding: 12px; text-align: left; }
td { padding: 10px 12px; border-bottom: 1px solid #e2e8f0; }
tr:hover td { background: #f8fafc; }
a { color: #6366f1; text-decoration: none; }
a:hover { text-decoration: underline; }
.depth-normal { color: #10b981; font-weight: 700; }
.depth-warning { color: #f59e0b; font-weight: 700; }
.depth-danger { color: #ef4444; font-weight: 700; }
.empty { text-align: center; color: #64748b; padding: 40px; }
.footer { text-align: center; color: rgba(255, 255, 255, 0.9); padding: 30px; }
@media (max-width: 768px) {
    .container { padding: 12px; }
    h1 { font-size: 2em; }
    .stat-value { font-size: 1.8em; }
}
"#;

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Serialize a value for embedding inside a `<script>` element.
fn script_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value).context("Failed to serialize chart")?;
    Ok(json.replace("</", "<\\/"))
}

/// Generate the complete HTML dashboard page.
pub fn generate_html_dashboard(report: &DashboardReport, charts: &[ChartSpec]) -> Result<String> {
    let mut body = String::new();

    body.push_str(&generate_html_header(report));

    if report.sections.is_empty() {
        body.push_str("<div class=\"table-container empty\">No events were loaded.</div>\n");
    }

    for section in &report.sections {
        body.push_str(&generate_html_section(section, charts));
    }

    body.push_str(&generate_html_footer(report));
    body.push_str(&generate_chart_scripts(charts)?);

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Reorg.pics</title>
    <script src="{plotly}"></script>
    <link href="{font}" rel="stylesheet">
    <style>{css}</style>
</head>
<body>
<div class="container">
{body}</div>
</body>
</html>
"#,
        plotly = PLOTLY_CDN,
        font = FONT_CSS,
        css = DASHBOARD_CSS,
        body = body,
    ))
}

fn generate_html_header(report: &DashboardReport) -> String {
    format!(
        "<div class=\"header\">\n<h1>Reorg.pics</h1>\n<div class=\"subtitle\">Ethereum missed slots and reorgs over the {} &middot; updated {}</div>\n</div>\n",
        escape_html(&crate::analysis::period_label(report.lookback_days)),
        report.data_loaded_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

fn stat_card(value: &str, label: &str) -> String {
    format!(
        "<div class=\"stat-card\"><div class=\"stat-value\">{}</div><div class=\"stat-label\">{}</div></div>\n",
        escape_html(value),
        escape_html(label)
    )
}

fn generate_html_section(section: &SectionReport, charts: &[ChartSpec]) -> String {
    let noun = section.kind.noun();
    let stats = &section.summary;
    let mut html = String::new();

    html.push_str(&format!(
        "<h2 class=\"section-title\" id=\"{}\">{}</h2>\n",
        section.kind.slug(),
        noun
    ));

    html.push_str("<div class=\"stats-grid\">\n");
    html.push_str(&stat_card(
        &stats.total.to_string(),
        &format!("Total {} ({})", noun, stats.period_label),
    ));
    html.push_str(&stat_card(&stats.latest_day.to_string(), "Latest Day"));
    html.push_str(&stat_card(&stats.last_7_days.to_string(), "Last 7 Days"));
    html.push_str(&stat_card(&stats.last_30_days.to_string(), "Last 30 Days"));
    if let (Some(avg), Some(max)) = (stats.avg_depth, stats.max_depth) {
        html.push_str(&stat_card(
            &format!("{:.2}", avg),
            &format!("Avg Depth ({})", stats.period_label),
        ));
        html.push_str(&stat_card(
            &max.to_string(),
            &format!("Max Depth ({})", stats.period_label),
        ));
    }
    html.push_str("</div>\n");

    let prefix = format!("{}-", section.kind.slug());
    for chart in charts.iter().filter(|c| c.id.starts_with(&prefix)) {
        html.push_str(&format!(
            "<div class=\"chart-container\" id=\"{}\"></div>\n",
            escape_html(&chart.id)
        ));
    }

    html.push_str(&generate_recent_table(section, &section.recent));

    html
}

fn depth_class(depth: u32) -> &'static str {
    match depth {
        0 | 1 => "depth-normal",
        2 => "depth-warning",
        _ => "depth-danger",
    }
}

fn generate_recent_table(section: &SectionReport, recent: &[RecentEvent]) -> String {
    if recent.is_empty() {
        return String::new();
    }

    let show_depth = recent.iter().any(|e| e.depth.is_some());
    let mut table = String::new();

    table.push_str("<div class=\"table-container\">\n");
    table.push_str(&format!(
        "<div class=\"table-title\">Recent {} (Last {})</div>\n",
        section.kind.noun(),
        recent.len()
    ));
    table.push_str("<table>\n<thead><tr><th>Slot</th><th>Epoch</th>");
    if show_depth {
        table.push_str("<th>Depth</th>");
    }
    table.push_str("<th>Slot in Epoch</th><th>CL Client</th><th>Time (UTC)</th></tr></thead>\n<tbody>\n");

    for event in recent {
        table.push_str(&format!(
            "<tr><td><a href=\"{}\" target=\"_blank\">{}</a></td><td><a href=\"{}\" target=\"_blank\">{}</a></td>",
            escape_html(&event.slot_url),
            event.slot,
            escape_html(&event.epoch_url),
            event.epoch
        ));
        if show_depth {
            match event.depth {
                Some(depth) => table.push_str(&format!(
                    "<td class=\"{}\">{}</td>",
                    depth_class(depth),
                    depth
                )),
                None => table.push_str("<td>-</td>"),
            }
        }
        table.push_str(&format!(
            "<td>{}</td><td>{}</td><td>{}</td></tr>\n",
            event.slot_in_epoch,
            escape_html(event.cl_client.as_deref().unwrap_or("-")),
            event.time.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    table.push_str("</tbody>\n</table>\n</div>\n");
    table
}

fn generate_html_footer(report: &DashboardReport) -> String {
    format!(
        "<div class=\"footer\">Data source: Xatu &middot; generated {} by reorgdash v{}</div>\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        env!("CARGO_PKG_VERSION")
    )
}

fn generate_chart_scripts(charts: &[ChartSpec]) -> Result<String> {
    let mut scripts = String::new();

    scripts.push_str("<script>\nconst config = {responsive: true, displaylogo: false};\n");
    for chart in charts {
        scripts.push_str(&format!(
            "Plotly.newPlot({}, {}, {}, config);\n",
            script_json(&chart.id)?,
            script_json(&chart.data)?,
            script_json(&chart.layout)?
        ));
    }
    scripts.push_str("</script>\n");

    Ok(scripts)
}

/// Generate a Markdown summary of the dashboard.
pub fn generate_markdown_report(report: &DashboardReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Reorg Dashboard Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(report));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    for section in &report.sections {
        output.push_str(&generate_summary_section(section));
        output.push_str(&generate_rankings_section(section));
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &DashboardReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Lookback:** {} days\n",
        report.lookback_days
    ));
    let windows: Vec<String> = report.ranking_days.iter().map(|d| format!("{}d", d)).collect();
    section.push_str(&format!("- **Ranking Windows:** {}\n", windows.join(", ")));
    section.push_str(&format!(
        "- **Missing Totals:** `{:?}`\n",
        report.missing_totals
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &DashboardReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");

    for section in &report.sections {
        let noun = section.kind.noun();
        toc.push_str(&format!("- [{}](#{})\n", noun, anchor(noun)));
        for ranking in &section.rankings {
            let title = ranking_title(section, ranking.field);
            toc.push_str(&format!("  - [{}](#{})\n", title, anchor(&title)));
        }
    }

    toc.push('\n');

    toc
}

fn anchor(title: &str) -> String {
    title.replace(' ', "-").to_lowercase()
}

fn ranking_title(section: &SectionReport, field: CategoryField) -> String {
    format!("{} by {}", section.kind.noun(), field.label())
}

/// Generate the headline numbers of one section.
fn generate_summary_section(section: &SectionReport) -> String {
    let stats = &section.summary;
    let mut out = String::new();

    out.push_str(&format!("## {}\n\n", section.kind.noun()));

    out.push_str("| Total | Latest Day | Last 7 Days | Last 30 Days |");
    if stats.max_depth.is_some() {
        out.push_str(" Avg Depth | Max Depth |");
    }
    out.push('\n');
    out.push_str("|:---:|:---:|:---:|:---:|");
    if stats.max_depth.is_some() {
        out.push_str(":---:|:---:|");
    }
    out.push('\n');
    out.push_str(&format!(
        "| **{}** | {} | {} | {} |",
        stats.total, stats.latest_day, stats.last_7_days, stats.last_30_days
    ));
    if let (Some(avg), Some(max)) = (stats.avg_depth, stats.max_depth) {
        out.push_str(&format!(" {:.2} | {} |", avg, max));
    }
    out.push_str("\n\n");

    if let Some(date) = stats.latest_date {
        let latest_slot = section
            .recent
            .first()
            .map(|e| format!(" at slot {}", slot_markdown_link(e.slot)))
            .unwrap_or_default();
        out.push_str(&format!(
            "*Latest event on {}{} ({})*\n\n",
            date, latest_slot, stats.period_label
        ));
    }

    out
}

/// Generate one table per ranked dimension and window.
fn generate_rankings_section(section: &SectionReport) -> String {
    let mut out = String::new();

    if section.rankings.is_empty() {
        out.push_str("No opportunity totals were loaded, rankings skipped.\n\n");
        return out;
    }

    for ranking in &section.rankings {
        out.push_str(&generate_dimension_block(section, ranking));
    }

    out
}

fn generate_dimension_block(section: &SectionReport, ranking: &DimensionRanking) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", ranking_title(section, ranking.field)));

    for window in &ranking.windows {
        block.push_str(&format!("**Last {} days**\n\n", window.window_days));

        if window.rows.is_empty() {
            block.push_str("*No events in this window.*\n\n");
            continue;
        }

        block.push_str(&format!("| Rank | {} | Count | Share |\n", ranking.field.label()));
        block.push_str("|:---:|:---|:---:|:---:|\n");
        for row in &window.rows {
            let share = row
                .relative_percentage
                .map(|p| format!("{:.3}%", p))
                .unwrap_or_else(|| "n/a".to_string());
            block.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.rank,
                row.display_name.replace('|', "\\|"),
                row.absolute_count,
                share
            ));
        }
        block.push('\n');
    }

    block
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by reorgdash*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &DashboardReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}
