//! Plotly figure construction.
//!
//! Every chart is built fresh by a pure function from aggregated series and
//! a [`ChartStyle`]. The resulting [`ChartSpec`] is the figure JSON handed to
//! Plotly.js in the browser.

use crate::analysis::{DepthCount, EpochCount, Heatmap, MOVING_AVERAGE_DAYS};
use crate::models::{
    CategoryField, DailyCount, DayBucket, EventKind, RankedMetricRow, SlotPositionBucket,
    WindowRanking,
};
use crate::report::SectionReport;
use serde::Serialize;
use serde_json::{json, Value};

pub const FONT_FAMILY: &str = "Ubuntu Mono";

/// Viewports narrower than this get the compact layout.
pub const NARROW_VIEWPORT: u32 = 768;

const PRIMARY: &str = "#6366f1";
const SECONDARY: &str = "#8b5cf6";
const TERTIARY: &str = "#ec4899";
const WARNING: &str = "#f59e0b";
const DANGER: &str = "#ef4444";
const SUCCESS: &str = "#10b981";
const DARK: &str = "#1e293b";

/// Series colors, cycled.
const PALETTE: [&str; 10] = [
    "#6366f1", "#8b5cf6", "#ec4899", "#14b8a6", "#f59e0b", "#3b82f6", "#ef4444", "#10b981",
    "#a78bfa", "#f472b6",
];

const HEATMAP_SCALE: [(f64, &str); 6] = [
    (0.0, "#f1f5f9"),
    (0.2, "#ddd6fe"),
    (0.4, "#c4b5fd"),
    (0.6, "#a78bfa"),
    (0.8, "#8b5cf6"),
    (1.0, "#6366f1"),
];

/// A Plotly figure: `data` traces plus `layout`.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSpec {
    /// DOM id of the chart container.
    pub id: String,
    pub data: Vec<Value>,
    pub layout: Value,
}

/// Sizing derived from the viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartStyle {
    pub viewport_width: u32,
}

impl ChartStyle {
    pub fn new(viewport_width: u32) -> Self {
        Self { viewport_width }
    }

    pub fn is_narrow(&self) -> bool {
        self.viewport_width < NARROW_VIEWPORT
    }

    pub fn title_size(&self) -> u32 {
        if self.is_narrow() {
            18
        } else {
            24
        }
    }

    pub fn axis_title_size(&self) -> u32 {
        if self.is_narrow() {
            12
        } else {
            14
        }
    }

    pub fn tick_size(&self) -> u32 {
        if self.is_narrow() {
            10
        } else {
            12
        }
    }

    pub fn text_size(&self) -> u32 {
        if self.is_narrow() {
            8
        } else {
            10
        }
    }

    /// Figure height for a chart designed at `base` pixels.
    pub fn height(&self, base: u32) -> u32 {
        if self.is_narrow() {
            base * 4 / 5
        } else {
            base
        }
    }

    fn font(&self, size: u32) -> Value {
        json!({ "size": size, "family": FONT_FAMILY })
    }
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self::new(1400)
    }
}

/// Which value of a ranked row a chart plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChartMode {
    /// Share of the category's assigned slots, in percent.
    Relative,
    /// Raw event count.
    Absolute,
}

impl ChartMode {
    pub const ALL: [ChartMode; 2] = [ChartMode::Relative, ChartMode::Absolute];

    pub fn label(&self) -> &'static str {
        match self {
            ChartMode::Relative => "Relative",
            ChartMode::Absolute => "Absolute",
        }
    }

    pub fn value(&self, row: &RankedMetricRow) -> Option<f64> {
        match self {
            ChartMode::Relative => row.relative_percentage,
            ChartMode::Absolute => Some(row.absolute_count as f64),
        }
    }

    pub fn bucket_value(&self, bucket: &DayBucket) -> Option<f64> {
        match self {
            ChartMode::Relative => bucket.relative_percentage,
            ChartMode::Absolute => Some(bucket.count as f64),
        }
    }

    pub fn axis_title(&self, kind: EventKind) -> String {
        match self {
            ChartMode::Relative => format!("{} per assigned slot (%)", kind.noun()),
            ChartMode::Absolute => format!("Number of {}", kind.noun()),
        }
    }

    pub fn format_value(&self, value: Option<f64>) -> String {
        match (self, value) {
            (_, None) => "n/a".to_string(),
            (ChartMode::Relative, Some(v)) => format!("{:.3}%", v),
            (ChartMode::Absolute, Some(v)) => format!("{:.0}", v),
        }
    }
}

fn palette(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

fn axis(style: &ChartStyle, title: &str) -> Value {
    json!({
        "title": { "text": title, "font": style.font(style.axis_title_size()) },
        "tickfont": style.font(style.tick_size()),
        "showgrid": true,
        "gridcolor": "rgba(0,0,0,0.05)",
        "zerolinecolor": "rgba(0,0,0,0.1)",
    })
}

/// Layout shared by every chart.
fn base_layout(style: &ChartStyle, title: &str, x_title: &str, y_title: &str, height: u32) -> Value {
    let mut title_font = style.font(style.title_size());
    title_font["color"] = json!(DARK);

    json!({
        "title": { "text": title, "x": 0.5, "xanchor": "center", "font": title_font },
        "xaxis": axis(style, x_title),
        "yaxis": axis(style, y_title),
        "plot_bgcolor": "rgba(0,0,0,0)",
        "paper_bgcolor": "rgba(0,0,0,0)",
        "height": style.height(height),
        "margin": { "l": 60, "r": 30, "t": 80, "b": 60 },
        "hovermode": "closest",
        "hoverlabel": {
            "bgcolor": "white",
            "font": style.font(12),
            "bordercolor": PRIMARY,
        },
        "legend": { "font": style.font(style.tick_size()) },
    })
}

/// Visibility toggles: one button per trace group, each showing only its
/// own traces.
fn visibility_menu(style: &ChartStyle, groups: &[(String, Vec<usize>, Value)], traces: usize) -> Value {
    let buttons: Vec<Value> = groups
        .iter()
        .map(|(label, members, relayout)| {
            let visible: Vec<bool> = (0..traces).map(|i| members.contains(&i)).collect();
            json!({
                "label": label,
                "method": "update",
                "args": [{ "visible": visible }, relayout],
            })
        })
        .collect();

    let (menu_type, direction) = if style.is_narrow() {
        ("dropdown", "down")
    } else {
        ("buttons", "right")
    };

    json!([{
        "type": menu_type,
        "direction": direction,
        "active": 0,
        "showactive": true,
        "x": 0.0,
        "xanchor": "left",
        "y": 1.15,
        "yanchor": "top",
        "font": style.font(style.tick_size()),
        "buttons": buttons,
    }])
}

/// Horizontal bar ranking of one dimension with window and mode toggles.
///
/// One trace per (mode, window); the first relative trace is visible.
pub fn ranking_chart(
    kind: EventKind,
    field: CategoryField,
    windows: &[WindowRanking],
    style: &ChartStyle,
) -> ChartSpec {
    let mut data = Vec::new();
    let mut groups = Vec::new();

    for mode in ChartMode::ALL {
        for ranking in windows {
            let index = data.len();
            // Plotly draws the first category at the bottom
            let rows: Vec<&RankedMetricRow> = ranking.rows.iter().rev().collect();
            data.push(json!({
                "type": "bar",
                "orientation": "h",
                "name": format!("{} days", ranking.window_days),
                "y": rows.iter().map(|r| r.display_name.as_str()).collect::<Vec<_>>(),
                "x": rows.iter().map(|r| mode.value(r)).collect::<Vec<_>>(),
                "text": rows.iter().map(|r| mode.format_value(mode.value(r))).collect::<Vec<_>>(),
                "customdata": rows.iter().map(|r| r.absolute_count).collect::<Vec<_>>(),
                "textposition": "auto",
                "textfont": style.font(style.text_size()),
                "hovertemplate": "%{y}<br>%{text} (%{customdata} events)<extra></extra>",
                "marker": { "color": palette(index % windows.len().max(1)) },
                "visible": index == 0,
            }));
            groups.push((
                format!("{}d {}", ranking.window_days, mode.label()),
                vec![index],
                json!({ "xaxis.title.text": mode.axis_title(kind) }),
            ));
        }
    }

    let top_rows = windows.iter().map(|w| w.rows.len()).max().unwrap_or(0) as u32;
    let mut layout = base_layout(
        style,
        &format!("{} by {}", kind.noun(), field.label()),
        &ChartMode::Relative.axis_title(kind),
        "",
        (top_rows * 32 + 200).max(450),
    );
    layout["showlegend"] = json!(false);
    // room for category labels
    let label_margin = if style.is_narrow() { 90 } else { 140 };
    layout["margin"]["l"] = json!(label_margin);
    layout["margin"]["t"] = json!(120);
    layout["updatemenus"] = visibility_menu(style, &groups, data.len());

    ChartSpec {
        id: format!("{}-{}-ranking", kind.slug(), field.column()),
        data,
        layout,
    }
}

/// Daily counts with a 7-day moving average once more than a week of
/// days is present.
pub fn trend_chart(kind: EventKind, window_days: u32, daily: &[DailyCount], style: &ChartStyle) -> ChartSpec {
    let dates: Vec<String> = daily.iter().map(|d| d.date.to_string()).collect();

    let mut data = vec![json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": format!("Daily {}", kind.noun()),
        "x": &dates,
        "y": daily.iter().map(|d| d.count).collect::<Vec<_>>(),
        "line": { "color": PRIMARY, "width": 3, "shape": "spline" },
        "marker": { "size": 8, "color": PRIMARY, "line": { "color": "white", "width": 2 } },
        "fill": "tozeroy",
        "fillcolor": "rgba(99, 102, 241, 0.1)",
        "hovertemplate": "%{x}<br>%{y} events<extra></extra>",
    })];

    if daily.len() > MOVING_AVERAGE_DAYS {
        data.push(json!({
            "type": "scatter",
            "mode": "lines",
            "name": format!("{}-day average", MOVING_AVERAGE_DAYS),
            "x": &dates,
            "y": daily.iter().map(|d| d.moving_average).collect::<Vec<_>>(),
            "line": { "color": SECONDARY, "width": 2, "dash": "dash" },
            "hovertemplate": "%{x}<br>%{y:.2f} avg<extra></extra>",
        }));
    }

    let mut layout = base_layout(
        style,
        &format!("{} Over Time (last {} days)", kind.noun(), window_days),
        "Date",
        &format!("Number of {}", kind.noun()),
        500,
    );
    layout["hovermode"] = json!("x unified");
    layout["legend"]["orientation"] = json!("h");
    layout["legend"]["y"] = json!(1.02);
    layout["legend"]["x"] = json!(1);
    layout["legend"]["xanchor"] = json!("right");

    ChartSpec {
        id: format!("{}-trend-{}", kind.slug(), window_days),
        data,
        layout,
    }
}

/// Bars over all 32 slot positions, shaded by intensity.
pub fn slot_position_chart(kind: EventKind, buckets: &[SlotPositionBucket], style: &ChartStyle) -> ChartSpec {
    let max = buckets.iter().map(|b| b.count).max().unwrap_or(0);
    let colors: Vec<String> = buckets
        .iter()
        .map(|b| {
            let intensity = if max > 0 { b.count as f64 / max as f64 } else { 0.0 };
            format!("rgba(99, 102, 241, {:.2})", 0.3 + intensity * 0.7)
        })
        .collect();

    let data = vec![json!({
        "type": "bar",
        "x": buckets.iter().map(|b| b.slot_in_epoch).collect::<Vec<_>>(),
        "y": buckets.iter().map(|b| b.count).collect::<Vec<_>>(),
        "text": buckets.iter().map(|b| b.count).collect::<Vec<_>>(),
        "textposition": "outside",
        "textfont": style.font(style.text_size()),
        "marker": { "color": colors, "line": { "color": "rgba(99, 102, 241, 1)", "width": 1 } },
        "hovertemplate": "Slot %{x}<br>%{y} events<extra></extra>",
    })];

    let mut layout = base_layout(
        style,
        &format!("{} by Slot Position in Epoch", kind.noun()),
        "Slot in Epoch",
        &format!("Number of {}", kind.noun()),
        500,
    );
    layout["xaxis"]["dtick"] = json!(1);
    layout["showlegend"] = json!(false);

    ChartSpec {
        id: format!("{}-slot-position", kind.slug()),
        data,
        layout,
    }
}

/// Groups sparse buckets into one series per category, first-seen order.
fn series_by_category<'a, T>(
    items: &'a [T],
    category: impl Fn(&'a T) -> Option<&'a str>,
) -> Vec<(&'a str, Vec<&'a T>)> {
    let mut series: Vec<(&'a str, Vec<&'a T>)> = Vec::new();
    for item in items {
        let Some(name) = category(item) else {
            continue;
        };
        match series.iter_mut().find(|(n, _)| *n == name) {
            Some((_, members)) => members.push(item),
            None => series.push((name, vec![item])),
        }
    }
    series
}

/// Grouped bars of slot position, one series per category value.
pub fn category_slot_position_chart(
    kind: EventKind,
    field: CategoryField,
    buckets: &[SlotPositionBucket],
    style: &ChartStyle,
) -> ChartSpec {
    let data: Vec<Value> = series_by_category(buckets, |b| b.category.as_deref())
        .into_iter()
        .enumerate()
        .map(|(i, (name, members))| {
            json!({
                "type": "bar",
                "name": name,
                "x": members.iter().map(|b| b.slot_in_epoch).collect::<Vec<_>>(),
                "y": members.iter().map(|b| b.count).collect::<Vec<_>>(),
                "marker": { "color": palette(i) },
                "hovertemplate": format!("{}<br>Slot %{{x}}: %{{y}}<extra></extra>", name),
            })
        })
        .collect();

    let mut layout = base_layout(
        style,
        &format!("{} by Slot Position and {}", kind.noun(), field.label()),
        "Slot in Epoch",
        &format!("Number of {}", kind.noun()),
        500,
    );
    layout["barmode"] = json!("group");
    layout["xaxis"]["dtick"] = json!(1);

    ChartSpec {
        id: format!("{}-{}-slot-position", kind.slug(), field.column()),
        data,
        layout,
    }
}

/// Hour of day by weekday heatmap.
pub fn heatmap_chart(kind: EventKind, heatmap: &Heatmap, style: &ChartStyle) -> ChartSpec {
    let scale: Vec<Value> = HEATMAP_SCALE.iter().map(|(at, color)| json!([at, color])).collect();

    let data = vec![json!({
        "type": "heatmap",
        "z": heatmap.counts,
        "x": heatmap.days,
        "y": heatmap.hours,
        "colorscale": scale,
        "texttemplate": "%{z}",
        "textfont": style.font(style.tick_size()),
        "hovertemplate": "%{x} %{y}:00 UTC<br>%{z} events<extra></extra>",
        "colorbar": {
            "title": { "text": kind.noun(), "font": style.font(style.tick_size()) },
            "tickfont": style.font(style.text_size()),
        },
    })];

    let mut layout = base_layout(
        style,
        &format!("{} Activity Heatmap", kind.noun()),
        "Day of Week",
        "Hour of Day (UTC)",
        600,
    );
    layout["yaxis"]["dtick"] = json!(1);
    layout["yaxis"]["showgrid"] = json!(false);
    layout["xaxis"]["showgrid"] = json!(false);

    ChartSpec {
        id: format!("{}-heatmap", kind.slug()),
        data,
        layout,
    }
}

/// Reorg counts per depth; depth 1 green, 2 amber, deeper red.
pub fn depth_chart(kind: EventKind, distribution: &[DepthCount], style: &ChartStyle) -> ChartSpec {
    let colors: Vec<&str> = distribution
        .iter()
        .map(|d| match d.depth {
            0 | 1 => SUCCESS,
            2 => WARNING,
            _ => DANGER,
        })
        .collect();

    let data = vec![json!({
        "type": "bar",
        "x": distribution.iter().map(|d| format!("Depth {}", d.depth)).collect::<Vec<_>>(),
        "y": distribution.iter().map(|d| d.count).collect::<Vec<_>>(),
        "text": distribution.iter().map(|d| d.count).collect::<Vec<_>>(),
        "textposition": "outside",
        "textfont": style.font(style.axis_title_size()),
        "marker": { "color": colors },
        "hovertemplate": "%{x}<br>%{y} events<extra></extra>",
    })];

    let mut layout = base_layout(
        style,
        &format!("{} Depth Distribution", kind.noun()),
        "Depth",
        &format!("Number of {}", kind.noun()),
        400,
    );
    layout["showlegend"] = json!(false);

    ChartSpec {
        id: format!("{}-depth", kind.slug()),
        data,
        layout,
    }
}

/// Events per epoch over the most recent epochs.
pub fn epoch_chart(kind: EventKind, epochs: &[EpochCount], style: &ChartStyle) -> ChartSpec {
    let data = vec![json!({
        "type": "scatter",
        "mode": "lines+markers",
        "x": epochs.iter().map(|e| e.epoch).collect::<Vec<_>>(),
        "y": epochs.iter().map(|e| e.count).collect::<Vec<_>>(),
        "line": { "color": TERTIARY, "width": 2 },
        "marker": { "size": 6, "color": TERTIARY },
        "hovertemplate": "Epoch %{x}<br>%{y} events<extra></extra>",
    })];

    let mut layout = base_layout(
        style,
        &format!("{} by Epoch (last {} epochs)", kind.noun(), epochs.len()),
        "Epoch",
        &format!("Number of {}", kind.noun()),
        400,
    );
    layout["showlegend"] = json!(false);
    layout["hoverlabel"]["bordercolor"] = json!(TERTIARY);

    ChartSpec {
        id: format!("{}-epochs", kind.slug()),
        data,
        layout,
    }
}

/// Stacked daily bars per category value, with a relative/absolute toggle
/// when percentages are available.
pub fn daily_category_chart(
    kind: EventKind,
    field: CategoryField,
    buckets: &[DayBucket],
    style: &ChartStyle,
) -> ChartSpec {
    let modes: &[ChartMode] = if buckets.iter().any(|b| b.relative_percentage.is_some()) {
        &ChartMode::ALL
    } else {
        &[ChartMode::Absolute]
    };
    let series = series_by_category(buckets, |b| Some(b.category.as_str()));

    let mut data = Vec::new();
    let mut groups = Vec::new();
    for (m, mode) in modes.iter().enumerate() {
        let mut members = Vec::new();
        for (i, (name, rows)) in series.iter().enumerate() {
            members.push(data.len());
            data.push(json!({
                "type": "bar",
                "name": name,
                "x": rows.iter().map(|b| b.date.to_string()).collect::<Vec<_>>(),
                "y": rows.iter().map(|b| mode.bucket_value(b)).collect::<Vec<_>>(),
                "marker": { "color": palette(i) },
                "legendgroup": name,
                "showlegend": true,
                "visible": m == 0,
            }));
        }
        groups.push((
            mode.label().to_string(),
            members,
            json!({ "yaxis.title.text": mode.axis_title(kind) }),
        ));
    }

    let mut layout = base_layout(
        style,
        &format!("Daily {} by {}", kind.noun(), field.label()),
        "Date",
        &modes[0].axis_title(kind),
        500,
    );
    layout["barmode"] = json!("stack");
    if modes.len() > 1 {
        layout["margin"]["t"] = json!(120);
        layout["updatemenus"] = visibility_menu(style, &groups, data.len());
    }

    ChartSpec {
        id: format!("{}-{}-daily", kind.slug(), field.column()),
        data,
        layout,
    }
}

/// All charts of one dashboard section, in page order.
pub fn section_charts(section: &SectionReport, style: &ChartStyle) -> Vec<ChartSpec> {
    let kind = section.kind;
    let mut charts = Vec::new();

    charts.extend(
        section
            .trends
            .iter()
            .map(|trend| trend_chart(kind, trend.window_days, &trend.daily, style)),
    );
    charts.push(slot_position_chart(kind, &section.slot_positions, style));
    if !section.client_slot_positions.is_empty() {
        charts.push(category_slot_position_chart(
            kind,
            CategoryField::ClClient,
            &section.client_slot_positions,
            style,
        ));
    }
    charts.push(heatmap_chart(kind, &section.heatmap, style));
    if section.has_depth() {
        charts.push(depth_chart(kind, &section.depth_distribution, style));
    }
    charts.push(epoch_chart(kind, &section.epochs, style));
    charts.extend(
        section
            .rankings
            .iter()
            .map(|ranking| ranking_chart(kind, ranking.field, &ranking.windows, style)),
    );
    if !section.daily_by_client.is_empty() {
        charts.push(daily_category_chart(
            kind,
            CategoryField::ClClient,
            &section.daily_by_client,
            style,
        ));
    }

    charts
}
