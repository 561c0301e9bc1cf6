//! SVG Chart Generator for Experiment Results
//!
//! Categorical distribution plots: one box (quartiles, 1.5 IQR whiskers) per
//! hyperparameter value with the individual runs drawn as jittered points.

use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Chart styling constants
const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 160.0;
const MARGIN_BOTTOM: f64 = 100.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Qualitative palette, cycled per category
const PALETTE: [&str; 12] = [
    "#8dd3c7", "#ffffb3", "#bebada", "#fb8072", "#80b1d3", "#fdb462", "#b3de69", "#fccde5", "#d9d9d9",
    "#bc80bd", "#ccebc5", "#ffed6f",
];

const JITTER_SEED: u64 = 0;

/// Values observed for one category on the x axis
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryData {
    pub label: String,
    pub values: Vec<f64>,
}

/// Five-number box summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStats {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
}

impl BoxStats {
    /// `None` for an empty slice. Quartiles interpolate linearly between
    /// order statistics; whiskers reach the most extreme values within
    /// 1.5 IQR of the box.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let q1 = quantile(&sorted, 0.25);
        let median = quantile(&sorted, 0.5);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let low_fence = q1 - 1.5 * iqr;
        let high_fence = q3 + 1.5 * iqr;

        let whisker_low = sorted.iter().copied().find(|&v| v >= low_fence).unwrap_or(q1);
        let whisker_high = sorted.iter().rev().copied().find(|&v| v <= high_fence).unwrap_or(q3);

        Some(Self {
            q1,
            median,
            q3,
            whisker_low,
            whisker_high,
        })
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn value_range(categories: &[CategoryData]) -> (f64, f64) {
    let (min, max) = categories
        .iter()
        .flat_map(|c| c.values.iter().copied())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.1).max(0.05);
    (min - pad, max + pad)
}

/// Generate a box + strip plot SVG
pub fn generate_box_strip_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    categories: &[CategoryData],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let (y_min, y_max) = value_range(categories);
    let to_y = |v: f64| MARGIN_TOP + plot_height - ((v - y_min) / (y_max - y_min)) * plot_height;

    let slot = plot_width / categories.len().max(1) as f64;
    let box_width = slot * 0.6;
    let mut rng = ChaCha8Rng::seed_from_u64(JITTER_SEED);

    let mut svg = String::new();

    // SVG header
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, COLOR_TEXT, escape_xml(title)
    ));

    // Horizontal reference lines
    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.3}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, COLOR_TEXT, value
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 15.0, COLOR_TEXT, escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    ));

    for (i, category) in categories.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let center = MARGIN_LEFT + slot * (i as f64 + 0.5);

        if let Some(stats) = BoxStats::from_values(&category.values) {
            // Whiskers
            for (from, to) in [(stats.whisker_low, stats.q1), (stats.q3, stats.whisker_high)] {
                svg.push_str(&format!(
                    r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1.5"/>"#,
                    center, to_y(from), center, to_y(to), COLOR_AXIS
                ));
            }
            for cap in [stats.whisker_low, stats.whisker_high] {
                svg.push_str(&format!(
                    r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1.5"/>"#,
                    center - box_width / 4.0, to_y(cap), center + box_width / 4.0, to_y(cap), COLOR_AXIS
                ));
            }
            // Box
            let top = to_y(stats.q3);
            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="{}" stroke-width="1.5"/>"#,
                center - box_width / 2.0, top, box_width, (to_y(stats.q1) - top).max(1.0), color, COLOR_AXIS
            ));
            svg.push_str(&format!(
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
                center - box_width / 2.0, to_y(stats.median), center + box_width / 2.0, to_y(stats.median), COLOR_AXIS
            ));
        }

        // Strip points
        for &value in category.values.iter().filter(|v| v.is_finite()) {
            let offset = rng.gen_range(-0.3..0.3) * box_width;
            svg.push_str(&format!(
                r#"<circle cx="{}" cy="{}" r="4" fill="{}" fill-opacity="0.7" stroke="black" stroke-width="0.5"/>"#,
                center + offset, to_y(value), color
            ));
        }

        // Rotated tick label
        let tick_y = MARGIN_TOP + plot_height + 15.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}" transform="rotate(-45 {} {})">{}</text>"#,
            center, tick_y, COLOR_TEXT, center, tick_y, escape_xml(&category.label)
        ));
    }

    // Legend
    let legend_x = CHART_WIDTH - MARGIN_RIGHT + 20.0;
    let mut legend_y = MARGIN_TOP + 10.0;
    for (i, category) in categories.iter().enumerate() {
        svg.push_str(&format!(
            r#"<circle cx="{}" cy="{}" r="6" fill="{}" stroke="black" stroke-width="0.5"/>"#,
            legend_x, legend_y, PALETTE[i % PALETTE.len()]
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            legend_x + 14.0, legend_y + 4.0, COLOR_TEXT, escape_xml(&category.label)
        ));
        legend_y += 22.0;
    }

    svg.push_str("</svg>");

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, svg)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
