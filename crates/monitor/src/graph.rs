//! Text rendering of the persisted missed-blocks series.

use crate::models::HistoryPoint;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::time::SystemTime;

pub const MAX_COLUMNS: usize = 60;
pub const NO_DATA: &str = "No data available to generate graph.";

const BAR: char = '#';
const THRESHOLD: char = '-';
const LABEL_WIDTH: usize = 6;

/// Renders `points` as a `height`-row bar chart with the slashing threshold
/// (`window * threshold`) marked. Returns `None` when there is nothing to draw.
///
/// Long series are down-sampled to [`MAX_COLUMNS`] columns, each column keeping
/// the worst value of the points it covers.
#[allow(clippy::as_conversions)]
pub fn render_missed_chart(
    points: &[HistoryPoint],
    window: u64,
    threshold: f64,
    height: usize,
) -> Option<String> {
    let first = points.first()?;
    let last = points.last()?;
    let height = height.max(2);
    let columns = downsample(points);

    let limit = window as f64 * threshold;
    let peak = columns.iter().copied().max().unwrap_or(0) as f64;
    let top = peak.max(limit).max(1.0);
    let rows = height as f64;
    let threshold_row = ((limit / top) * rows).round().clamp(1.0, rows) as usize;

    let mut chart = String::new();
    let _ = writeln!(
        chart,
        "Missed blocks in window (W={window}, slashing at {limit:.0})"
    );

    for row in (1..=height).rev() {
        let level = top * row as f64 / rows;
        let half_step = top / (2.0 * rows);

        let label = if row == height {
            format!("{top:>width$.0}", width = LABEL_WIDTH)
        } else if row == threshold_row {
            format!("{limit:>width$.0}", width = LABEL_WIDTH)
        } else {
            " ".repeat(LABEL_WIDTH)
        };
        chart.push_str(&label);
        chart.push_str(" |");

        for value in &columns {
            let cell = if *value as f64 >= level - half_step {
                BAR
            } else if row == threshold_row {
                THRESHOLD
            } else {
                ' '
            };
            chart.push(cell);
        }
        chart.push('\n');
    }

    chart.push_str(&" ".repeat(LABEL_WIDTH));
    chart.push_str(" +");
    chart.push_str(&"-".repeat(columns.len()));
    chart.push('\n');
    let _ = write!(
        chart,
        "{} {} .. {} UTC",
        " ".repeat(LABEL_WIDTH),
        timestamp(first.timestamp),
        timestamp(last.timestamp)
    );

    Some(chart)
}

fn downsample(points: &[HistoryPoint]) -> Vec<u64> {
    let chunk = points.len().div_ceil(MAX_COLUMNS).max(1);
    points
        .chunks(chunk)
        .map(|bucket| {
            bucket
                .iter()
                .map(|point| point.total_missed)
                .max()
                .unwrap_or(0)
        })
        .collect()
}

fn timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn series(values: &[u64]) -> Vec<HistoryPoint> {
        values
            .iter()
            .zip(0u64..)
            .map(|(&total_missed, minute)| HistoryPoint {
                timestamp: UNIX_EPOCH + Duration::from_secs(1_714_564_800 + minute * 60),
                total_missed,
                voting_power: None,
            })
            .collect()
    }

    fn bar_rows(chart: &str) -> Vec<&str> {
        chart.lines().filter(|line| line.contains(" |")).collect()
    }

    #[test]
    fn no_points_renders_nothing() {
        assert!(render_missed_chart(&[], 100, 0.2, 10).is_none());
    }

    #[test]
    fn marks_threshold_and_peak() {
        let chart = render_missed_chart(&series(&[0, 5, 40, 10]), 100, 0.2, 8);
        assert!(chart.is_some());
        let chart = chart.unwrap_or_default();
        let rows = bar_rows(&chart);
        assert_eq!(rows.len(), 8);

        // Top row belongs to the 40-miss peak and is labelled with it.
        assert!(rows.first().is_some_and(|row| row.trim_start().starts_with("40 |")));
        assert!(rows.first().is_some_and(|row| row.ends_with("  # ")));

        // Threshold line (20 of 40) sits halfway down.
        assert!(rows.iter().any(|row| row.trim_start().starts_with("20 |") && row.contains('-')));
        assert!(chart.contains("2024-05-01 12:00 .. 2024-05-01 12:03 UTC"));
    }

    #[test]
    fn downsamples_long_series() {
        let values: Vec<u64> = (0..500).map(|v| v % 30).collect();
        let chart = render_missed_chart(&series(&values), 100, 0.2, 6);
        assert!(chart.is_some());
        let chart = chart.unwrap_or_default();
        let rows = bar_rows(&chart);
        assert_eq!(rows.len(), 6);
        for row in rows {
            let cells = row.split_once(" |").map(|(_, cells)| cells.chars().count());
            assert!(cells.is_some_and(|count| count <= MAX_COLUMNS));
        }
    }
}
