//! Structural validation for assembled charts.
//!
//! All failing checks are collected rather than short-circuited so a
//! replan loop can report every problem at once. The validator never
//! mutates or repairs a chart.

use crate::schema::ChartSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check a chart for structural completeness: title, series presence,
/// axis labels (except donut), and a non-empty first series.
#[must_use]
pub fn validate_chart(chart: &ChartSpec) -> ValidationReport {
    let mut errors = Vec::new();

    if chart.title.trim().len() < 3 {
        errors.push("Chart title missing or too short".to_string());
    }

    if chart.series.is_empty() {
        errors.push("Chart has no data series".to_string());
    }

    if chart.kind.requires_axis_labels() {
        if chart.x_label.as_deref().is_none_or(str::is_empty) {
            errors.push("Chart missing X-axis label".to_string());
        }
        if chart.y_label.as_deref().is_none_or(str::is_empty) {
            errors.push("Chart missing Y-axis label".to_string());
        }
    }

    if let Some(first) = chart.series.first() {
        if first.data.is_empty() {
            errors.push("Chart series has no data points".to_string());
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ChartKind, ChartPoint, ChartSeries};

    fn bar_chart() -> ChartSpec {
        ChartSpec {
            kind: ChartKind::Bar,
            title: "ROI by Strategy".to_string(),
            x_label: Some("Strategy".to_string()),
            y_label: Some("ROI (%)".to_string()),
            series: vec![ChartSeries {
                name: "ROI".to_string(),
                data: vec![ChartPoint {
                    x: "Budget Optimization".to_string(),
                    y: 160.0,
                }],
            }],
        }
    }

    #[test]
    fn test_valid_bar_chart() {
        let report = validate_chart(&bar_chart());
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_bar_missing_y_label() {
        let mut chart = bar_chart();
        chart.y_label = None;
        let report = validate_chart(&chart);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("Y-axis label")));
    }

    #[test]
    fn test_donut_needs_no_axis_labels() {
        let mut chart = bar_chart();
        chart.kind = ChartKind::Donut;
        chart.x_label = None;
        chart.y_label = None;
        assert!(validate_chart(&chart).valid);
    }

    #[test]
    fn test_errors_are_collected_not_short_circuited() {
        let chart = ChartSpec {
            kind: ChartKind::Line,
            title: "ab".to_string(),
            x_label: None,
            y_label: Some(String::new()),
            series: vec![ChartSeries {
                name: "empty".to_string(),
                data: vec![],
            }],
        };
        let report = validate_chart(&chart);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_no_series_reported() {
        let mut chart = bar_chart();
        chart.series.clear();
        let report = validate_chart(&chart);
        assert!(report.errors.iter().any(|e| e.contains("no data series")));
    }
}
