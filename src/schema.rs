//! Output contracts for the copilot: chart specifications and the final
//! `Answer` object. The orchestrator guarantees every response satisfies
//! [`Answer::validate`], including error paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_ANSWER_CHARS: usize = 20;
pub const MIN_FOLLOW_UPS: usize = 2;
pub const MAX_FOLLOW_UPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartKind {
    Bar,
    Donut,
    Line,
    HorizontalBar,
}

impl ChartKind {
    /// Donut charts are the only kind that never carries axis labels.
    #[must_use]
    pub fn requires_axis_labels(self) -> bool {
        !matches!(self, ChartKind::Donut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: String,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub data: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    pub series: Vec<ChartSeries>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub r#ref: String,
}

impl Citation {
    #[must_use]
    pub fn new(source: &str, r#ref: &str) -> Self {
        Self {
            source: source.to_string(),
            r#ref: r#ref.to_string(),
        }
    }

    /// Parse the `"Source: Ref"` shorthand used in plan citations.
    #[must_use]
    pub fn from_shorthand(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((source, r#ref)) if !r#ref.trim().is_empty() => {
                Self::new(source.trim(), r#ref.trim())
            }
            _ => Self::new(raw.trim(), raw.trim()),
        }
    }
}

/// The only object ever returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub follow_ups: Vec<String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AnswerInvalid {
    #[error("answer text shorter than {MIN_ANSWER_CHARS} characters")]
    TextTooShort,
    #[error("answer has no citations")]
    NoCitations,
    #[error("answer has {0} follow-ups, expected {MIN_FOLLOW_UPS}-{MAX_FOLLOW_UPS}")]
    FollowUpsOutOfBounds(usize),
    #[error("answer chart is invalid: {0}")]
    ChartInvalid(String),
}

impl Answer {
    /// Check the output contract: text length, citation presence,
    /// follow-up bounds, and chart structure when a chart is attached.
    pub fn validate(&self) -> Result<(), AnswerInvalid> {
        if self.text.trim().len() < MIN_ANSWER_CHARS {
            return Err(AnswerInvalid::TextTooShort);
        }
        if self.citations.is_empty() {
            return Err(AnswerInvalid::NoCitations);
        }
        if !(MIN_FOLLOW_UPS..=MAX_FOLLOW_UPS).contains(&self.follow_ups.len()) {
            return Err(AnswerInvalid::FollowUpsOutOfBounds(self.follow_ups.len()));
        }
        if let Some(chart) = &self.chart {
            let report = crate::validator::validate_chart(chart);
            if !report.valid {
                return Err(AnswerInvalid::ChartInvalid(report.errors.join("; ")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_answer() -> Answer {
        Answer {
            text: "Risk is concentrated in the higher tiers of the base.".to_string(),
            citations: vec![Citation::new("ExecutiveDashboard", "Risk distribution donut")],
            chart: None,
            follow_ups: vec![
                "Compare ROI across strategies".to_string(),
                "What are the top churn drivers?".to_string(),
            ],
        }
    }

    #[test]
    fn test_valid_answer_passes() {
        assert!(valid_answer().validate().is_ok());
    }

    #[test]
    fn test_short_text_rejected() {
        let mut answer = valid_answer();
        answer.text = "Too short".to_string();
        assert_eq!(answer.validate(), Err(AnswerInvalid::TextTooShort));
    }

    #[test]
    fn test_no_citations_rejected() {
        let mut answer = valid_answer();
        answer.citations.clear();
        assert_eq!(answer.validate(), Err(AnswerInvalid::NoCitations));
    }

    #[test]
    fn test_follow_up_bounds() {
        let mut answer = valid_answer();
        answer.follow_ups = vec!["one".to_string()];
        assert_eq!(
            answer.validate(),
            Err(AnswerInvalid::FollowUpsOutOfBounds(1))
        );

        answer.follow_ups = (0..6).map(|i| format!("q{i}")).collect();
        assert_eq!(
            answer.validate(),
            Err(AnswerInvalid::FollowUpsOutOfBounds(6))
        );
    }

    #[test]
    fn test_chart_kind_serde_kebab_case() {
        let kind: ChartKind = serde_json::from_str("\"horizontal-bar\"").unwrap();
        assert_eq!(kind, ChartKind::HorizontalBar);
        assert_eq!(serde_json::to_string(&ChartKind::Donut).unwrap(), "\"donut\"");
    }

    #[test]
    fn test_citation_shorthand() {
        let c = Citation::from_shorthand("ModelingDeepDive: Feature Importance");
        assert_eq!(c.source, "ModelingDeepDive");
        assert_eq!(c.r#ref, "Feature Importance");

        let bare = Citation::from_shorthand("Strategy Copilot");
        assert_eq!(bare.source, "Strategy Copilot");
        assert_eq!(bare.r#ref, "Strategy Copilot");
    }
}
