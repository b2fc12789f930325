//! LLM-backed query planning.
//!
//! The planner constrains the model to a fixed set of intents and
//! dataset operations, then strictly decodes the JSON it returns. The
//! failure branches are distinct and independently testable: provider
//! error, response that is not JSON at all, well-formed JSON that fails
//! the plan schema, and timeout.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::data::AppData;
use crate::llm::{ChatOutcome, ChatRequest, CompletionProvider, LlmError};
use crate::schema::ChartKind;

pub const DEFAULT_PLANNER_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Arpu,
    Cltv,
    Irr,
    RoiCompare,
    RiskDist,
    Risk,
    Drivers,
    SegmentDeepdive,
    FinancialKpis,
    Generic,
}

impl Intent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Arpu => "arpu",
            Intent::Cltv => "cltv",
            Intent::Irr => "irr",
            Intent::RoiCompare => "roi_compare",
            Intent::RiskDist => "risk_dist",
            Intent::Risk => "risk",
            Intent::Drivers => "drivers",
            Intent::SegmentDeepdive => "segment_deepdive",
            Intent::FinancialKpis => "financial_kpis",
            Intent::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    #[serde(rename = "topN")]
    TopN,
    #[serde(rename = "aggregate")]
    Aggregate,
    #[serde(rename = "compute")]
    Compute,
    #[serde(rename = "slice")]
    Slice,
    #[serde(rename = "compare")]
    Compare,
    #[serde(rename = "filter")]
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub dir: SortDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeKind {
    #[serde(rename = "arpuImpact")]
    ArpuImpact,
    #[serde(rename = "cltv")]
    Cltv,
    #[serde(rename = "irr")]
    Irr,
    #[serde(rename = "roi")]
    Roi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compute {
    pub kind: ComputeKind,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub op: OpKind,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default, rename = "where")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub compute: Option<Compute>,
}

/// Chart intent within a plan. `x_field`/`y_field` declare which output
/// columns bind to the axes; the executor falls back to a shape heuristic
/// only when they are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChart {
    pub kind: ChartKind,
    pub title: String,
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
    #[serde(default)]
    pub x_field: Option<String>,
    #[serde(default)]
    pub y_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub intent: Intent,
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
    pub operations: Vec<Operation>,
    pub chart: PlanChart,
    pub narrative_focus: Vec<String>,
    pub citations: Vec<String>,
}

impl Plan {
    /// Schema constraints that type decoding alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.operations.is_empty() {
            return Err("plan has no operations".to_string());
        }
        if self.chart.title.trim().len() < 3 {
            return Err("chart title shorter than 3 characters".to_string());
        }
        if self.citations.is_empty() {
            return Err("plan has no citations".to_string());
        }
        if self.narrative_focus.is_empty() {
            return Err("plan has no narrative focus".to_string());
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("planner response is not JSON: {0}")]
    NotJson(String),

    #[error("planner response failed schema validation: {0}")]
    SchemaInvalid(String),

    #[error("planner timed out after {0} ms")]
    Timeout(u64),
}

/// Decode a raw planner response into a validated [`Plan`].
///
/// Distinguishes "not JSON at all" from "JSON that fails the schema".
pub fn parse_plan(content: &str) -> Result<Plan, PlannerError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| PlannerError::NotJson(e.to_string()))?;

    let plan: Plan =
        serde_json::from_value(value).map_err(|e| PlannerError::SchemaInvalid(e.to_string()))?;

    plan.validate().map_err(PlannerError::SchemaInvalid)?;
    Ok(plan)
}

const PLANNER_SYSTEM_PROMPT: &str = "\
You are a telco churn analyst creating execution plans.
Return ONLY valid JSON matching the Plan schema.
Pick intent from: arpu, cltv, irr, roi_compare, risk_dist, drivers, segment_deepdive, financial_kpis, generic.
If the question asks about ARPU impact or churn reduction effect on ARPU, use: { \"op\":\"compute\", \"compute\":{ \"kind\":\"arpuImpact\", \"params\":{ \"churnDeltaPct\": 2 } } }
If it asks risk distribution or segments, use: { \"op\":\"slice\", \"from\":\"risk_distribution\" } with a donut chart.
If it asks about churn drivers or features, use: { \"op\":\"topN\", \"from\":\"feature_importance\", \"orderBy\":{\"field\":\"importance\",\"dir\":\"desc\"}, \"limit\":10 }
If it asks ROI comparison, use: { \"op\":\"aggregate\", \"from\":\"roi_by_strategy\" }
Always include chart.title (descriptive, 5+ words) and chart.xLabel, chart.yLabel (except donut).
Declare chart.xField and chart.yField naming the output columns bound to each axis.
Include citations like 'ExecutiveDashboard: Risk Tier Analysis' or 'ScenarioPlanner: ARPU Model'.
narrativeFocus should list 2-3 key points to emphasize in the response text.";

pub struct Planner {
    provider: Arc<dyn CompletionProvider>,
    timeout_ms: u64,
}

impl Planner {
    #[must_use]
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout_ms: u64) -> Self {
        Self {
            provider,
            timeout_ms,
        }
    }

    /// Ask the provider for a plan. The context summary carries row
    /// counts, never full data.
    pub async fn plan(&self, question: &str, data: &AppData) -> Result<Plan, PlannerError> {
        let context_summary = serde_json::json!({
            "risk_levels": data.risk_distribution.len(),
            "features": data.feature_importance.len(),
            "strategies": data.roi_by_strategy.len(),
            "segments": data.segments.len(),
            "financials": {
                "arpu": data.financials.arpu,
                "churn": data.financials.churn,
            },
        });

        let request = ChatRequest {
            system: PLANNER_SYSTEM_PROMPT.to_string(),
            user: format!("Question: \"{question}\"\n\nContext summary: {context_summary}"),
            tools: Vec::new(),
            json_mode: true,
        };

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(self.timeout_ms),
            self.provider.chat(request),
        )
        .await
        .map_err(|_| PlannerError::Timeout(self.timeout_ms))??;

        let content = match outcome {
            ChatOutcome::Text(content) => content,
            ChatOutcome::ToolCall { name, .. } => {
                return Err(PlannerError::NotJson(format!(
                    "expected a JSON plan, got tool call {name}"
                )));
            }
        };

        debug!(chars = content.len(), "planner response received");
        parse_plan(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const VALID_PLAN: &str = r#"{
        "intent": "drivers",
        "metrics": ["feature_importance"],
        "operations": [{
            "op": "topN",
            "from": "feature_importance",
            "select": ["name", "importance"],
            "orderBy": { "field": "importance", "dir": "desc" },
            "limit": 10
        }],
        "chart": {
            "kind": "horizontal-bar",
            "title": "Top 10 Churn Drivers by ML Importance",
            "xLabel": "Importance (%)",
            "yLabel": "Driver",
            "xField": "name",
            "yField": "importance"
        },
        "narrativeFocus": ["top driver name and value", "relative ranking"],
        "citations": ["ModelingDeepDive: Feature Importance Analysis"]
    }"#;

    #[test]
    fn test_parse_valid_plan() {
        let plan = parse_plan(VALID_PLAN).unwrap();
        assert_eq!(plan.intent, Intent::Drivers);
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].op, OpKind::TopN);
        assert_eq!(plan.operations[0].limit, Some(10));
        assert_eq!(plan.chart.kind, ChartKind::HorizontalBar);
        assert_eq!(plan.chart.x_field.as_deref(), Some("name"));
    }

    #[test]
    fn test_parse_not_json() {
        let err = parse_plan("I think you should chart the drivers").unwrap_err();
        assert!(matches!(err, PlannerError::NotJson(_)));
    }

    #[test]
    fn test_parse_json_but_wrong_schema() {
        let err = parse_plan(r#"{"intent": "world_domination", "operations": []}"#).unwrap_err();
        assert!(matches!(err, PlannerError::SchemaInvalid(_)));
    }

    #[test]
    fn test_parse_valid_json_failing_invariants() {
        let raw = r#"{
            "intent": "generic",
            "operations": [{ "op": "slice", "from": "segments" }],
            "chart": { "kind": "bar", "title": "ab" },
            "narrativeFocus": ["x"],
            "citations": ["Source: Ref"]
        }"#;
        let err = parse_plan(raw).unwrap_err();
        assert!(matches!(err, PlannerError::SchemaInvalid(_)));
    }

    #[test]
    fn test_parse_requires_operations() {
        let raw = r#"{
            "intent": "generic",
            "operations": [],
            "chart": { "kind": "bar", "title": "A valid title" },
            "narrativeFocus": ["x"],
            "citations": ["Source: Ref"]
        }"#;
        let err = parse_plan(raw).unwrap_err();
        assert!(matches!(err, PlannerError::SchemaInvalid(_)));
    }

    struct SlowProvider;

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome, LlmError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(ChatOutcome::Text(String::new()))
        }
    }

    struct CannedProvider(&'static str);

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, LlmError> {
            assert!(request.json_mode);
            assert!(request.tools.is_empty());
            Ok(ChatOutcome::Text(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_planner_timeout_is_distinct() {
        let planner = Planner::new(Arc::new(SlowProvider), 50);
        let err = planner
            .plan("anything", &AppData::reference())
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_planner_happy_path() {
        let planner = Planner::new(Arc::new(CannedProvider(VALID_PLAN)), 5000);
        let plan = planner
            .plan("what drives churn", &AppData::reference())
            .await
            .unwrap();
        assert_eq!(plan.intent, Intent::Drivers);
    }
}
