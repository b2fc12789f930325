//! Deterministic data tools exposed to the completion provider and the
//! deterministic fallback path.
//!
//! Tools are pure functions over the injected application dataset. They
//! never fail for normal "no data" conditions — they return an
//! explanatory text field instead — and `rag_search` converts retriever
//! errors into text rather than propagating them.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::data::AppData;
use crate::executor::{Row, money, pct};
use crate::llm::ToolSpec;
use crate::retriever::{RetrievalOptions, Retriever};
use crate::schema::{ChartKind, ChartPoint, ChartSeries, ChartSpec, Citation};

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct FeatureImportanceParams {
    /// Number of top drivers to return (default: 10)
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ArpuImpactParams {
    /// Percentage churn reduction, e.g. 2 for a 2% reduction
    churn_delta_pct: f64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RagSearchParams {
    /// Natural-language question for the knowledge base
    query: String,
    /// Max passages to retrieve
    top_k: Option<usize>,
}

// ── Tool output ──────────────────────────────────────────────────────

/// What a tool hands back: a tabular result, an optional chart spec,
/// optional narrative text, and optional citations.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub table: Option<Vec<Row>>,
    pub chart: Option<ChartSpec>,
    pub text: Option<String>,
    pub citations: Option<Vec<Citation>>,
}

impl ToolOutput {
    fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

pub struct ToolRegistry {
    data: Arc<AppData>,
    retriever: Arc<Retriever>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(data: Arc<AppData>, retriever: Arc<Retriever>) -> Self {
        Self { data, retriever }
    }

    /// Tool schemas advertised to the completion provider.
    #[must_use]
    pub fn specs() -> Vec<ToolSpec> {
        fn params<T: JsonSchema>() -> Value {
            serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}))
        }

        vec![
            ToolSpec {
                name: "get_risk_distribution".to_string(),
                description: "Return customer counts by risk segment (Low, Medium, High, Very High)"
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "get_feature_importance".to_string(),
                description: "Return top churn drivers from the ML model".to_string(),
                parameters: params::<FeatureImportanceParams>(),
            },
            ToolSpec {
                name: "get_roi_by_strategy".to_string(),
                description: "Return ROI, savings, investment, and net benefit by retention strategy"
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "compute_arpu_impact".to_string(),
                description: "Calculate ARPU impact from churn reduction".to_string(),
                parameters: params::<ArpuImpactParams>(),
            },
            ToolSpec {
                name: "compute_cltv".to_string(),
                description: "Compute customer lifetime value from financial assumptions"
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "rag_search".to_string(),
                description: "Search the churn knowledge base for conceptual and strategic context"
                    .to_string(),
                parameters: params::<RagSearchParams>(),
            },
        ]
    }

    /// Invoke a tool by name with JSON arguments. Unknown tools and bad
    /// arguments come back as explanatory text, never as errors.
    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolOutput {
        match name {
            "get_risk_distribution" => self.get_risk_distribution(),
            "get_feature_importance" => {
                let params: FeatureImportanceParams =
                    serde_json::from_value(args.clone()).unwrap_or_default();
                self.get_feature_importance(params.top_n.unwrap_or(10))
            }
            "get_roi_by_strategy" => self.get_roi_by_strategy(),
            "compute_arpu_impact" => {
                let churn_delta_pct = args
                    .get("churn_delta_pct")
                    .or_else(|| args.get("churnDeltaPct"))
                    .and_then(Value::as_f64)
                    .unwrap_or(2.0);
                self.compute_arpu_impact(churn_delta_pct)
            }
            "compute_cltv" => self.compute_cltv(),
            "rag_search" => match serde_json::from_value::<RagSearchParams>(args.clone()) {
                Ok(params) => self.rag_search(&params.query, params.top_k).await,
                Err(e) => ToolOutput::text_only(format!("rag_search needs a query argument: {e}")),
            },
            other => {
                warn!(tool = %other, "unknown tool requested");
                ToolOutput::text_only(format!("Tool {other} is not available."))
            }
        }
    }

    // ── Tool 1: risk distribution ───────────────────────────────────

    #[must_use]
    pub fn get_risk_distribution(&self) -> ToolOutput {
        let rows = &self.data.risk_distribution;
        if rows.is_empty() {
            return ToolOutput::text_only("No risk distribution data is loaded.");
        }

        let table = rows
            .iter()
            .filter_map(|r| match serde_json::to_value(r) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect();

        ToolOutput {
            table: Some(table),
            chart: Some(ChartSpec {
                kind: ChartKind::Donut,
                title: "Customer Risk Distribution".to_string(),
                x_label: None,
                y_label: None,
                series: vec![ChartSeries {
                    name: "Risk Segments".to_string(),
                    data: rows
                        .iter()
                        .map(|r| ChartPoint {
                            x: r.level.clone(),
                            y: r.customers as f64,
                        })
                        .collect(),
                }],
            }),
            text: None,
            citations: Some(vec![Citation::new(
                "ExecutiveDashboard",
                "Risk distribution donut",
            )]),
        }
    }

    // ── Tool 2: feature importance ──────────────────────────────────

    #[must_use]
    pub fn get_feature_importance(&self, top_n: usize) -> ToolOutput {
        let all = &self.data.feature_importance;
        if all.is_empty() {
            return ToolOutput::text_only("No feature importance data is loaded.");
        }

        let rows: Vec<_> = all.iter().take(top_n).collect();
        let table = rows
            .iter()
            .filter_map(|r| match serde_json::to_value(r) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
            .collect();

        ToolOutput {
            table: Some(table),
            chart: Some(ChartSpec {
                kind: ChartKind::Bar,
                title: format!("Top {} Churn Drivers (ML Importance)", rows.len()),
                x_label: Some("Driver".to_string()),
                y_label: Some("Importance Score".to_string()),
                series: vec![ChartSeries {
                    name: "Drivers".to_string(),
                    data: rows
                        .iter()
                        .map(|r| ChartPoint {
                            x: r.name.clone(),
                            y: r.importance,
                        })
                        .collect(),
                }],
            }),
            text: None,
            citations: Some(vec![Citation::new("ModelingDeepDive", "Feature importance")]),
        }
    }

    // ── Tool 3: ROI by strategy ─────────────────────────────────────

    /// Sorted descending by net benefit, the primary decision metric.
    #[must_use]
    pub fn get_roi_by_strategy(&self) -> ToolOutput {
        let mut strategies: Vec<_> = self.data.roi_by_strategy.iter().collect();
        if strategies.is_empty() {
            return ToolOutput::text_only("No strategy ROI data is loaded.");
        }
        strategies.sort_by(|a, b| b.net_benefit().total_cmp(&a.net_benefit()));

        let table = strategies
            .iter()
            .filter_map(|s| match serde_json::to_value(s) {
                Ok(Value::Object(mut map)) => {
                    map.insert("net_benefit".to_string(), json!(s.net_benefit()));
                    Some(map)
                }
                _ => None,
            })
            .collect();

        let best = strategies[0];
        ToolOutput {
            table: Some(table),
            chart: Some(ChartSpec {
                kind: ChartKind::Bar,
                title: "ROI by Strategy".to_string(),
                x_label: Some("Strategy".to_string()),
                y_label: Some("ROI (%)".to_string()),
                series: vec![ChartSeries {
                    name: "ROI".to_string(),
                    data: strategies
                        .iter()
                        .map(|s| ChartPoint {
                            x: s.strategy.clone(),
                            y: s.roi_pct,
                        })
                        .collect(),
                }],
            }),
            text: Some(format!(
                "{} leads on net benefit at {} ({}% ROI, IRR {}%).",
                best.strategy,
                money(best.net_benefit()),
                best.roi_pct,
                best.irr
            )),
            citations: Some(vec![Citation::new("ScenarioPlanner", "ROI comparison")]),
        }
    }

    // ── Tool 4: ARPU impact ─────────────────────────────────────────

    /// Linear elasticity model: delta = arpu * elasticity * churnDelta/100.
    #[must_use]
    pub fn compute_arpu_impact(&self, churn_delta_pct: f64) -> ToolOutput {
        let fin = &self.data.financials;
        let delta = fin.arpu * (fin.arpu_elasticity * (churn_delta_pct / 100.0));
        let new_arpu = fin.arpu + delta;

        let mut current = Row::new();
        current.insert("state".to_string(), json!("Current"));
        current.insert("arpu".to_string(), json!(fin.arpu));
        let mut reduced = Row::new();
        reduced.insert("state".to_string(), json!(format!("-{churn_delta_pct}% churn")));
        reduced.insert("arpu".to_string(), json!(new_arpu));

        ToolOutput {
            table: Some(vec![current, reduced]),
            chart: Some(ChartSpec {
                kind: ChartKind::Bar,
                title: format!("ARPU Impact of {churn_delta_pct}% Churn Reduction"),
                x_label: Some("Scenario".to_string()),
                y_label: Some("ARPU ($/month)".to_string()),
                series: vec![ChartSeries {
                    name: "ARPU".to_string(),
                    data: vec![
                        ChartPoint {
                            x: "Current".to_string(),
                            y: fin.arpu,
                        },
                        ChartPoint {
                            x: format!("-{churn_delta_pct}%"),
                            y: new_arpu,
                        },
                    ],
                }],
            }),
            text: Some(format!(
                "ARPU rises by {} to {} with {churn_delta_pct}% churn reduction (elasticity {}).",
                money(delta),
                money(new_arpu),
                fin.arpu_elasticity
            )),
            citations: Some(vec![Citation::new("ScenarioPlanner", "ARPU elasticity model")]),
        }
    }

    // ── Tool 5: CLTV ────────────────────────────────────────────────

    #[must_use]
    pub fn compute_cltv(&self) -> ToolOutput {
        let fin = &self.data.financials;
        if fin.churn <= 0.0 {
            return ToolOutput::text_only(
                "CLTV is undefined at zero churn; check the financial assumptions.",
            );
        }
        let cltv = (fin.arpu * fin.gross_margin) / fin.churn;

        let mut row = Row::new();
        row.insert("metric".to_string(), json!("CLTV"));
        row.insert("value".to_string(), json!(cltv));

        ToolOutput {
            table: Some(vec![row]),
            chart: None,
            text: Some(format!(
                "Estimated CLTV ≈ {} per customer (ARPU {}, margin {}, churn {}).",
                money(cltv),
                money(fin.arpu),
                pct(fin.gross_margin),
                pct(fin.churn)
            )),
            citations: Some(vec![Citation::new("ExecutiveDashboard", "Financial KPIs")]),
        }
    }

    // ── Tool 6: rag_search ──────────────────────────────────────────

    /// Delegate to the retriever and reshape its output. Retriever errors
    /// come back as descriptive text so the tool surface never throws.
    pub async fn rag_search(&self, query: &str, top_k: Option<usize>) -> ToolOutput {
        let options = RetrievalOptions {
            top_k,
            ..Default::default()
        };

        match self.retriever.retrieve(query, &options).await {
            Ok(results) if results.is_empty() => {
                ToolOutput::text_only("No relevant passages found in the knowledge base.")
            }
            Ok(results) => {
                let context = Retriever::format_context(&results);
                let citations = Retriever::citations(&results)
                    .into_iter()
                    .map(|c| Citation::new(&c.section_id, &c.title))
                    .collect();
                ToolOutput {
                    table: None,
                    chart: None,
                    text: Some(context),
                    citations: Some(citations),
                }
            }
            Err(e) => {
                warn!(error = %e, "rag_search retrieval failed");
                ToolOutput::text_only(format!("Knowledge base search failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;

    fn registry() -> ToolRegistry {
        let retriever = Retriever::new(
            "/nonexistent/corpus.json",
            Arc::new(MockEmbedder::default()),
            6,
            0.5,
        );
        ToolRegistry::new(Arc::new(AppData::reference()), Arc::new(retriever))
    }

    #[test]
    fn test_risk_distribution_donut() {
        let out = registry().get_risk_distribution();
        let chart = out.chart.unwrap();
        assert_eq!(chart.kind, ChartKind::Donut);
        assert!(chart.x_label.is_none());
        assert!(chart.y_label.is_none());
        assert_eq!(chart.series[0].data.len(), 4);
        assert_eq!(out.citations.unwrap()[0].source, "ExecutiveDashboard");
    }

    #[test]
    fn test_feature_importance_top_n() {
        let out = registry().get_feature_importance(3);
        assert_eq!(out.table.unwrap().len(), 3);
        let chart = out.chart.unwrap();
        assert_eq!(chart.series[0].data.len(), 3);
        assert_eq!(chart.series[0].data[0].x, "Contract Type");
        assert!(chart.x_label.is_some() && chart.y_label.is_some());
    }

    #[test]
    fn test_roi_sorted_by_net_benefit_desc() {
        let out = registry().get_roi_by_strategy();
        let table = out.table.unwrap();
        let nets: Vec<f64> = table
            .iter()
            .map(|r| r.get("net_benefit").unwrap().as_f64().unwrap())
            .collect();
        assert!(nets.windows(2).all(|w| w[0] >= w[1]));

        // net benefit = savings - investment for every row
        for row in &table {
            let savings = row.get("savings").unwrap().as_f64().unwrap();
            let investment = row.get("investment").unwrap().as_f64().unwrap();
            let net = row.get("net_benefit").unwrap().as_f64().unwrap();
            assert_eq!(net, savings - investment);
        }
        assert!(out.text.unwrap().contains("Budget Optimization"));
    }

    #[test]
    fn test_arpu_impact_linear_model() {
        let out = registry().compute_arpu_impact(2.0);
        let table = out.table.unwrap();
        assert_eq!(table.len(), 2);
        let new_arpu = table[1].get("arpu").unwrap().as_f64().unwrap();
        assert!((new_arpu - 65.78).abs() < 1e-9);
        let chart = out.chart.unwrap();
        assert_eq!(chart.x_label.as_deref(), Some("Scenario"));
    }

    #[test]
    fn test_cltv_formula() {
        let out = registry().compute_cltv();
        let table = out.table.unwrap();
        let value = table[0].get("value").unwrap().as_f64().unwrap();
        assert!((value - 2015.0).abs() < 1e-9);
    }

    #[test]
    fn test_cltv_zero_churn_is_text_not_panic() {
        let mut data = AppData::reference();
        data.financials.churn = 0.0;
        let retriever = Retriever::new(
            "/nonexistent/corpus.json",
            Arc::new(MockEmbedder::default()),
            6,
            0.5,
        );
        let registry = ToolRegistry::new(Arc::new(data), Arc::new(retriever));
        let out = registry.compute_cltv();
        assert!(out.table.is_none());
        assert!(out.text.unwrap().contains("undefined"));
    }

    #[tokio::test]
    async fn test_rag_search_swallows_retriever_errors() {
        let out = registry().rag_search("what is arpu", None).await;
        assert!(out.citations.is_none());
        assert!(out.text.unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let out = registry().dispatch("launch_rockets", &json!({})).await;
        assert!(out.text.unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_dispatch_arpu_accepts_camel_case_args() {
        let out = registry()
            .dispatch("compute_arpu_impact", &json!({ "churnDeltaPct": 5.0 }))
            .await;
        let chart = out.chart.unwrap();
        assert!(chart.title.contains("5% Churn Reduction"));
    }

    #[test]
    fn test_specs_cover_all_tools() {
        let specs = ToolRegistry::specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        for expected in [
            "get_risk_distribution",
            "get_feature_importance",
            "get_roi_by_strategy",
            "compute_arpu_impact",
            "compute_cltv",
            "rag_search",
        ] {
            assert!(names.contains(&expected), "missing tool spec {expected}");
        }
    }
}
