//! Orchestrator for the Strategy Copilot.
//!
//! `ask` is the single entry point and the single place where every
//! failure mode is converted into a schema-valid [`Answer`]: it scores
//! the route, dispatches to the RAG, numeric, or hybrid path, falls back
//! to the RAG path on errors, and returns a fixed error answer when the
//! whole chain is exhausted. It never returns an error and never panics.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compose::{compose_grounded_answer, summarize_context};
use crate::data::AppData;
use crate::executor::execute_plan;
use crate::llm::{ChatOutcome, ChatRequest, CompletionProvider, LlmError};
use crate::planner::{
    Compute, ComputeKind, Intent, OpKind, Operation, OrderBy, Plan, PlanChart, Planner, SortDir,
};
use crate::retriever::Retriever;
use crate::router::{Route, route, score_route};
use crate::schema::{Answer, AnswerInvalid, ChartKind, Citation, MIN_ANSWER_CHARS};
use crate::telemetry::Telemetry;
use crate::tools::{ToolOutput, ToolRegistry};
use crate::validator::validate_chart;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("retrieval produced no usable context")]
    RetrievalEmpty,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("assembled chart failed validation: {0}")]
    ChartInvalid(String),

    #[error(transparent)]
    AnswerInvalid(#[from] AnswerInvalid),
}

const TOOLS_SYSTEM_PROMPT: &str = "\
You are a telco churn analyst.

TOOL SELECTION PRIORITY:
1) For BROAD, CONCEPTUAL, or STRATEGIC questions (e.g. 'tell me about the telco business', 'explain churn', 'what is ARPU'), ALWAYS use the rag_search tool FIRST.
2) For SPECIFIC NUMERIC questions (e.g. 'what is the ROI', 'show me risk distribution', 'calculate CLTV'), use the data tools.
3) When in doubt, prefer rag_search for questions containing: why, how, what is, explain, define, describe, tell me about.

PRINCIPLES:
1) Use tools to obtain COMPLETE tables; tools do not choose visuals.
2) For questions asking 'optimal' or 'best', emphasize the PRIMARY DECISION METRIC (net benefit $), not ROI%.
3) All non-donut charts MUST include xLabel and yLabel.
4) Always include at least one citation referencing source tabs or knowledge base sections.
5) Keep text concise (2-3 sentences max) and actionable.";

static CHURN_DELTA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

fn parse_churn_delta(question: &str) -> f64 {
    CHURN_DELTA_RE
        .captures(question)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(2.0)
}

const GENERIC_FOLLOW_UPS: &[&str] = &[
    "Show me customer risk distribution",
    "What are the top churn drivers?",
    "Compare ROI across all strategies",
];

fn numeric_follow_ups(intent: Intent) -> Vec<String> {
    let suggestions: &[&str] = match intent {
        Intent::Drivers => &[
            "How do these drivers affect ARPU and IRR?",
            "Show me ROI across retention strategies",
            "Which segments have highest churn risk?",
        ],
        Intent::Risk | Intent::RiskDist => &[
            "What are the top churn drivers for High Risk customers?",
            "Compare retention strategies by ROI",
            "Show ARPU impact of 2% churn reduction",
        ],
        Intent::RoiCompare | Intent::Irr => &[
            "What's the optimal retention budget?",
            "Show me top churn drivers",
            "How does churn affect EBITDA?",
        ],
        Intent::Arpu | Intent::Cltv | Intent::FinancialKpis => &[
            "How does churn reduction impact ARPU?",
            "Compare IRR across strategies",
            "Show risk distribution",
        ],
        Intent::SegmentDeepdive | Intent::Generic => GENERIC_FOLLOW_UPS,
    };
    suggestions.iter().map(|s| (*s).to_string()).collect()
}

fn tool_intent(tool_name: &str) -> Intent {
    match tool_name {
        "get_risk_distribution" => Intent::RiskDist,
        "get_feature_importance" => Intent::Drivers,
        "get_roi_by_strategy" => Intent::RoiCompare,
        "compute_arpu_impact" => Intent::Arpu,
        "compute_cltv" => Intent::Cltv,
        _ => Intent::Generic,
    }
}

/// Intent-aware local plan used when no planner is available or the
/// planner fails. Mirrors the strong defaults for core questions.
fn local_plan(question: &str) -> Plan {
    let s = question.to_lowercase();

    let operation = |op: OpKind, from: &str| Operation {
        op,
        from: Some(from.to_string()),
        select: None,
        conditions: None,
        order_by: None,
        limit: None,
        compute: None,
    };

    if s.contains("risk") || s.contains("distribution") || s.contains("segment") {
        Plan {
            intent: Intent::RiskDist,
            metrics: None,
            operations: vec![operation(OpKind::Slice, "risk_distribution")],
            chart: PlanChart {
                kind: ChartKind::Donut,
                title: "Customer Risk Distribution by Segment".to_string(),
                x_label: None,
                y_label: None,
                x_field: Some("level".to_string()),
                y_field: Some("customers".to_string()),
            },
            narrative_focus: vec![
                "risk concentration".to_string(),
                "high-risk targets".to_string(),
            ],
            citations: vec!["ExecutiveDashboard: Risk Tier Donut".to_string()],
        }
    } else if s.contains("arpu") {
        let pct = parse_churn_delta(&s);
        Plan {
            intent: Intent::Arpu,
            metrics: None,
            operations: vec![Operation {
                op: OpKind::Compute,
                from: None,
                select: None,
                conditions: None,
                order_by: None,
                limit: None,
                compute: Some(Compute {
                    kind: ComputeKind::ArpuImpact,
                    params: Some(serde_json::json!({ "churnDeltaPct": pct })),
                }),
            }],
            chart: PlanChart {
                kind: ChartKind::Bar,
                title: format!("ARPU Impact of {pct}% Churn Reduction"),
                x_label: Some("Scenario".to_string()),
                y_label: Some("ARPU ($/month)".to_string()),
                x_field: Some("state".to_string()),
                y_field: Some("arpu".to_string()),
            },
            narrative_focus: vec![
                "ARPU increase".to_string(),
                "financial benefit".to_string(),
            ],
            citations: vec!["ScenarioPlanner: ARPU Elasticity Model".to_string()],
        }
    } else if s.contains("roi") || s.contains("compare") || s.contains("strateg") {
        Plan {
            intent: Intent::RoiCompare,
            metrics: None,
            operations: vec![operation(OpKind::Aggregate, "roi_by_strategy")],
            chart: PlanChart {
                kind: ChartKind::Bar,
                title: "ROI Comparison Across Retention Strategies".to_string(),
                x_label: Some("Strategy".to_string()),
                y_label: Some("ROI (%)".to_string()),
                x_field: Some("strategy".to_string()),
                y_field: Some("roi_pct".to_string()),
            },
            narrative_focus: vec!["best strategy".to_string(), "ROI ranking".to_string()],
            citations: vec!["ScenarioPlanner: Strategy ROI Analysis".to_string()],
        }
    } else {
        Plan {
            intent: Intent::Drivers,
            metrics: None,
            operations: vec![Operation {
                op: OpKind::TopN,
                from: Some("feature_importance".to_string()),
                select: Some(vec!["name".to_string(), "importance".to_string()]),
                conditions: None,
                order_by: Some(OrderBy {
                    field: "importance".to_string(),
                    dir: SortDir::Desc,
                }),
                limit: Some(10),
                compute: None,
            }],
            chart: PlanChart {
                kind: ChartKind::HorizontalBar,
                title: "Top 10 Churn Drivers (ML Feature Importance)".to_string(),
                x_label: Some("Importance Score".to_string()),
                y_label: Some("Feature".to_string()),
                x_field: Some("name".to_string()),
                y_field: Some("importance".to_string()),
            },
            narrative_focus: vec![
                "top driver".to_string(),
                "relative importance".to_string(),
            ],
            citations: vec!["ModelingDeepDive: Feature Importance Rankings".to_string()],
        }
    }
}

pub struct Copilot {
    data: Arc<AppData>,
    registry: ToolRegistry,
    provider: Option<Arc<dyn CompletionProvider>>,
    planner_timeout_ms: u64,
    telemetry: Arc<Telemetry>,
}

impl Copilot {
    #[must_use]
    pub fn new(
        data: Arc<AppData>,
        retriever: Arc<Retriever>,
        provider: Option<Arc<dyn CompletionProvider>>,
        planner_timeout_ms: u64,
    ) -> Self {
        Self {
            registry: ToolRegistry::new(Arc::clone(&data), retriever),
            data,
            provider,
            planner_timeout_ms,
            telemetry: Arc::new(Telemetry::new()),
        }
    }

    #[must_use]
    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Answer a question. Always resolves to a schema-valid [`Answer`];
    /// this boundary never propagates an error to the caller.
    pub async fn ask(&self, question: &str) -> Answer {
        let score = score_route(question);
        let chosen = route(question);
        info!(route = chosen.as_str(), rag = score.rag, numeric = score.numeric, "routing query");

        let primary = match chosen {
            Route::Rag => self.answer_with_rag(question).await,
            Route::Hybrid => self.answer_hybrid(question).await,
            Route::Numeric | Route::Generic => self.answer_numeric(question).await,
        };

        let err = match primary {
            Ok(answer) => return answer,
            Err(err) => err,
        };

        warn!(error = %err, "primary path failed");
        self.telemetry.record_error(&err);

        // Safety net: the knowledge base, never a silently-picked numeric
        // tool. Skipped when the RAG path itself just failed.
        if chosen != Route::Rag {
            if let Ok(answer) = self.answer_with_rag(question).await {
                return answer;
            }
        }

        self.error_answer(&err)
    }

    // ── RAG path ────────────────────────────────────────────────────

    async fn answer_with_rag(&self, question: &str) -> Result<Answer, CopilotError> {
        let out = self.registry.rag_search(question, None).await;
        let citations = out.citations.unwrap_or_default();
        let context = out.text.unwrap_or_default();

        if citations.is_empty() || context.trim().is_empty() {
            return Err(CopilotError::RetrievalEmpty);
        }

        let answer = compose_grounded_answer(question, &context, &citations);
        answer.validate()?;
        self.telemetry
            .rag_answers
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(answer)
    }

    // ── Numeric path ────────────────────────────────────────────────

    async fn answer_numeric(&self, question: &str) -> Result<Answer, CopilotError> {
        match self.provider.clone() {
            None => Ok(self.deterministic_fallback(question).await),
            Some(provider) => self.llm_with_tools(question, &provider).await,
        }
    }

    /// Deterministic keyword fallback when no completion provider is
    /// configured: pattern-match the question against fixed substrings
    /// and dispatch the matching tool, never guessing.
    async fn deterministic_fallback(&self, question: &str) -> Answer {
        self.telemetry
            .fallbacks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let s = question.to_lowercase();

        let matched: Option<(&str, ToolOutput)> = if s.contains("risk") && s.contains("distribution")
        {
            Some(("get_risk_distribution", self.registry.get_risk_distribution()))
        } else if s.contains("arpu") {
            Some((
                "compute_arpu_impact",
                self.registry.compute_arpu_impact(parse_churn_delta(&s)),
            ))
        } else if s.contains("roi") || s.contains("strateg") {
            Some(("get_roi_by_strategy", self.registry.get_roi_by_strategy()))
        } else if s.contains("cltv") || s.contains("lifetime") {
            Some(("compute_cltv", self.registry.compute_cltv()))
        } else {
            None
        };

        match matched {
            Some((name, output)) => self.answer_from_tool(name, output),
            None => Answer {
                text: "I need a more specific question to run the numbers. Ask about risk \
                       distribution, churn drivers, ROI by strategy, ARPU impact, or CLTV."
                    .to_string(),
                citations: vec![Citation::new("Strategy Copilot", "Deterministic fallback")],
                chart: None,
                follow_ups: numeric_follow_ups(Intent::Generic),
            },
        }
    }

    /// LLM-with-tools flow: the model either invokes a tool (whose output
    /// is wrapped into an Answer) or returns plain text (treated as a
    /// fallback Answer).
    async fn llm_with_tools(
        &self,
        question: &str,
        provider: &Arc<dyn CompletionProvider>,
    ) -> Result<Answer, CopilotError> {
        self.telemetry
            .llm_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let request = ChatRequest {
            system: TOOLS_SYSTEM_PROMPT.to_string(),
            user: question.to_string(),
            tools: ToolRegistry::specs(),
            json_mode: false,
        };

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(self.planner_timeout_ms),
            provider.chat(request),
        )
        .await
        .map_err(|_| CopilotError::Llm(LlmError::Timeout(self.planner_timeout_ms)))??;

        match outcome {
            ChatOutcome::ToolCall { name, arguments } => {
                debug!(tool = %name, "model invoked tool");
                if score_route(question).rag > 0 && name != "rag_search" {
                    self.telemetry.record_bypass(question, &name);
                }

                let output = self.registry.dispatch(&name, &arguments).await;

                if name == "rag_search" {
                    let citations = output.citations.unwrap_or_default();
                    if citations.is_empty() {
                        return Err(CopilotError::RetrievalEmpty);
                    }
                    let answer = compose_grounded_answer(
                        question,
                        output.text.as_deref().unwrap_or(""),
                        &citations,
                    );
                    answer.validate()?;
                    self.telemetry
                        .rag_answers
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return Ok(answer);
                }

                let answer = self.answer_from_tool(&name, output);
                answer.validate()?;
                Ok(answer)
            }
            ChatOutcome::Text(text) => {
                let answer = self.answer_from_text(text);
                answer.validate()?;
                Ok(answer)
            }
        }
    }

    // ── Hybrid path ─────────────────────────────────────────────────

    /// Data first, narrative second: run the plan-execute pipeline for
    /// the chart, then best-effort augment the text with retrieved
    /// grounding. Augmentation failures never affect the answer.
    async fn answer_hybrid(&self, question: &str) -> Result<Answer, CopilotError> {
        let mut answer = self.plan_pipeline(question).await?;

        let augmentation = self.registry.rag_search(question, Some(2)).await;
        if let (Some(context), Some(citations)) = (augmentation.text, augmentation.citations) {
            if !citations.is_empty() {
                let summary = summarize_context(&context);
                if let Some(sentence) = summary.split_inclusive('.').next() {
                    if sentence.len() > 10 {
                        answer.text.push(' ');
                        answer.text.push_str(sentence.trim());
                    }
                }
                for citation in citations {
                    if !answer.citations.iter().any(|c| c.source == citation.source) {
                        answer.citations.push(citation);
                    }
                }
            }
        }

        answer.validate()?;
        Ok(answer)
    }

    /// Plan → execute → validate. Uses the LLM planner when available,
    /// the intent-aware local plan otherwise; an invalid chart from an
    /// LLM plan triggers one local-plan retry (caller-driven, never
    /// automatic beyond that).
    pub async fn plan_pipeline(&self, question: &str) -> Result<Answer, CopilotError> {
        let llm_plan = match self.provider.clone() {
            Some(provider) => {
                self.telemetry
                    .llm_calls
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let planner = Planner::new(provider, self.planner_timeout_ms);
                match planner.plan(question, &self.data).await {
                    Ok(plan) => {
                        self.telemetry
                            .planned
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        Some(plan)
                    }
                    Err(e) => {
                        warn!(error = %e, "planner failed, using intent-aware fallback");
                        self.telemetry.record_error(&e);
                        self.telemetry
                            .fallbacks
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(plan) = llm_plan {
            match self.execute_validated(&plan) {
                Ok(answer) => return Ok(answer),
                Err(e) => {
                    warn!(error = %e, "LLM plan produced invalid chart, replanning locally");
                    self.telemetry
                        .fallbacks
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }

        self.execute_validated(&local_plan(question))
    }

    fn execute_validated(&self, plan: &Plan) -> Result<Answer, CopilotError> {
        let execution = execute_plan(plan, &self.data);
        self.telemetry
            .executed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let report = validate_chart(&execution.chart);
        if !report.valid {
            return Err(CopilotError::ChartInvalid(report.errors.join("; ")));
        }

        let mut text = execution.lead.clone();
        if execution.data_points > 1 {
            text.push_str(&format!(
                " This analysis uses {} data points from our ML model.",
                execution.data_points
            ));
        }

        let answer = Answer {
            text,
            citations: plan
                .citations
                .iter()
                .map(|c| Citation::from_shorthand(c))
                .collect(),
            chart: Some(execution.chart),
            follow_ups: numeric_follow_ups(plan.intent),
        };
        answer.validate()?;
        Ok(answer)
    }

    // ── Answer assembly helpers ─────────────────────────────────────

    fn answer_from_tool(&self, tool_name: &str, output: ToolOutput) -> Answer {
        let data_points = output
            .chart
            .as_ref()
            .and_then(|c| c.series.first())
            .map_or(0, |s| s.data.len());

        let text = output.text.unwrap_or_else(|| match &output.chart {
            Some(chart) => format!(
                "{}: the chart breaks down {data_points} data points from the live dataset.",
                chart.title
            ),
            None => "Analysis complete based on your telco data.".to_string(),
        });

        let citations = match output.citations {
            Some(citations) if !citations.is_empty() => citations,
            _ => vec![Citation::new("Strategy Copilot", "Data tools")],
        };

        Answer {
            text,
            citations,
            chart: output.chart,
            follow_ups: numeric_follow_ups(tool_intent(tool_name)),
        }
    }

    fn answer_from_text(&self, text: String) -> Answer {
        let mut text = text.trim().to_string();
        if text.len() < MIN_ANSWER_CHARS {
            text = format!(
                "{text} Ask about risk distribution, churn drivers, ROI, ARPU, or CLTV for \
                 specifics."
            )
            .trim()
            .to_string();
        }

        Answer {
            text,
            citations: vec![Citation::new("Strategy Copilot", "Model response")],
            chart: None,
            follow_ups: numeric_follow_ups(Intent::Generic),
        }
    }

    /// Fixed, schema-valid answer naming the original failure.
    fn error_answer(&self, err: &CopilotError) -> Answer {
        Answer {
            text: format!(
                "I couldn't complete that analysis ({err}). Try one of the suggested \
                 questions, or ask about risk, drivers, ROI, ARPU, or CLTV."
            ),
            citations: vec![Citation::new("system", "Strategy Copilot error handler")],
            chart: None,
            follow_ups: GENERIC_FOLLOW_UPS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}
