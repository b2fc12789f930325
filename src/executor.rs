//! Deterministic plan execution against the application dataset.
//!
//! Runs a validated [`Plan`]'s operations in order over named in-memory
//! datasets, assembles a chart with mandatory axis labels for non-donut
//! kinds, and generates the narrative lead sentence. No numbers are
//! guessed: everything comes from the dataset or a closed-form compute.

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::data::AppData;
use crate::planner::{CompareOp, Compute, ComputeKind, Intent, OpKind, Operation, Plan, SortDir};
use crate::schema::{ChartKind, ChartPoint, ChartSeries, ChartSpec};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct Execution {
    pub table: Vec<Row>,
    pub chart: ChartSpec,
    pub lead: String,
    pub data_points: usize,
}

// ── Formatters ───────────────────────────────────────────────────────

pub(crate) fn pct(n: f64) -> String {
    format!("{:.1}%", n * 100.0)
}

pub(crate) fn money(n: f64) -> String {
    let a = n.abs();
    let sign = if n < 0.0 { "-" } else { "" };
    if a >= 1e9 {
        format!("{sign}${:.1}B", a / 1e9)
    } else if a >= 1e6 {
        format!("{sign}${:.1}M", a / 1e6)
    } else if a >= 1e3 {
        format!("{sign}${:.1}k", a / 1e3)
    } else {
        format!("{sign}${a:.2}")
    }
}

/// Percentage for fractions, money for large magnitudes, raw otherwise.
fn format_metric(n: f64) -> String {
    if n.abs() < 1.0 {
        pct(n)
    } else if n.abs() > 1000.0 {
        money(n)
    } else if (n - n.round()).abs() < f64::EPSILON {
        format!("{}", n as i64)
    } else {
        format!("{n:.2}")
    }
}

// ── Dataset resolution ───────────────────────────────────────────────

fn to_rows<T: serde::Serialize>(items: &[T]) -> Vec<Row> {
    items
        .iter()
        .filter_map(|item| match serde_json::to_value(item) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect()
}

fn resolve_dataset(name: &str, data: &AppData) -> Option<Vec<Row>> {
    match name {
        "risk_distribution" => Some(to_rows(&data.risk_distribution)),
        "feature_importance" => Some(to_rows(&data.feature_importance)),
        "roi_by_strategy" => {
            let mut rows = to_rows(&data.roi_by_strategy);
            for (row, strategy) in rows.iter_mut().zip(&data.roi_by_strategy) {
                row.insert("net_benefit".to_string(), json!(strategy.net_benefit()));
            }
            Some(rows)
        }
        "segments" => Some(to_rows(&data.segments)),
        "financials" => match serde_json::to_value(&data.financials) {
            Ok(Value::Object(map)) => Some(vec![map]),
            _ => None,
        },
        _ => None,
    }
}

// ── Operation pipeline ───────────────────────────────────────────────

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        // Simple greater-than fallback for non-matching types
        _ => value_text(a).cmp(&value_text(b)),
    }
}

fn condition_holds(row: &Row, field: &str, op: CompareOp, expected: &Value) -> bool {
    let Some(actual) = row.get(field) else {
        return false;
    };

    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::Gt => compare_values(actual, expected) == std::cmp::Ordering::Greater,
        CompareOp::Lt => compare_values(actual, expected) == std::cmp::Ordering::Less,
        CompareOp::Gte => compare_values(actual, expected) != std::cmp::Ordering::Less,
        CompareOp::Lte => compare_values(actual, expected) != std::cmp::Ordering::Greater,
        CompareOp::In => expected
            .as_array()
            .is_some_and(|candidates| candidates.contains(actual)),
        CompareOp::Contains => value_text(actual)
            .to_lowercase()
            .contains(&value_text(expected).to_lowercase()),
    }
}

fn apply_transforms(mut rows: Vec<Row>, step: &Operation) -> Vec<Row> {
    if let Some(conditions) = &step.conditions {
        rows.retain(|row| {
            conditions
                .iter()
                .all(|c| condition_holds(row, &c.field, c.op, &c.value))
        });
    }

    if let Some(select) = &step.select {
        rows = rows
            .into_iter()
            .map(|row| {
                select
                    .iter()
                    .filter_map(|field| row.get(field).map(|v| (field.clone(), v.clone())))
                    .collect()
            })
            .collect();
    }

    if let Some(order) = &step.order_by {
        let null = Value::Null;
        rows.sort_by(|a, b| {
            let ordering = compare_values(
                a.get(&order.field).unwrap_or(&null),
                b.get(&order.field).unwrap_or(&null),
            );
            match order.dir {
                SortDir::Asc => ordering,
                SortDir::Desc => ordering.reverse(),
            }
        });
    }

    if let Some(limit) = step.limit {
        rows.truncate(limit);
    }

    rows
}

fn run_compute(compute: &Compute, data: &AppData) -> Vec<Row> {
    let fin = &data.financials;

    match compute.kind {
        ComputeKind::ArpuImpact => {
            let churn_delta_pct = compute
                .params
                .as_ref()
                .and_then(|p| p.get("churnDeltaPct"))
                .and_then(Value::as_f64)
                .unwrap_or(2.0);

            // Linear elasticity model
            let delta = fin.arpu * (fin.arpu_elasticity * (churn_delta_pct / 100.0));
            let new_arpu = fin.arpu + delta;

            vec![
                row(&[("state", json!("Current")), ("arpu", json!(fin.arpu))]),
                row(&[
                    ("state", json!(format!("-{churn_delta_pct}% churn"))),
                    ("arpu", json!(new_arpu)),
                ]),
            ]
        }
        ComputeKind::Cltv => {
            let cltv = (fin.arpu * fin.gross_margin) / fin.churn;
            vec![row(&[("metric", json!("CLTV")), ("value", json!(cltv))])]
        }
        ComputeKind::Irr => data
            .roi_by_strategy
            .iter()
            .map(|s| {
                row(&[
                    ("strategy", json!(s.strategy)),
                    ("irr", json!(s.irr / 100.0)),
                ])
            })
            .collect(),
        ComputeKind::Roi => data
            .roi_by_strategy
            .iter()
            .map(|s| {
                row(&[
                    ("strategy", json!(s.strategy)),
                    ("roi", json!(s.roi_pct / 100.0)),
                ])
            })
            .collect(),
    }
}

fn row(fields: &[(&str, Value)]) -> Row {
    fields
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

// ── Chart assembly ───────────────────────────────────────────────────

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn first_non_numeric_field(row: &Row) -> Option<&String> {
    row.iter()
        .find(|(_, v)| !v.is_number())
        .map(|(k, _)| k)
        .or_else(|| row.keys().next())
}

fn first_numeric_field(row: &Row) -> Option<&String> {
    row.iter().find(|(_, v)| v.is_number()).map(|(k, _)| k)
}

/// Bind table columns to chart axes. Axis-role hints from the plan take
/// precedence; the first-string/first-numeric heuristic is the fallback.
fn axis_fields<'a>(plan: &'a Plan, table: &'a [Row]) -> (Option<&'a str>, Option<&'a str>) {
    let first = table.first();

    let x_key = plan
        .chart
        .x_field
        .as_deref()
        .filter(|f| first.is_some_and(|row| row.contains_key(*f)))
        .or_else(|| {
            first
                .and_then(first_non_numeric_field)
                .map(String::as_str)
        });

    let y_key = plan
        .chart
        .y_field
        .as_deref()
        .filter(|f| first.is_some_and(|row| row.get(*f).is_some_and(Value::is_number)))
        .or_else(|| first.and_then(first_numeric_field).map(String::as_str));

    (x_key, y_key)
}

fn assemble_chart(plan: &Plan, table: &[Row]) -> ChartSpec {
    let (x_key, y_key) = axis_fields(plan, table);

    let data: Vec<ChartPoint> = table
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let x = x_key
                .and_then(|k| row.get(k))
                .map(value_text)
                .unwrap_or_else(|| format!("Item {}", idx + 1));
            let y = y_key
                .and_then(|k| row.get(k))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            ChartPoint { x, y }
        })
        .collect();

    let series_name = match plan.intent {
        Intent::RiskDist | Intent::Risk => "Risk Segments".to_string(),
        other => capitalize(other.as_str()),
    };

    let (x_label, y_label) = if plan.chart.kind == ChartKind::Donut {
        (None, None)
    } else {
        // Labels are never absent for bar/line/horizontal-bar charts.
        let x = plan
            .chart
            .x_label
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| capitalize(x_key.unwrap_or("Category")));
        let y = plan
            .chart
            .y_label
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| capitalize(y_key.unwrap_or("Value")));
        (Some(x), Some(y))
    };

    ChartSpec {
        kind: plan.chart.kind,
        title: plan.chart.title.clone(),
        x_label,
        y_label,
        series: vec![ChartSeries {
            name: series_name,
            data,
        }],
    }
}

// ── Lead sentence ────────────────────────────────────────────────────

fn lead_sentence(plan: &Plan, table: &[Row]) -> String {
    let generic = "Analysis complete based on your telco data.".to_string();

    let mut lead = match plan.intent {
        Intent::Drivers => table.first().map_or_else(
            || generic.clone(),
            |top| {
                let name = top
                    .get("name")
                    .or_else(|| top.get("feature"))
                    .map(value_text)
                    .unwrap_or_default();
                let importance = top
                    .get("importance")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                format!("Top churn driver is {name} at {}.", pct(importance))
            },
        ),
        Intent::Arpu if table.len() > 1 => {
            let base = table[0].get("arpu").and_then(Value::as_f64).unwrap_or(0.0);
            let new = table[1].get("arpu").and_then(Value::as_f64).unwrap_or(0.0);
            format!(
                "ARPU rises from {} to {} with churn reduction.",
                money(base),
                money(new)
            )
        }
        Intent::RoiCompare => table.first().map_or_else(
            || generic.clone(),
            |top| {
                let strategy = top.get("strategy").map(value_text).unwrap_or_default();
                match top.get("net_benefit").and_then(Value::as_f64) {
                    Some(net) => format!(
                        "Best strategy by net benefit: {strategy} at {}.",
                        money(net)
                    ),
                    None => {
                        let roi = top.get("roi").and_then(Value::as_f64).unwrap_or(0.0);
                        format!("Best ROI strategy: {strategy} at {}.", pct(roi))
                    }
                }
            },
        ),
        Intent::RiskDist | Intent::Risk => "Risk is concentrated in higher tiers; focus Very \
            High and High segments for maximum retention impact."
            .to_string(),
        Intent::Cltv => table.first().map_or_else(
            || generic.clone(),
            |top| {
                let value = top.get("value").and_then(Value::as_f64).unwrap_or(0.0);
                format!("Customer lifetime value is {}.", money(value))
            },
        ),
        _ => table.first().map_or_else(
            || generic.clone(),
            |top| {
                let label = first_non_numeric_field(top)
                    .and_then(|k| top.get(k))
                    .map(value_text);
                let value = first_numeric_field(top)
                    .and_then(|k| top.get(k))
                    .and_then(Value::as_f64);
                match (label, value) {
                    (Some(label), Some(value)) => {
                        format!("Top result is {label} at {}.", format_metric(value))
                    }
                    _ => generic.clone(),
                }
            },
        ),
    };

    // Name the runner-up when the plan asks for narrative depth.
    if !plan.narrative_focus.is_empty() && table.len() > 1 {
        if let Some(second) = table.get(1) {
            if let Some(name) = first_non_numeric_field(second)
                .and_then(|k| second.get(k))
                .map(value_text)
            {
                if !lead.contains(&name) {
                    lead.push_str(&format!(" {name} follows in the analysis."));
                }
            }
        }
    }

    lead
}

// ── Entry point ──────────────────────────────────────────────────────

/// Run a plan against the dataset: operation pipeline, chart assembly,
/// lead sentence. Unknown dataset names are skipped with a warning.
#[must_use]
pub fn execute_plan(plan: &Plan, data: &AppData) -> Execution {
    let mut table: Vec<Row> = Vec::new();

    for step in &plan.operations {
        if let Some(compute) = &step.compute {
            table = run_compute(compute, data);
            continue;
        }

        let source = match &step.from {
            Some(name) => match resolve_dataset(name, data) {
                Some(rows) => rows,
                None => {
                    warn!(dataset = %name, "operation references unknown dataset, skipping");
                    continue;
                }
            },
            None => Vec::new(),
        };

        table = match step.op {
            OpKind::Slice | OpKind::Aggregate => source,
            _ => apply_transforms(source, step),
        };
    }

    // Donut risk charts fall back to the full distribution when the
    // pipeline produced nothing.
    if table.is_empty()
        && matches!(plan.intent, Intent::RiskDist | Intent::Risk)
        && plan.chart.kind == ChartKind::Donut
    {
        table = resolve_dataset("risk_distribution", data).unwrap_or_default();
    }

    let chart = assemble_chart(plan, &table);
    let lead = lead_sentence(plan, &table);
    let data_points = table.len();

    Execution {
        table,
        chart,
        lead,
        data_points,
    }
}
