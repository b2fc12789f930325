/// End-to-end integration tests for the copilot pipeline.
///
/// Tests the complete flow:
///   Chunker → Corpus Builder → Retriever → Router → Copilot → Answer
use std::sync::Arc;

use churniq::copilot::Copilot;
use churniq::corpus::SectionIndex;
use churniq::corpus::builder::{CorpusBuilder, persist_corpus};
use churniq::data::AppData;
use churniq::embedder::mock::MockEmbedder;
use churniq::planner::parse_plan;
use churniq::retriever::{RetrievalOptions, Retriever};
use churniq::router::{Route, route};
use churniq::schema::ChartKind;
use churniq::executor::execute_plan;
use tempfile::tempdir;

const KNOWLEDGE_DOC: &str = "\
# Telco Churn Expert

## Financial Metrics

ARPU is the average monthly revenue per active subscriber. It anchors almost every
retention business case. CLTV discounts per-user margin over the expected tenure.

Churn compounds: a two percent monthly churn rate implies losing roughly a fifth of
the base each year. Retention economics therefore dominate acquisition economics in
mature markets.

## Modeling Frameworks

Binary classifiers rank customers by churn probability. Survival models estimate the
time to churn rather than a flat probability. Uplift models estimate the treatment
effect of an intervention, which is what retention budgets should actually target.
";

fn section_index() -> Vec<SectionIndex> {
    vec![
        SectionIndex {
            section_id: "finance".to_string(),
            title: "Financial Metrics".to_string(),
            tags: vec!["finance".to_string(), "kpi".to_string()],
            summary: "Unit economics of churn".to_string(),
        },
        SectionIndex {
            section_id: "modeling".to_string(),
            title: "Modeling Frameworks".to_string(),
            tags: vec!["ml".to_string()],
            summary: "Churn modeling approaches".to_string(),
        },
    ]
}

/// Build a corpus into a temp dir and return a retriever over it.
async fn built_retriever(dir: &std::path::Path) -> Retriever {
    let embedder = MockEmbedder::default();
    let builder = CorpusBuilder::new(&embedder, 700, 100, 10, 0);
    let corpus = builder
        .build(KNOWLEDGE_DOC, section_index())
        .await
        .expect("corpus build");
    persist_corpus(&corpus, dir, "churn_corpus.json").expect("persist corpus");

    Retriever::new(
        dir.join("churn_corpus.json"),
        Arc::new(MockEmbedder::default()),
        6,
        0.0,
    )
}

/// Full pipeline: chunk → embed → persist → load → retrieve
#[tokio::test]
async fn test_corpus_build_and_retrieval_roundtrip() {
    let dir = tempdir().unwrap();
    let retriever = built_retriever(dir.path()).await;

    let results = retriever
        .retrieve("ARPU and retention economics", &RetrievalOptions::default())
        .await
        .unwrap();

    assert!(!results.is_empty(), "retrieval should return results");
    for result in &results {
        assert!(!result.chunk.chunk.text.is_empty());
        assert!((-1.0..=1.0).contains(&result.score));
        assert!(
            result.section.section_id == "finance" || result.section.section_id == "modeling"
        );
    }

    let context = Retriever::format_context(&results);
    assert!(context.contains("relevance:"));

    let citations = Retriever::citations(&results);
    assert!(!citations.is_empty());
    assert!(citations.len() <= 2, "citations deduplicate by section");
}

/// Section filtering restricts candidates before scoring
#[tokio::test]
async fn test_retrieval_section_and_tag_filters() {
    let dir = tempdir().unwrap();
    let retriever = built_retriever(dir.path()).await;

    let finance_only = RetrievalOptions {
        section_ids: Some(vec!["finance".to_string()]),
        min_score: Some(-1.0),
        ..Default::default()
    };
    let results = retriever.retrieve("anything", &finance_only).await.unwrap();
    assert!(results.iter().all(|r| r.section.section_id == "finance"));

    let ml_tagged = RetrievalOptions {
        tags: Some(vec!["ml".to_string()]),
        min_score: Some(-1.0),
        ..Default::default()
    };
    let results = retriever.retrieve("anything", &ml_tagged).await.unwrap();
    assert!(results.iter().all(|r| r.section.section_id == "modeling"));
}

/// "What is ARPU?" routes to RAG and composes a grounded, cited answer
#[tokio::test]
async fn test_what_is_arpu_end_to_end() {
    assert_eq!(route("What is ARPU?"), Route::Rag);

    let dir = tempdir().unwrap();
    let retriever = Arc::new(built_retriever(dir.path()).await);
    let copilot = Copilot::new(Arc::new(AppData::reference()), retriever, None, 5000);

    let answer = copilot.ask("What is ARPU?").await;
    assert!(answer.validate().is_ok());
    // Grounded in the knowledge base, not the error handler
    assert!(answer.citations.iter().any(|c| c.source != "system"));
    assert!(answer.follow_ups.len() >= 2 && answer.follow_ups.len() <= 5);
}

/// Risk distribution questions never land on the plain RAG route and the
/// fallback chart is a donut with one point per risk level
#[tokio::test]
async fn test_risk_distribution_end_to_end() {
    let question = "Show me customer risk distribution";
    assert!(matches!(route(question), Route::Hybrid | Route::Numeric));

    let dir = tempdir().unwrap();
    let retriever = Arc::new(built_retriever(dir.path()).await);
    let data = AppData::reference();
    let risk_levels = data.risk_distribution.len();
    let copilot = Copilot::new(Arc::new(data), retriever, None, 5000);

    let answer = copilot.ask(question).await;
    assert!(answer.validate().is_ok());

    let chart = answer.chart.expect("risk question should include a chart");
    assert_eq!(chart.kind, ChartKind::Donut);
    assert!(chart.x_label.is_none());
    assert!(chart.y_label.is_none());
    assert_eq!(chart.series[0].data.len(), risk_levels);
    assert_eq!(risk_levels, 4);
}

/// A planner-shaped top-N plan over feature importance returns exactly
/// the requested rows, ordered by the global maximum
#[test]
fn test_plan_execution_top_n_end_to_end() {
    let plan = parse_plan(
        r#"{
            "intent": "drivers",
            "operations": [{
                "op": "topN",
                "from": "feature_importance",
                "select": ["name", "importance"],
                "orderBy": { "field": "importance", "dir": "desc" },
                "limit": 3
            }],
            "chart": {
                "kind": "horizontal-bar",
                "title": "Top 3 Churn Drivers",
                "xField": "name",
                "yField": "importance"
            },
            "narrativeFocus": ["top driver"],
            "citations": ["ModelingDeepDive: Feature Importance"]
        }"#,
    )
    .unwrap();

    let data = AppData::reference();
    let result = execute_plan(&plan, &data);

    assert_eq!(result.table.len(), 3);
    let global_max = data
        .feature_importance
        .iter()
        .map(|f| f.importance)
        .fold(f64::MIN, f64::max);
    assert_eq!(
        result.table[0].get("importance").unwrap().as_f64().unwrap(),
        global_max
    );

    // Labels synthesized despite being absent from the plan
    assert!(result.chart.x_label.is_some());
    assert!(result.chart.y_label.is_some());
}

/// The orchestrator boundary: every input resolves to a schema-valid
/// answer, with or without a corpus on disk
#[tokio::test]
async fn test_ask_always_returns_valid_answer() {
    let dir = tempdir().unwrap();
    let retriever = Arc::new(built_retriever(dir.path()).await);
    let copilot = Copilot::new(Arc::new(AppData::reference()), retriever, None, 5000);

    let questions = [
        "",
        "   \t  ",
        "What is ARPU?",
        "Show me customer risk distribution",
        "Compare ROI across all strategies",
        "Show ARPU impact of 2% churn reduction",
        "What is CLTV and why does it matter for retention budgets?",
        "month-to-month churn",
        "Tell me everything about telco economics",
        "🤖 unicode works too?",
    ];

    for question in questions {
        let answer = copilot.ask(question).await;
        assert!(
            answer.validate().is_ok(),
            "contract violated for question {question:?}"
        );
        assert!(answer.text.trim().len() >= 20);
        assert!(!answer.citations.is_empty());
    }
}

/// Missing corpus degrades to a normal-looking answer, never an error
#[tokio::test]
async fn test_missing_corpus_degrades_gracefully() {
    let retriever = Arc::new(Retriever::new(
        "/nonexistent/corpus.json",
        Arc::new(MockEmbedder::default()),
        6,
        0.5,
    ));
    let copilot = Copilot::new(Arc::new(AppData::reference()), retriever, None, 5000);

    let answer = copilot.ask("Explain churn economics").await;
    assert!(answer.validate().is_ok());

    // Numeric questions still work from the dataset alone
    let answer = copilot.ask("Compare ROI across all strategies").await;
    assert!(answer.validate().is_ok());
    assert!(answer.chart.is_some());
}
