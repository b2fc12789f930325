//! In-memory application dataset consumed by the tools and the executor.
//!
//! Loaded once from JSON fixtures and injected into the copilot context;
//! read-only from a request's point of view. `AppData::reference()`
//! carries the demo telco book used by tests and the CLI dry-run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevel {
    pub level: String,
    pub customers: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub importance: f64,
    #[serde(default)]
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiStrategy {
    pub strategy: String,
    pub roi_pct: f64,
    pub savings: f64,
    pub investment: f64,
    pub irr: f64,
}

impl RoiStrategy {
    /// Primary decision metric for "optimal strategy" questions.
    #[must_use]
    pub fn net_benefit(&self) -> f64 {
        self.savings - self.investment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub tenure_band: String,
    pub contract_group: String,
    pub value_tier: String,
    pub customers: u64,
    pub churn_probability: f64,
    pub risk_level: String,
    #[serde(default)]
    pub avg_ltv: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Financials {
    /// Average monthly revenue per subscriber, dollars.
    pub arpu: f64,
    /// Monthly churn rate as a fraction.
    pub churn: f64,
    pub gross_margin: f64,
    pub arpu_elasticity: f64,
}

impl Default for Financials {
    fn default() -> Self {
        Self {
            arpu: 65.0,
            churn: 0.02,
            gross_margin: 0.62,
            arpu_elasticity: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppData {
    pub risk_distribution: Vec<RiskLevel>,
    pub feature_importance: Vec<Feature>,
    pub roi_by_strategy: Vec<RoiStrategy>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub financials: Financials,
}

impl AppData {
    /// Load the dataset from a directory of JSON fixtures.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<String> {
            let path = dir.join(name);
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        };

        Ok(Self {
            risk_distribution: serde_json::from_str(&read("risk_distribution.json")?)
                .context("parsing risk_distribution.json")?,
            feature_importance: serde_json::from_str(&read("feature_importance.json")?)
                .context("parsing feature_importance.json")?,
            roi_by_strategy: serde_json::from_str(&read("roi_by_strategy.json")?)
                .context("parsing roi_by_strategy.json")?,
            segments: match read("segments.json") {
                Ok(raw) => serde_json::from_str(&raw).context("parsing segments.json")?,
                Err(_) => Vec::new(),
            },
            financials: match read("financials.json") {
                Ok(raw) => serde_json::from_str(&raw).context("parsing financials.json")?,
                Err(_) => Financials::default(),
            },
        })
    }

    /// Reference dataset mirroring the demo telco book: 47.3M customers
    /// across four risk tiers, ten ML churn drivers, three retention
    /// strategies.
    #[must_use]
    pub fn reference() -> Self {
        let feature = |name: &str, importance: f64, interpretation: &str| Feature {
            name: name.to_string(),
            importance,
            interpretation: interpretation.to_string(),
        };

        Self {
            risk_distribution: vec![
                RiskLevel {
                    level: "Low".to_string(),
                    customers: 7_095_000,
                    percentage: 15.0,
                },
                RiskLevel {
                    level: "Medium".to_string(),
                    customers: 22_231_000,
                    percentage: 47.0,
                },
                RiskLevel {
                    level: "High".to_string(),
                    customers: 12_298_000,
                    percentage: 26.0,
                },
                RiskLevel {
                    level: "Very High".to_string(),
                    customers: 5_676_000,
                    percentage: 12.0,
                },
            ],
            feature_importance: vec![
                feature(
                    "Contract Type",
                    0.31,
                    "Month-to-month customers churn 3-5x more than contract customers.",
                ),
                feature(
                    "Tenure",
                    0.24,
                    "Churn risk is concentrated in the first three months.",
                ),
                feature(
                    "Monthly Charges",
                    0.18,
                    "Higher bills raise churn propensity at every tenure band.",
                ),
                feature(
                    "Internet Service",
                    0.09,
                    "Fiber customers show elevated churn versus DSL.",
                ),
                feature(
                    "Payment Method",
                    0.07,
                    "Electronic check payers churn above average.",
                ),
                feature(
                    "Tech Support",
                    0.05,
                    "Lack of support contact correlates with churn.",
                ),
                feature(
                    "Online Security",
                    0.03,
                    "Security add-on subscribers retain better.",
                ),
                feature(
                    "Paperless Billing",
                    0.02,
                    "Weak signal tied to digital-first cohorts.",
                ),
                feature("Senior Citizen", 0.006, "Slightly elevated churn."),
                feature("Dependents", 0.004, "Households with dependents retain better."),
            ],
            roi_by_strategy: vec![
                RoiStrategy {
                    strategy: "Budget Optimization".to_string(),
                    roi_pct: 160.0,
                    savings: 571_000_000.0,
                    investment: 220_000_000.0,
                    irr: 96.0,
                },
                RoiStrategy {
                    strategy: "Contract Conversion".to_string(),
                    roi_pct: 112.0,
                    savings: 223_000_000.0,
                    investment: 199_000_000.0,
                    irr: 67.0,
                },
                RoiStrategy {
                    strategy: "Onboarding Excellence".to_string(),
                    roi_pct: 96.0,
                    savings: 98_000_000.0,
                    investment: 50_000_000.0,
                    irr: 58.0,
                },
            ],
            segments: vec![
                Segment {
                    tenure_band: "0-3m".to_string(),
                    contract_group: "M2M".to_string(),
                    value_tier: "Low".to_string(),
                    customers: 2_100_000,
                    churn_probability: 0.42,
                    risk_level: "Very High".to_string(),
                    avg_ltv: 410.0,
                },
                Segment {
                    tenure_band: "0-3m".to_string(),
                    contract_group: "M2M".to_string(),
                    value_tier: "High".to_string(),
                    customers: 1_400_000,
                    churn_probability: 0.35,
                    risk_level: "High".to_string(),
                    avg_ltv: 1_230.0,
                },
                Segment {
                    tenure_band: "4-12m".to_string(),
                    contract_group: "1yr".to_string(),
                    value_tier: "Med".to_string(),
                    customers: 5_800_000,
                    churn_probability: 0.14,
                    risk_level: "Medium".to_string(),
                    avg_ltv: 1_780.0,
                },
                Segment {
                    tenure_band: "25-48m".to_string(),
                    contract_group: "2yr".to_string(),
                    value_tier: "High".to_string(),
                    customers: 9_300_000,
                    churn_probability: 0.04,
                    risk_level: "Low".to_string(),
                    avg_ltv: 3_940.0,
                },
            ],
            financials: Financials::default(),
        }
    }
}
