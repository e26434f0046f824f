use serde::{Deserialize, Serialize};

/// Part of a classification that did not reach its confidence bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewArea {
    Ncm,
    Cest,
    Reconciliation,
    DeterminationQuality,
}

impl ReviewArea {
    fn suggested_action(self) -> &'static str {
        match self {
            ReviewArea::Ncm => "Check the NCM against the TIPI table for the product's chapter and heading",
            ReviewArea::Cest => "Confirm the CEST segment in ICMS agreement 142/2018 for the chosen NCM",
            ReviewArea::Reconciliation => "Verify that the NCM and CEST pair is compatible",
            ReviewArea::DeterminationQuality => {
                "Complete the product description (form, concentration, unit, manufacturer)"
            }
        }
    }
}

/// One reason a product was routed to manual review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewFinding {
    pub area: ReviewArea,
    pub detail: String,
}

impl ReviewFinding {
    /// A score that missed its threshold.
    pub fn below(area: ReviewArea, label: &str, score: f64, threshold: f64) -> Self {
        Self {
            area,
            detail: format!("{label} {score:.2} below threshold {threshold:.2}"),
        }
    }

    pub fn flagged(area: ReviewArea, detail: impl Into<String>) -> Self {
        Self {
            area,
            detail: detail.into(),
        }
    }
}

/// Context handed to the human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewContext {
    pub reason: String,
    pub low_confidence_areas: Vec<ReviewArea>,
    pub suggested_actions: Vec<String>,
}

const MAX_ACTIONS: usize = 3;

impl ReviewContext {
    pub fn from_findings(findings: &[ReviewFinding]) -> Self {
        if findings.is_empty() {
            return Self {
                reason: "routed to manual review without a failing score".to_string(),
                low_confidence_areas: Vec::new(),
                suggested_actions: vec![ReviewArea::Ncm.suggested_action().to_string()],
            };
        }

        let reason = findings
            .iter()
            .map(|f| f.detail.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        let mut areas: Vec<ReviewArea> = Vec::new();
        for finding in findings {
            if !areas.contains(&finding.area) {
                areas.push(finding.area);
            }
        }

        let suggested_actions = areas
            .iter()
            .take(MAX_ACTIONS)
            .map(|a| a.suggested_action().to_string())
            .collect();

        Self {
            reason,
            low_confidence_areas: areas,
            suggested_actions,
        }
    }
}

/// Compact record of a high-quality determination, eligible for promotion
/// into the curated reference set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenSetCandidate {
    pub description: String,
    pub ncm: String,
    pub cest: Option<String>,
    pub rationale: String,
    pub quality_score: f64,
}
