//! Contract between the workflow engine and the classification agents.
//!
//! Every stage of a flow calls exactly one of the four agent kinds below.
//! Implementations are injected once, through [`AgentSet`], when the
//! [`WorkflowManager`](crate::orchestrator::WorkflowManager) is built.

mod catalog;
mod heuristic;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::state_machine::{PriorAttempt, WorkflowState, WorkflowStatus};

pub use heuristic::{AveragingReconciler, CatalogCestClassifier, CatalogEnricher, CatalogNcmClassifier};

/// A reference product resembling the one being classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarProduct {
    pub description: String,
    pub ncm: String,
    #[serde(default)]
    pub cest: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub enriched_description: String,
    pub confidence: f64,
    #[serde(default)]
    pub similar_products: Vec<SimilarProduct>,
    #[serde(default)]
    pub regulatory_hints: Vec<String>,
}

impl EnrichmentResult {
    pub fn new(enriched_description: impl Into<String>, confidence: f64) -> Self {
        Self {
            enriched_description: enriched_description.into(),
            confidence,
            similar_products: Vec::new(),
            regulatory_hints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcmCandidate {
    pub code: String,
    pub confidence: f64,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcmResult {
    pub code: String,
    pub confidence: f64,
    pub justification: String,
    /// Ranked best-first once normalized.
    #[serde(default)]
    pub candidates: Vec<NcmCandidate>,
}

impl NcmResult {
    pub fn single(code: impl Into<String>, confidence: f64, justification: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            confidence,
            justification: justification.into(),
            candidates: Vec::new(),
        }
    }

    /// Builds a result from a candidate list; the best candidate becomes the chosen code.
    pub fn from_candidates(mut candidates: Vec<NcmCandidate>) -> Option<Self> {
        rank_candidates(&mut candidates);
        let top = candidates.first()?.clone();
        Some(Self {
            code: top.code,
            confidence: top.confidence,
            justification: top.justification,
            candidates,
        })
    }

    /// Confidence the agent assigns to `code`, either as its pick or as a candidate.
    pub fn confidence_for(&self, code: &str) -> Option<f64> {
        if self.code == code {
            return Some(self.confidence);
        }
        self.candidates
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.confidence)
    }

    /// Makes the best-ranked candidate the chosen code.
    pub fn with_top_choice(mut self) -> Self {
        if let Some(top) = self.candidates.first() {
            if top.code != self.code {
                self.code = top.code.clone();
                self.confidence = top.confidence;
                self.justification = top.justification.clone();
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CestResult {
    /// `None` when no CEST applies to the product.
    pub code: Option<String>,
    pub confidence: f64,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub final_ncm: String,
    pub final_cest: Option<String>,
    pub confidence: f64,
    pub requires_review: bool,
}

/// Read-only view of the workflow handed to agents on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentContext {
    pub tenant_id: String,
    pub session_id: String,
    pub product_id: String,
    pub stage: Option<WorkflowStatus>,
    pub barcode: Option<String>,
    pub internal_code: Option<String>,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub similar_products: Vec<SimilarProduct>,
    pub regulatory_hints: Vec<String>,
    pub candidates: Vec<NcmCandidate>,
    pub prior_attempt: Option<PriorAttempt>,
}

impl AgentContext {
    pub fn for_stage(state: &WorkflowState, stage: WorkflowStatus) -> Self {
        let (similar_products, regulatory_hints) = match &state.enrichment {
            Some(e) => (e.similar_products.clone(), e.regulatory_hints.clone()),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            tenant_id: state.tenant_id.clone(),
            session_id: state.session_id.clone(),
            product_id: state.product_id.clone(),
            stage: Some(stage),
            barcode: state.product.barcode.clone(),
            internal_code: state.product.internal_code.clone(),
            manufacturer: state.product.manufacturer.clone(),
            brand: state.product.brand.clone(),
            similar_products,
            regulatory_hints,
            candidates: state
                .ncm
                .as_ref()
                .map(|n| n.candidates.clone())
                .unwrap_or_default(),
            prior_attempt: state.prior_attempt.clone(),
        }
    }
}

#[async_trait]
pub trait EnrichmentAgent: Send + Sync {
    async fn enrich(
        &self,
        description: &str,
        context: &AgentContext,
    ) -> Result<EnrichmentResult, AgentError>;
}

#[async_trait]
pub trait NcmClassifier: Send + Sync {
    async fn classify_ncm(
        &self,
        description: &str,
        existing_ncm: Option<&str>,
        context: &AgentContext,
    ) -> Result<NcmResult, AgentError>;
}

#[async_trait]
pub trait CestClassifier: Send + Sync {
    async fn classify_cest(
        &self,
        description: &str,
        ncm_code: &str,
        existing_cest: Option<&str>,
        context: &AgentContext,
    ) -> Result<CestResult, AgentError>;
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(
        &self,
        ncm: &NcmResult,
        cest: Option<&CestResult>,
        context: &AgentContext,
    ) -> Result<ReconciliationResult, AgentError>;
}

/// One implementation of every agent kind. All four are required, so a
/// missing provider is a construction-time error rather than a call-time one.
#[derive(Clone)]
pub struct AgentSet {
    pub enrichment: Arc<dyn EnrichmentAgent>,
    pub ncm: Arc<dyn NcmClassifier>,
    pub cest: Arc<dyn CestClassifier>,
    pub reconciler: Arc<dyn Reconciler>,
}

impl AgentSet {
    pub fn new(
        enrichment: Arc<dyn EnrichmentAgent>,
        ncm: Arc<dyn NcmClassifier>,
        cest: Arc<dyn CestClassifier>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            enrichment,
            ncm,
            cest,
            reconciler,
        }
    }

    /// Agents backed by the built-in reference catalog.
    pub fn catalog() -> Self {
        Self::new(
            Arc::new(CatalogEnricher::default()),
            Arc::new(CatalogNcmClassifier::default()),
            Arc::new(CatalogCestClassifier::default()),
            Arc::new(AveragingReconciler),
        )
    }
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSet").finish_non_exhaustive()
    }
}

/// Rejects non-finite confidences and clamps the rest into [0, 1].
pub(crate) fn checked_confidence(value: f64, what: &str) -> Result<f64, AgentError> {
    if !value.is_finite() {
        return Err(AgentError::MalformedResponse(format!(
            "{what} confidence is not a number"
        )));
    }
    Ok(value.clamp(0.0, 1.0))
}

fn rank_candidates(candidates: &mut [NcmCandidate]) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

impl EnrichmentResult {
    pub(crate) fn normalized(mut self) -> Result<Self, AgentError> {
        if self.enriched_description.trim().is_empty() {
            return Err(AgentError::MalformedResponse(
                "empty enriched description".into(),
            ));
        }
        self.confidence = checked_confidence(self.confidence, "enrichment")?;
        for similar in &mut self.similar_products {
            similar.similarity = checked_confidence(similar.similarity, "similarity")?;
        }
        Ok(self)
    }
}

impl NcmResult {
    /// Clamps confidences, ranks candidates best-first and makes sure the
    /// chosen code appears among them.
    pub(crate) fn normalized(mut self) -> Result<Self, AgentError> {
        if self.code.trim().is_empty() {
            return Err(AgentError::MalformedResponse("empty NCM code".into()));
        }
        self.confidence = checked_confidence(self.confidence, "NCM")?;
        for candidate in &mut self.candidates {
            candidate.confidence = checked_confidence(candidate.confidence, "NCM candidate")?;
        }
        if !self.candidates.iter().any(|c| c.code == self.code) {
            self.candidates.push(NcmCandidate {
                code: self.code.clone(),
                confidence: self.confidence,
                justification: self.justification.clone(),
            });
        }
        rank_candidates(&mut self.candidates);
        Ok(self)
    }
}

impl CestResult {
    pub(crate) fn normalized(mut self) -> Result<Self, AgentError> {
        self.confidence = checked_confidence(self.confidence, "CEST")?;
        self.code = self.code.filter(|c| !c.trim().is_empty());
        Ok(self)
    }
}

impl ReconciliationResult {
    pub(crate) fn normalized(mut self) -> Result<Self, AgentError> {
        if self.final_ncm.trim().is_empty() {
            return Err(AgentError::MalformedResponse("empty final NCM".into()));
        }
        self.confidence = checked_confidence(self.confidence, "reconciliation")?;
        Ok(self)
    }
}
