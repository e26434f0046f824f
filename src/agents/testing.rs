//! Scripted agents for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    AgentContext, AgentSet, CestClassifier, CestResult, EnrichmentAgent, EnrichmentResult,
    NcmCandidate, NcmClassifier, NcmResult, Reconciler, ReconciliationResult,
};
use crate::error::AgentError;

#[derive(Clone)]
pub(crate) struct ScriptedAgents {
    pub enrichment: EnrichmentResult,
    pub fail_enrichment_on: Option<&'static str>,
    pub panic_enrichment_on: Option<&'static str>,
    /// Panics on the first enrichment call only.
    pub panic_first_enrichment: bool,
    pub ncm: NcmResult,
    /// Returned instead of `ncm` when the context already carries candidates.
    pub refined_ncm: Option<NcmResult>,
    pub fail_ncm: bool,
    pub cest: CestResult,
    pub hang_cest: bool,
    /// Fixed reconciliation confidence; `None` averages NCM and CEST.
    pub reconcile_confidence: Option<f64>,
    pub reconcile_requires_review: bool,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptedAgents {
    pub fn new(ncm_code: &str, ncm_confidence: f64, cest_confidence: f64) -> Self {
        Self {
            enrichment: EnrichmentResult::new("ENRICHED DESCRIPTION", 0.8),
            fail_enrichment_on: None,
            panic_enrichment_on: None,
            panic_first_enrichment: false,
            ncm: NcmResult::single(ncm_code, ncm_confidence, "scripted"),
            refined_ncm: None,
            fail_ncm: false,
            cest: CestResult {
                code: Some("1300100".into()),
                confidence: cest_confidence,
                justification: "scripted".into(),
            },
            hang_cest: false,
            reconcile_confidence: None,
            reconcile_requires_review: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_candidates(mut self, candidates: &[(&str, f64)]) -> Self {
        let candidates = candidates
            .iter()
            .map(|(code, confidence)| NcmCandidate {
                code: code.to_string(),
                confidence: *confidence,
                justification: "scripted".into(),
            })
            .collect();
        self.ncm = NcmResult::from_candidates(candidates).expect("at least one candidate");
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn into_set(self) -> (AgentSet, Arc<Mutex<Vec<&'static str>>>) {
        let calls = self.calls.clone();
        let shared = Arc::new(self);
        let set = AgentSet::new(shared.clone(), shared.clone(), shared.clone(), shared);
        (set, calls)
    }
}

#[async_trait]
impl EnrichmentAgent for ScriptedAgents {
    async fn enrich(
        &self,
        description: &str,
        _context: &AgentContext,
    ) -> Result<EnrichmentResult, AgentError> {
        self.log("enrich");
        if self.panic_first_enrichment && self.calls().iter().filter(|c| **c == "enrich").count() == 1 {
            panic!("scripted panic on first enrichment");
        }
        if let Some(marker) = self.panic_enrichment_on {
            if description.contains(marker) {
                panic!("scripted panic for {description}");
            }
        }
        if let Some(marker) = self.fail_enrichment_on {
            if description.contains(marker) {
                return Err(AgentError::Unavailable("scripted enrichment failure".into()));
            }
        }
        Ok(self.enrichment.clone())
    }
}

#[async_trait]
impl NcmClassifier for ScriptedAgents {
    async fn classify_ncm(
        &self,
        _description: &str,
        _existing_ncm: Option<&str>,
        context: &AgentContext,
    ) -> Result<NcmResult, AgentError> {
        self.log("classify_ncm");
        if self.fail_ncm {
            return Err(AgentError::Failed("scripted NCM failure".into()));
        }
        match (&self.refined_ncm, context.candidates.is_empty()) {
            (Some(refined), false) => Ok(refined.clone()),
            _ => Ok(self.ncm.clone()),
        }
    }
}

#[async_trait]
impl CestClassifier for ScriptedAgents {
    async fn classify_cest(
        &self,
        _description: &str,
        _ncm_code: &str,
        _existing_cest: Option<&str>,
        _context: &AgentContext,
    ) -> Result<CestResult, AgentError> {
        self.log("classify_cest");
        if self.hang_cest {
            std::future::pending::<()>().await;
        }
        Ok(self.cest.clone())
    }
}

#[async_trait]
impl Reconciler for ScriptedAgents {
    async fn reconcile(
        &self,
        ncm: &NcmResult,
        cest: Option<&CestResult>,
        _context: &AgentContext,
    ) -> Result<ReconciliationResult, AgentError> {
        self.log("reconcile");
        let confidence = self.reconcile_confidence.unwrap_or_else(|| match cest {
            Some(c) => (ncm.confidence + c.confidence) / 2.0,
            None => ncm.confidence,
        });
        Ok(ReconciliationResult {
            final_ncm: ncm.code.clone(),
            final_cest: cest.and_then(|c| c.code.clone()),
            confidence,
            requires_review: self.reconcile_requires_review,
        })
    }
}
