use std::sync::Arc;

use async_trait::async_trait;

use ncmflow::agents::{
    AgentContext, CestClassifier, CestResult, EnrichmentAgent, EnrichmentResult, NcmClassifier,
    NcmResult, Reconciler, ReconciliationResult,
};
use ncmflow::error::AgentError;
use ncmflow::router::StrategyRouter;
use ncmflow::{AgentSet, ProductData, WorkflowConfig, WorkflowManager, WorkflowStatus, WorkflowType};

/// Fixed-answer agents; enrichment fails for descriptions containing `fail_on`.
struct StubAgents {
    ncm_confidence: f64,
    cest_confidence: f64,
    fail_on: Option<&'static str>,
}

#[async_trait]
impl EnrichmentAgent for StubAgents {
    async fn enrich(
        &self,
        description: &str,
        _context: &AgentContext,
    ) -> Result<EnrichmentResult, AgentError> {
        if self.fail_on.is_some_and(|marker| description.contains(marker)) {
            return Err(AgentError::Unavailable("enrichment backend down".into()));
        }
        Ok(EnrichmentResult::new(description.to_uppercase(), 0.8))
    }
}

#[async_trait]
impl NcmClassifier for StubAgents {
    async fn classify_ncm(
        &self,
        _description: &str,
        existing_ncm: Option<&str>,
        _context: &AgentContext,
    ) -> Result<NcmResult, AgentError> {
        let code = existing_ncm.unwrap_or("30049069");
        Ok(NcmResult::single(code, self.ncm_confidence, "stub"))
    }
}

#[async_trait]
impl CestClassifier for StubAgents {
    async fn classify_cest(
        &self,
        _description: &str,
        _ncm_code: &str,
        _existing_cest: Option<&str>,
        _context: &AgentContext,
    ) -> Result<CestResult, AgentError> {
        Ok(CestResult {
            code: Some("1300100".into()),
            confidence: self.cest_confidence,
            justification: "stub".into(),
        })
    }
}

#[async_trait]
impl Reconciler for StubAgents {
    async fn reconcile(
        &self,
        ncm: &NcmResult,
        cest: Option<&CestResult>,
        _context: &AgentContext,
    ) -> Result<ReconciliationResult, AgentError> {
        let confidence = match cest {
            Some(c) => (ncm.confidence + c.confidence) / 2.0,
            None => ncm.confidence,
        };
        Ok(ReconciliationResult {
            final_ncm: ncm.code.clone(),
            final_cest: cest.and_then(|c| c.code.clone()),
            confidence,
            requires_review: false,
        })
    }
}

fn stub_manager(ncm_confidence: f64, cest_confidence: f64, fail_on: Option<&'static str>) -> WorkflowManager {
    let stub = Arc::new(StubAgents {
        ncm_confidence,
        cest_confidence,
        fail_on,
    });
    let agents = AgentSet::new(stub.clone(), stub.clone(), stub.clone(), stub);
    WorkflowManager::new(WorkflowConfig::default(), agents).unwrap()
}

fn catalog_manager() -> WorkflowManager {
    WorkflowManager::new(WorkflowConfig::default(), AgentSet::catalog()).unwrap()
}

fn dipirona() -> ProductData {
    ProductData::new("DIPIRONA SODICA 500MG COMPRIMIDO").with_ncm("30049069")
}

// --- strategy selection ---

#[test]
fn invalid_ncm_selects_determination() {
    let m = catalog_manager();
    for ncm in ["3004906", "300490690", "00490690", "30A49069"] {
        let product = ProductData::new("DIPIRONA SODICA 500MG COMPRIMIDO").with_ncm(ncm);
        assert_eq!(m.determine_workflow_type(&product), WorkflowType::Determination, "{ncm}");
    }
}

#[test]
fn strong_description_selects_confirmation() {
    let m = catalog_manager();
    let product = dipirona();
    assert!((StrategyRouter::description_quality(&product) - 0.8).abs() < 1e-9);
    assert_eq!(m.determine_workflow_type(&product), WorkflowType::Confirmation);
    for _ in 0..5 {
        assert_eq!(m.determine_workflow_type(&product), WorkflowType::Confirmation);
    }
}

// --- flow behavior ---

#[tokio::test]
async fn ncm_validation_threshold_boundary() {
    let below = stub_manager(0.69, 0.9, None)
        .process_product(dipirona(), "tenant", None)
        .await;
    assert!(below.requires_review);
    assert_eq!(below.status, WorkflowStatus::ManualReview);

    let at = stub_manager(0.70, 0.9, None)
        .process_product(dipirona(), "tenant", None)
        .await;
    assert!(!at.requires_review);
    assert_eq!(at.status, WorkflowStatus::Confirmed);
}

#[tokio::test]
async fn dipirona_with_weak_cest_needs_review() {
    let result = stub_manager(0.85, 0.3, None)
        .process_product(dipirona(), "tenant", None)
        .await;
    assert_eq!(result.workflow_type, WorkflowType::Confirmation);
    assert_eq!(result.status, WorkflowStatus::ManualReview);
    let review = result.final_result.review.unwrap();
    assert!(review.reason.contains("CEST"));
    assert!(!review.suggested_actions.is_empty());
}

#[tokio::test]
async fn audit_trail_covers_every_node() {
    let result = stub_manager(0.9, 0.9, None)
        .process_product(dipirona(), "tenant", None)
        .await;
    // initialized, enrichment, ncm, cest, reconciliation, confirmed
    assert!(result.audit_trail.len() >= 6);
    assert!(
        result
            .audit_trail
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    );
}

#[tokio::test]
async fn averaging_reconciliation_is_the_mean() {
    let result = stub_manager(0.8, 0.6, None)
        .process_product(dipirona(), "tenant", None)
        .await;
    let fr = &result.final_result;
    let ncm = fr.ncm_confidence.unwrap();
    let cest = fr.cest_confidence.unwrap();
    assert!((fr.reconciliation_confidence.unwrap() - (ncm + cest) / 2.0).abs() < 1e-9);
    for value in [ncm, cest, result.confidence] {
        assert!((0.0..=1.0).contains(&value));
    }
}

#[tokio::test]
async fn batch_failure_stays_at_its_index() {
    let m = stub_manager(0.9, 0.9, Some("BROKEN"));
    let products: Vec<_> = (0..7)
        .map(|i| {
            if i == 4 {
                ProductData::new("BROKEN PRODUCT")
            } else {
                ProductData::new(format!("PARACETAMOL {i}00MG"))
            }
        })
        .collect();

    let results = m.process_batch(products, "tenant", Some(3)).await;
    assert_eq!(results.len(), 7);
    for (i, result) in results.iter().enumerate() {
        if i == 4 {
            assert_eq!(result.status, WorkflowStatus::Error);
            assert_eq!(result.confidence, 0.0);
            assert!(result.error.as_deref().unwrap().contains("enrichment backend down"));
        } else {
            assert!(result.is_success(), "item {i} was {}", result.status);
        }
    }
}

// --- built-in catalog agents ---

#[tokio::test]
async fn catalog_confirms_dipirona() {
    let result = catalog_manager()
        .process_product(dipirona(), "tenant", None)
        .await;
    assert_eq!(result.status, WorkflowStatus::Confirmed);
    assert_eq!(result.final_result.ncm.as_deref(), Some("30049069"));
    assert_eq!(result.final_result.cest.as_deref(), Some("1300100"));
}

#[tokio::test]
async fn catalog_determines_mineral_water() {
    let result = catalog_manager()
        .process_product(ProductData::new("AGUA MINERAL SEM GAS 500ML"), "tenant", None)
        .await;
    assert_eq!(result.workflow_type, WorkflowType::Determination);
    assert_eq!(result.status, WorkflowStatus::Determined);
    assert_eq!(result.final_result.ncm.as_deref(), Some("22011000"));
    assert_eq!(result.final_result.cest.as_deref(), Some("0300100"));
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert!(result.final_result.golden_set_candidate);
}

#[tokio::test]
async fn catalog_sends_unknown_products_to_review() {
    let result = catalog_manager()
        .process_product(ProductData::new("PRODUTOS DIVERSOS ..."), "tenant", None)
        .await;
    assert_eq!(result.status, WorkflowStatus::ManualReview);
    assert!(result.requires_review);
}
