use async_trait::async_trait;

use super::catalog::{
    ABBREVIATIONS, NCM_CATALOG, UNCLASSIFIED_NCM, cest_rule_for, chapter_hint, entry_for,
    token_matches,
};
use super::{
    AgentContext, CestClassifier, CestResult, EnrichmentAgent, EnrichmentResult, NcmCandidate,
    NcmClassifier, NcmResult, Reconciler, ReconciliationResult, SimilarProduct,
};
use crate::error::AgentError;
use crate::text::{digits, split_measure, tokens};

// Keyword score at which a catalog match counts as fully certain.
const SCORE_SATURATION: u32 = 20;
const MAX_CONFIDENCE: f64 = 0.95;

fn score_to_confidence(score: u32) -> f64 {
    f64::from(score.min(SCORE_SATURATION)) / f64::from(SCORE_SATURATION) * MAX_CONFIDENCE
}

/// Normalizes descriptions and looks up similar reference products.
#[derive(Debug, Clone)]
pub struct CatalogEnricher {
    /// Minimum share of an entry's keyword weight for it to count as similar.
    pub min_similarity: f64,
    pub max_similar: usize,
}

impl Default for CatalogEnricher {
    fn default() -> Self {
        Self {
            min_similarity: 0.25,
            max_similar: 3,
        }
    }
}

impl CatalogEnricher {
    fn expand(token: &str) -> &str {
        ABBREVIATIONS
            .iter()
            .find(|(abbr, _)| *abbr == token)
            .map(|(_, full)| *full)
            .unwrap_or(token)
    }

    fn is_recognized(token: &str) -> bool {
        split_measure(token).is_some()
            || NCM_CATALOG
                .iter()
                .any(|e| e.keywords.iter().any(|(kw, _)| token_matches(token, kw)))
    }

    fn similar_products(&self, toks: &[String]) -> Vec<SimilarProduct> {
        let mut similar: Vec<SimilarProduct> = NCM_CATALOG
            .iter()
            .filter_map(|entry| {
                let similarity = f64::from(entry.score(toks)) / f64::from(entry.total_weight());
                (similarity >= self.min_similarity).then(|| SimilarProduct {
                    description: entry.description.to_string(),
                    ncm: entry.ncm.to_string(),
                    cest: cest_rule_for(entry.ncm).map(|r| r.cest.to_string()),
                    similarity,
                })
            })
            .collect();
        similar.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        similar.truncate(self.max_similar);
        similar
    }
}

#[async_trait]
impl EnrichmentAgent for CatalogEnricher {
    async fn enrich(
        &self,
        description: &str,
        context: &AgentContext,
    ) -> Result<EnrichmentResult, AgentError> {
        let toks: Vec<String> = tokens(description)
            .iter()
            .map(|t| Self::expand(t).to_string())
            .collect();
        if toks.is_empty() {
            return Err(AgentError::Failed("description has no usable tokens".into()));
        }

        let mut enriched = toks.join(" ").to_uppercase();
        let mut has_origin = false;
        for origin in [&context.manufacturer, &context.brand].into_iter().flatten() {
            has_origin = true;
            let upper = origin.to_uppercase();
            if !enriched.contains(&upper) {
                enriched.push_str(" - ");
                enriched.push_str(&upper);
            }
        }

        let recognized = toks.iter().filter(|t| Self::is_recognized(t)).count();
        let mut confidence = 0.4 + 0.5 * recognized as f64 / toks.len() as f64;
        if has_origin {
            confidence += 0.1;
        }

        let similar_products = self.similar_products(&toks);
        let mut regulatory_hints: Vec<String> = Vec::new();
        for similar in &similar_products {
            if let Some(hint) = chapter_hint(&similar.ncm[..2]) {
                if !regulatory_hints.iter().any(|h| h == hint) {
                    regulatory_hints.push(hint.to_string());
                }
            }
        }

        Ok(EnrichmentResult {
            enriched_description: enriched,
            confidence: confidence.min(MAX_CONFIDENCE),
            similar_products,
            regulatory_hints,
        })
    }
}

/// Weighted keyword scoring against the reference catalog.
#[derive(Debug, Clone)]
pub struct CatalogNcmClassifier {
    pub max_candidates: usize,
}

impl Default for CatalogNcmClassifier {
    fn default() -> Self {
        Self { max_candidates: 5 }
    }
}

impl CatalogNcmClassifier {
    // Plausibility of an informed code the keywords did not surface, judged by
    // how much of the hierarchy it shares with the best match.
    fn informed_candidate(existing: &str, best: Option<&NcmCandidate>) -> NcmCandidate {
        let (confidence, justification) = match best {
            Some(top) if top.code[..4] == existing[..4] => (
                top.confidence * 0.8,
                format!("same heading as best match {}", top.code),
            ),
            Some(top) if top.code[..2] == existing[..2] => (
                top.confidence * 0.5,
                format!("same chapter as best match {}", top.code),
            ),
            _ if entry_for(existing).is_some() => {
                (0.1, "catalog entry exists but no keyword matched".to_string())
            }
            _ => (0.05, "no catalog evidence for informed code".to_string()),
        };
        NcmCandidate {
            code: existing.to_string(),
            confidence,
            justification,
        }
    }
}

#[async_trait]
impl NcmClassifier for CatalogNcmClassifier {
    async fn classify_ncm(
        &self,
        description: &str,
        existing_ncm: Option<&str>,
        context: &AgentContext,
    ) -> Result<NcmResult, AgentError> {
        let mut toks = tokens(description);
        for origin in [&context.manufacturer, &context.brand].into_iter().flatten() {
            toks.extend(tokens(origin));
        }

        // A refinement round narrows scoring to the codes already on the table.
        let restrict: Vec<&str> = context.candidates.iter().map(|c| c.code.as_str()).collect();

        let mut candidates: Vec<NcmCandidate> = NCM_CATALOG
            .iter()
            .filter(|e| restrict.is_empty() || restrict.contains(&e.ncm))
            .filter_map(|entry| {
                let score = entry.score(&toks);
                (score > 0).then(|| NcmCandidate {
                    code: entry.ncm.to_string(),
                    confidence: score_to_confidence(score),
                    justification: format!("{} (keyword score {score})", entry.description),
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(self.max_candidates);

        let existing = existing_ncm.map(digits).filter(|code| code.len() == 8);
        if let Some(code) = &existing {
            if !candidates.iter().any(|c| &c.code == code) {
                let informed = Self::informed_candidate(code, candidates.first());
                candidates.push(informed);
            }
        }

        match NcmResult::from_candidates(candidates) {
            Some(result) => Ok(result),
            None => Ok(NcmResult::single(
                UNCLASSIFIED_NCM,
                0.0,
                "no catalog entry matches the description",
            )),
        }
    }
}

/// Segment table lookup of the CEST for a given NCM.
#[derive(Debug, Clone, Default)]
pub struct CatalogCestClassifier;

#[async_trait]
impl CestClassifier for CatalogCestClassifier {
    async fn classify_cest(
        &self,
        _description: &str,
        ncm_code: &str,
        existing_cest: Option<&str>,
        _context: &AgentContext,
    ) -> Result<CestResult, AgentError> {
        let ncm = digits(ncm_code);
        if ncm.len() != 8 {
            return Err(AgentError::MalformedResponse(format!(
                "NCM {ncm_code} is not an 8-digit code"
            )));
        }
        let existing = existing_cest.map(digits).filter(|c| !c.is_empty());

        let result = match (cest_rule_for(&ncm), existing) {
            (Some(rule), Some(informed)) if informed == rule.cest => CestResult {
                code: Some(informed),
                confidence: 0.92,
                justification: format!("informed CEST matches segment rule: {}", rule.description),
            },
            (Some(rule), Some(informed)) => CestResult {
                code: Some(rule.cest.to_string()),
                confidence: 0.85,
                justification: format!(
                    "informed CEST {informed} differs from segment rule {} ({})",
                    rule.cest, rule.description
                ),
            },
            (Some(rule), None) => CestResult {
                code: Some(rule.cest.to_string()),
                confidence: 0.85,
                justification: format!("NCM prefix {} -> {}", rule.ncm_prefix, rule.description),
            },
            (None, Some(informed)) => CestResult {
                code: None,
                confidence: 0.6,
                justification: format!("NCM {ncm} is not listed in any CEST segment; informed {informed} is unsupported"),
            },
            (None, None) => CestResult {
                code: None,
                confidence: 0.9,
                justification: format!("NCM {ncm} is not subject to ICMS tax substitution"),
            },
        };
        Ok(result)
    }
}

/// Averages the NCM and CEST confidences and checks the pair against the
/// segment table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AveragingReconciler;

#[async_trait]
impl Reconciler for AveragingReconciler {
    async fn reconcile(
        &self,
        ncm: &NcmResult,
        cest: Option<&CestResult>,
        _context: &AgentContext,
    ) -> Result<ReconciliationResult, AgentError> {
        let final_ncm = digits(&ncm.code);
        let Some(cest) = cest else {
            return Ok(ReconciliationResult {
                final_ncm,
                final_cest: None,
                confidence: ncm.confidence,
                requires_review: false,
            });
        };

        let confidence = (ncm.confidence + cest.confidence) / 2.0;
        let compatible = match &cest.code {
            Some(code) => cest_rule_for(&final_ncm).is_some_and(|r| r.cest == digits(code)),
            None => true,
        };

        Ok(ReconciliationResult {
            final_ncm,
            final_cest: cest.code.clone(),
            confidence,
            requires_review: !compatible,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AgentContext {
        AgentContext::default()
    }

    #[tokio::test]
    async fn enricher_expands_abbreviations() {
        let result = CatalogEnricher::default()
            .enrich("Dipirona 500mg cx c/ 10 cpr", &ctx())
            .await
            .unwrap();
        assert_eq!(
            result.enriched_description,
            "DIPIRONA 500MG CAIXA C 10 COMPRIMIDO"
        );
        assert!(result.confidence > 0.4 && result.confidence <= 0.95);
        assert_eq!(result.similar_products[0].ncm, "30049069");
        assert!(result.regulatory_hints[0].contains("Chapter 30"));
    }

    #[tokio::test]
    async fn enricher_appends_manufacturer() {
        let context = AgentContext {
            manufacturer: Some("Medley".into()),
            ..Default::default()
        };
        let result = CatalogEnricher::default()
            .enrich("DIPIRONA 1G", &context)
            .await
            .unwrap();
        assert!(result.enriched_description.ends_with(" - MEDLEY"));
    }

    #[tokio::test]
    async fn enricher_rejects_blank_description() {
        let err = CatalogEnricher::default().enrich("  ...  ", &ctx()).await.unwrap_err();
        assert!(matches!(err, AgentError::Failed(_)));
    }

    #[tokio::test]
    async fn classifier_ranks_catalog_entries() {
        let result = CatalogNcmClassifier::default()
            .classify_ncm("DIPIRONA SODICA 500MG COMPRIMIDO", None, &ctx())
            .await
            .unwrap();
        assert_eq!(result.code, "30049069");
        assert!((result.confidence - 0.9025).abs() < 1e-9);
        assert!(result.candidates.len() >= 2);
        assert!(
            result
                .candidates
                .windows(2)
                .all(|w| w[0].confidence >= w[1].confidence)
        );
    }

    #[tokio::test]
    async fn classifier_scores_informed_code_by_hierarchy() {
        let result = CatalogNcmClassifier::default()
            .classify_ncm("CERVEJA PILSEN LATA 350ML", Some("2203.00.99"), &ctx())
            .await
            .unwrap();
        assert_eq!(result.code, "22030000");
        let informed = result.confidence_for("22030099").unwrap();
        assert!((informed - result.confidence * 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn classifier_without_match_is_unclassified() {
        let result = CatalogNcmClassifier::default()
            .classify_ncm("PRODUTO DIVERSO", None, &ctx())
            .await
            .unwrap();
        assert_eq!(result.code, UNCLASSIFIED_NCM);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn classifier_refinement_restricts_to_candidates() {
        let context = AgentContext {
            candidates: vec![NcmCandidate {
                code: "30049099".into(),
                confidence: 0.4,
                justification: String::new(),
            }],
            ..Default::default()
        };
        let result = CatalogNcmClassifier::default()
            .classify_ncm("DIPIRONA 500MG COMPRIMIDO", None, &context)
            .await
            .unwrap();
        assert_eq!(result.code, "30049099");
        assert_eq!(result.candidates.len(), 1);
    }

    #[tokio::test]
    async fn cest_lookup_cases() {
        let agent = CatalogCestClassifier;
        let matched = agent
            .classify_cest("", "30049069", Some("13.001.00"), &ctx())
            .await
            .unwrap();
        assert_eq!(matched.code.as_deref(), Some("1300100"));
        assert_eq!(matched.confidence, 0.92);

        let exempt = agent.classify_cest("", "85076000", None, &ctx()).await.unwrap();
        assert_eq!(exempt.code, None);
        assert_eq!(exempt.confidence, 0.9);

        assert!(agent.classify_cest("", "123", None, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn reconciler_averages_confidences() {
        let ncm = NcmResult::single("30049069", 0.85, "");
        let cest = CestResult {
            code: Some("1300100".into()),
            confidence: 0.6,
            justification: String::new(),
        };
        let result = AveragingReconciler
            .reconcile(&ncm, Some(&cest), &ctx())
            .await
            .unwrap();
        assert!((result.confidence - (0.85 + 0.6) / 2.0).abs() < 1e-12);
        assert!(!result.requires_review);
        assert_eq!(result.final_cest.as_deref(), Some("1300100"));
    }

    #[tokio::test]
    async fn reconciler_flags_incompatible_pair() {
        let ncm = NcmResult::single("22030000", 0.9, "");
        let cest = CestResult {
            code: Some("1300100".into()),
            confidence: 0.9,
            justification: String::new(),
        };
        let result = AveragingReconciler
            .reconcile(&ncm, Some(&cest), &ctx())
            .await
            .unwrap();
        assert!(result.requires_review);
    }

    #[tokio::test]
    async fn reconciler_without_cest_uses_ncm() {
        let ncm = NcmResult::single("85076000", 0.72, "");
        let result = AveragingReconciler.reconcile(&ncm, None, &ctx()).await.unwrap();
        assert_eq!(result.confidence, 0.72);
        assert_eq!(result.final_cest, None);
    }
}
