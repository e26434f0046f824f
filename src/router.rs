use crate::product::ProductData;
use crate::state_machine::WorkflowType;
use crate::text::{digits, split_measure, tokens};

/// Quality score above which an informed NCM is confirmed directly.
pub const CONFIRMATION_QUALITY: f64 = 0.7;

const UNIT_TOKENS: &[&str] = &[
    "mg", "ml", "g", "kg", "l", "mcg", "ui", "%", "un", "cx", "fr", "amp",
];

const DOSAGE_FORMS: &[&str] = &[
    "comprim", "capsul", "cpr", "caps", "drage", "ampola", "xarope", "gotas", "solucao",
    "suspensao", "pomada", "creme", "gel", "frasco", "injet",
];

const MEASURE_UNITS: &[&str] = &["mg", "ml", "g", "kg", "l", "mcg", "ui", "%"];

const VAGUE_TOKENS: &[&str] = &["diversos", "diversas", "variados", "outros", "etc", "generico"];

/// Checks the NCM shape: eight digits once separators are stripped, chapter not `00`.
pub fn is_valid_ncm(ncm: &str) -> bool {
    let code = digits(ncm);
    let only_separators = ncm
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | ' ' | '/'));
    only_separators && code.len() == 8 && &code[..2] != "00"
}

/// Selects the classification strategy for a product from its informed NCM
/// and the quality of its description.
pub struct StrategyRouter;

impl StrategyRouter {
    /// Additive heuristic in [0, 1] describing how informative a product
    /// description is.
    pub fn description_quality(product: &ProductData) -> f64 {
        let description = product.description.trim();
        let toks = tokens(description);
        let length = description.chars().count();
        let mut score: f64 = 0.0;

        if length > 10 {
            score += 0.2;
        }
        if length > 30 {
            score += 0.2;
        }

        let has_unit = toks.iter().any(|t| {
            UNIT_TOKENS.contains(&t.as_str()) || DOSAGE_FORMS.iter().any(|f| t.starts_with(f))
        });
        if has_unit {
            score += 0.2;
        }

        if product.manufacturer.is_some() || product.brand.is_some() {
            score += 0.2;
        }

        let has_dosage = toks.iter().enumerate().any(|(i, t)| match split_measure(t) {
            Some((_, unit)) if MEASURE_UNITS.contains(&unit) => true,
            // "500 mg": number followed by a separate unit token
            Some((_, "")) => toks
                .get(i + 1)
                .is_some_and(|next| MEASURE_UNITS.contains(&next.as_str())),
            _ => false,
        });
        if has_dosage {
            score += 0.2;
        }

        let vague = description.contains("...")
            || toks.iter().any(|t| VAGUE_TOKENS.contains(&t.as_str()));
        if vague {
            score -= 0.3;
        }

        score.clamp(0.0, 1.0)
    }

    /// Valid informed NCM → CONFIRMATION for a strong description, HYBRID
    /// otherwise; missing or malformed NCM → DETERMINATION.
    pub fn route(product: &ProductData) -> WorkflowType {
        match product.informed_ncm.as_deref() {
            Some(ncm) if is_valid_ncm(ncm) => {
                if Self::description_quality(product) > CONFIRMATION_QUALITY {
                    WorkflowType::Confirmation
                } else {
                    WorkflowType::Hybrid
                }
            }
            _ => WorkflowType::Determination,
        }
    }
}
