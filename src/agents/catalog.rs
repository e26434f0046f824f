//! Tabela de referência embutida usada pelos agentes de catálogo.
//!
//! Cada entrada NCM traz palavras-chave com pesos; a tabela CEST associa
//! prefixos de NCM ao código CEST do segmento de substituição tributária.

use crate::text::split_measure;

pub(crate) struct NcmEntry {
    pub ncm: &'static str,
    pub description: &'static str,
    pub keywords: &'static [(&'static str, u32)],
}

pub(crate) struct CestRule {
    pub ncm_prefix: &'static str,
    pub cest: &'static str,
    pub description: &'static str,
}

/// Marks "no catalog entry matched": chapter 00 never validates.
pub(crate) const UNCLASSIFIED_NCM: &str = "00000000";

pub(crate) const NCM_CATALOG: &[NcmEntry] = &[
    NcmEntry {
        ncm: "30049069",
        description: "Medicamentos analgesicos e antitermicos, em doses",
        keywords: &[
            ("dipiron", 12),
            ("paracetamol", 12),
            ("ibuprofen", 10),
            ("analges", 8),
            ("antiterm", 8),
            ("comprim", 4),
            ("gotas", 4),
            ("mg", 3),
        ],
    },
    NcmEntry {
        ncm: "30042099",
        description: "Medicamentos contendo antibioticos, em doses",
        keywords: &[
            ("amoxicilin", 12),
            ("azitromicin", 12),
            ("cefalexin", 12),
            ("antibiot", 10),
            ("capsul", 4),
            ("comprim", 3),
            ("mg", 3),
        ],
    },
    NcmEntry {
        ncm: "30049099",
        description: "Outros medicamentos, em doses",
        keywords: &[
            ("medicament", 6),
            ("xarope", 6),
            ("pomada", 6),
            ("comprim", 4),
            ("capsul", 4),
            ("mg", 3),
            ("ml", 2),
        ],
    },
    NcmEntry {
        ncm: "22011000",
        description: "Aguas minerais e aguas gaseificadas",
        keywords: &[("agua", 10), ("mineral", 10), ("gaseific", 5), ("garraf", 2), ("ml", 2)],
    },
    NcmEntry {
        ncm: "22021000",
        description: "Aguas adicionadas de acucar ou aromatizadas (refrigerantes)",
        keywords: &[
            ("refrigerant", 12),
            ("guarana", 8),
            ("cola", 6),
            ("soda", 6),
            ("lata", 3),
            ("pet", 3),
            ("ml", 2),
        ],
    },
    NcmEntry {
        ncm: "22030000",
        description: "Cervejas de malte",
        keywords: &[("cerveja", 14), ("malte", 6), ("pilsen", 6), ("lata", 3), ("ml", 2)],
    },
    NcmEntry {
        ncm: "04012010",
        description: "Leite UHT",
        keywords: &[("leite", 10), ("uht", 8), ("integral", 4), ("desnatad", 4), ("litro", 2)],
    },
    NcmEntry {
        ncm: "19053100",
        description: "Bolachas e biscoitos adicionados de edulcorante",
        keywords: &[("biscoit", 12), ("bolacha", 12), ("wafer", 8), ("rechead", 6), ("g", 1)],
    },
    NcmEntry {
        ncm: "33051000",
        description: "Xampus",
        keywords: &[("xampu", 14), ("shampoo", 14), ("cabel", 5), ("ml", 2)],
    },
    NcmEntry {
        ncm: "34011190",
        description: "Saboes de toucador",
        keywords: &[("sabonete", 14), ("sabao", 8), ("barra", 3), ("g", 1)],
    },
    NcmEntry {
        ncm: "96032100",
        description: "Escovas de dentes",
        keywords: &[("escova", 10), ("dent", 8), ("cerda", 5)],
    },
    NcmEntry {
        ncm: "40111000",
        description: "Pneus novos de borracha para automoveis",
        keywords: &[("pneu", 14), ("radial", 5), ("aro", 5), ("automov", 4)],
    },
    NcmEntry {
        ncm: "85076000",
        description: "Acumuladores eletricos de ions de litio",
        keywords: &[("bateria", 10), ("litio", 10), ("ion", 5), ("mah", 4), ("recarreg", 4)],
    },
    NcmEntry {
        ncm: "85171300",
        description: "Telefones inteligentes (smartphones)",
        keywords: &[("smartphone", 14), ("celular", 12), ("android", 4), ("gb", 2)],
    },
];

pub(crate) const CEST_RULES: &[CestRule] = &[
    CestRule {
        ncm_prefix: "3004",
        cest: "1300100",
        description: "Medicamentos de uso humano",
    },
    CestRule {
        ncm_prefix: "22011",
        cest: "0300100",
        description: "Agua mineral, gasosa ou nao",
    },
    CestRule {
        ncm_prefix: "22021",
        cest: "0301100",
        description: "Refrigerantes",
    },
    CestRule {
        ncm_prefix: "2203",
        cest: "0302100",
        description: "Cerveja",
    },
    CestRule {
        ncm_prefix: "040120",
        cest: "1701600",
        description: "Leite UHT",
    },
    CestRule {
        ncm_prefix: "190531",
        cest: "1705300",
        description: "Biscoitos e bolachas",
    },
    CestRule {
        ncm_prefix: "330510",
        cest: "2003000",
        description: "Xampus para o cabelo",
    },
    CestRule {
        ncm_prefix: "340111",
        cest: "2006000",
        description: "Sabonetes de toucador",
    },
    CestRule {
        ncm_prefix: "960321",
        cest: "2006400",
        description: "Escovas de dentes",
    },
    CestRule {
        ncm_prefix: "4011",
        cest: "1600100",
        description: "Pneus novos de borracha",
    },
    CestRule {
        ncm_prefix: "851713",
        cest: "2105300",
        description: "Telefones celulares e smartphones",
    },
];

pub(crate) const ABBREVIATIONS: &[(&str, &str)] = &[
    ("cpr", "comprimido"),
    ("comp", "comprimido"),
    ("cps", "capsula"),
    ("caps", "capsula"),
    ("cx", "caixa"),
    ("fr", "frasco"),
    ("amp", "ampola"),
    ("xpe", "xarope"),
    ("sol", "solucao"),
    ("refrig", "refrigerante"),
    ("cerv", "cerveja"),
    ("bisc", "biscoito"),
    ("sab", "sabonete"),
    ("pct", "pacote"),
    ("un", "unidade"),
];

/// Orientação regulatória associada a um capítulo NCM.
pub(crate) fn chapter_hint(chapter: &str) -> Option<&'static str> {
    let hint = match chapter {
        "30" => "Chapter 30 (pharmaceutical products): ICMS tax substitution, CEST segment 13; ANVISA registration expected",
        "22" => "Chapter 22 (beverages): ICMS tax substitution, CEST segment 03",
        "04" => "Chapter 04 (dairy): UHT milk falls under CEST segment 17",
        "19" => "Chapter 19 (bakery products): CEST segment 17",
        "33" | "34" | "96" => "Personal hygiene and perfumery: CEST segment 20",
        "40" => "Chapter 40 (rubber): new tyres fall under CEST segment 16",
        "85" => "Chapter 85 (electrical equipment): selected electronics under CEST segment 21",
        _ => return None,
    };
    Some(hint)
}

/// Regra CEST de prefixo mais longo para o NCM.
pub(crate) fn cest_rule_for(ncm: &str) -> Option<&'static CestRule> {
    CEST_RULES
        .iter()
        .filter(|r| ncm.starts_with(r.ncm_prefix))
        .max_by_key(|r| r.ncm_prefix.len())
}

pub(crate) fn entry_for(ncm: &str) -> Option<&'static NcmEntry> {
    NCM_CATALOG.iter().find(|e| e.ncm == ncm)
}

/// Short keywords (units) must match exactly or as the unit of a measure
/// (`500mg`); longer ones are stems matched by prefix.
pub(crate) fn token_matches(token: &str, keyword: &str) -> bool {
    if keyword.len() <= 3 {
        if token == keyword {
            return true;
        }
        return matches!(split_measure(token), Some((_, unit)) if unit == keyword);
    }
    token.starts_with(keyword)
}

impl NcmEntry {
    /// Soma dos pesos das palavras-chave encontradas; cada palavra conta uma vez.
    pub(crate) fn score(&self, tokens: &[String]) -> u32 {
        self.keywords
            .iter()
            .filter(|(kw, _)| tokens.iter().any(|t| token_matches(t, kw)))
            .map(|(_, weight)| weight)
            .sum()
    }

    pub(crate) fn total_weight(&self) -> u32 {
        self.keywords.iter().map(|(_, w)| w).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokens;

    #[test]
    fn catalog_codes_are_well_formed() {
        for entry in NCM_CATALOG {
            assert_eq!(entry.ncm.len(), 8, "{}", entry.ncm);
            assert!(entry.ncm.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(&entry.ncm[..2], "00");
        }
        for rule in CEST_RULES {
            assert_eq!(rule.cest.len(), 7, "{}", rule.cest);
        }
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(cest_rule_for("30049069").unwrap().cest, "1300100");
        assert_eq!(cest_rule_for("22021000").unwrap().cest, "0301100");
        assert!(cest_rule_for("85076000").is_none());
    }

    #[test]
    fn token_matching_rules() {
        assert!(token_matches("500mg", "mg"));
        assert!(token_matches("mg", "mg"));
        assert!(!token_matches("mgx", "mg"));
        assert!(token_matches("comprimidos", "comprim"));
        assert!(!token_matches("cola", "colageno"));
    }

    #[test]
    fn scoring_prefers_specific_entry() {
        let toks = tokens("DIPIRONA SODICA 500MG COMPRIMIDO");
        let analgesic = entry_for("30049069").unwrap().score(&toks);
        let generic = entry_for("30049099").unwrap().score(&toks);
        assert_eq!(analgesic, 19);
        assert_eq!(generic, 7);
    }

    #[test]
    fn chapter_hints() {
        assert!(chapter_hint("30").unwrap().contains("segment 13"));
        assert!(chapter_hint("99").is_none());
    }
}
