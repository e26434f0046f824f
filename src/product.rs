//! Produto a classificar, como recebido dos sistemas de origem.
//!
//! Os nomes de campo em JSON seguem os nomes usados pelos ERPs
//! (`descricao_original`, `ncm_informado`, ...). Strings vazias em campos
//! opcionais são tratadas como ausentes.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::error::NcmFlowError;

/// Snapshot of a product submitted for classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductData {
    #[serde(default, alias = "produto_id", deserialize_with = "non_empty")]
    pub id: Option<String>,

    #[serde(rename = "descricao_original")]
    pub description: String,

    #[serde(rename = "ncm_informado", default, deserialize_with = "non_empty")]
    pub informed_ncm: Option<String>,

    #[serde(rename = "cest_informado", default, deserialize_with = "non_empty")]
    pub informed_cest: Option<String>,

    #[serde(
        rename = "codigo_barra",
        alias = "gtin",
        default,
        deserialize_with = "non_empty"
    )]
    pub barcode: Option<String>,

    #[serde(rename = "codigo_interno", default, deserialize_with = "non_empty")]
    pub internal_code: Option<String>,

    #[serde(rename = "fabricante", default, deserialize_with = "non_empty")]
    pub manufacturer: Option<String>,

    #[serde(rename = "marca", default, deserialize_with = "non_empty")]
    pub brand: Option<String>,
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl ProductData {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_ncm(mut self, ncm: impl Into<String>) -> Self {
        self.informed_ncm = Some(ncm.into());
        self
    }

    pub fn with_cest(mut self, cest: impl Into<String>) -> Self {
        self.informed_cest = Some(cest.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Identifier used in logs and results: the explicit id, else the
    /// internal code, else the barcode.
    pub fn display_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.internal_code.as_deref())
            .or(self.barcode.as_deref())
    }
}

/// Reads a JSON array of products from disk.
pub fn load_products(path: &Path) -> Result<Vec<ProductData>, NcmFlowError> {
    let contents = std::fs::read_to_string(path)?;
    let products = serde_json::from_str(&contents)?;
    Ok(products)
}
