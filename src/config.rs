//! Configuração do ncmflow carregada a partir de `ncmflow.toml`.
//!
//! A struct [`WorkflowConfig`] contém os limiares de confiança, o limite de
//! concorrência dos lotes e o prazo de execução de cada fluxo.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente `NCMFLOW_*` têm precedência sobre o arquivo.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "ncmflow.toml";

/// Configuração de nível superior carregada de `ncmflow.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Confiança mínima para aceitar NCM e reconciliação sem revisão manual.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Confiança a partir da qual um resultado é aprovado automaticamente.
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,

    /// Limiar efetivo (menor) para a validação de CEST, que é opcional para muitos produtos.
    #[serde(default = "default_cest_confidence_threshold")]
    pub cest_confidence_threshold: f64,

    /// Máximo de produtos processados simultaneamente em um lote.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Prazo de cada execução de fluxo, aplicado a todas as chamadas de agente.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Tempo que um job de lote finalizado permanece consultável.
    #[serde(default = "default_job_ttl_minutes")]
    pub job_ttl_minutes: u64,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_auto_approve_threshold() -> f64 {
    0.9
}

fn default_cest_confidence_threshold() -> f64 {
    0.5
}

fn default_max_concurrency() -> usize {
    5
}

fn default_timeout_minutes() -> u64 {
    5
}

fn default_job_ttl_minutes() -> u64 {
    60
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            auto_approve_threshold: default_auto_approve_threshold(),
            cest_confidence_threshold: default_cest_confidence_threshold(),
            max_concurrency: default_max_concurrency(),
            timeout_minutes: default_timeout_minutes(),
            job_ttl_minutes: default_job_ttl_minutes(),
        }
    }
}

impl WorkflowConfig {
    /// Carrega a configuração de `ncmflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito, aplica as variáveis de
    /// ambiente e valida o resultado.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<WorkflowConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica sobrescritas a partir de uma função de busca de variáveis.
    /// Variáveis vazias são ignoradas.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("NCMFLOW_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NCMFLOW_CONFIDENCE_THRESHOLD",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get("NCMFLOW_MAX_CONCURRENCY") {
            self.max_concurrency = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NCMFLOW_MAX_CONCURRENCY",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get("NCMFLOW_TIMEOUT_MINUTES") {
            self.timeout_minutes = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "NCMFLOW_TIMEOUT_MINUTES",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    /// Rejeita configurações inválidas antes que qualquer fluxo execute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("auto_approve_threshold", self.auto_approve_threshold),
            ("cest_confidence_threshold", self.cest_confidence_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.auto_approve_threshold < self.confidence_threshold {
            return Err(ConfigError::AutoApproveBelowConfidence {
                auto_approve: self.auto_approve_threshold,
                confidence: self.confidence_threshold,
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout_minutes == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Prazo total de uma execução de fluxo.
    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_minutes.saturating_mul(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = WorkflowConfig::default();
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.auto_approve_threshold, 0.9);
        assert_eq!(config.cest_confidence_threshold, 0.5);
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.timeout_minutes, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            confidence_threshold = 0.8
            max_concurrency = 10
        "#;
        let config: WorkflowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.cest_confidence_threshold, 0.5);
        assert_eq!(config.timeout_minutes, 5);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cest_confidence_threshold = 0.4\njob_ttl_minutes = 5").unwrap();

        let config = WorkflowConfig::load_from(file.path()).unwrap();
        assert_eq!(config.cest_confidence_threshold, 0.4);
        assert_eq!(config.job_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.auto_approve_threshold, 0.9);
    }

    #[test]
    fn load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "confidence_threshold = 1.7").unwrap();

        let err = WorkflowConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ThresholdOutOfRange {
                name: "confidence_threshold",
                ..
            }
        ));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = [
            ("NCMFLOW_CONFIDENCE_THRESHOLD", "0.75"),
            ("NCMFLOW_MAX_CONCURRENCY", "2"),
            ("NCMFLOW_TIMEOUT_MINUTES", ""),
        ]
        .into_iter()
        .collect();

        let mut config = WorkflowConfig::default();
        config
            .apply_overrides(|var| vars.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.confidence_threshold, 0.75);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.timeout_minutes, 5);
    }

    #[test]
    fn env_override_with_garbage_fails() {
        let mut config = WorkflowConfig::default();
        let err = config
            .apply_overrides(|var| (var == "NCMFLOW_MAX_CONCURRENCY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = WorkflowConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));

        let config = WorkflowConfig {
            timeout_minutes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));

        let config = WorkflowConfig {
            cest_confidence_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange { .. })
        ));

        let config = WorkflowConfig {
            auto_approve_threshold: 0.6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AutoApproveBelowConfidence { .. })
        ));
    }
}
