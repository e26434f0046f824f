//! Interface de linha de comando do ncmflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (classify, batch,
//! strategy, demo) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::WorkflowType;

/// ncmflow: orquestrador de classificação fiscal NCM/CEST.
#[derive(Debug, Parser)]
#[command(name = "ncmflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: ./ncmflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (logs em nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Estratégia forçada pela CLI, mapeada para [`WorkflowType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkflowArg {
    /// Confirma o NCM/CEST informado.
    Confirmation,
    /// Determina o NCM/CEST a partir da descrição.
    Determination,
    /// Tenta confirmar e, se não conseguir, determina.
    Hybrid,
}

impl From<WorkflowArg> for WorkflowType {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Confirmation => WorkflowType::Confirmation,
            WorkflowArg::Determination => WorkflowType::Determination,
            WorkflowArg::Hybrid => WorkflowType::Hybrid,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classifica um único produto.
    Classify {
        /// Descrição do produto.
        description: String,

        /// NCM informado pelo ERP.
        #[arg(long)]
        ncm: Option<String>,

        /// CEST informado pelo ERP.
        #[arg(long)]
        cest: Option<String>,

        /// Força uma estratégia em vez da seleção automática.
        #[arg(long, value_enum)]
        workflow: Option<WorkflowArg>,

        /// Identificador da empresa.
        #[arg(long, default_value = "default")]
        tenant: String,
    },

    /// Classifica um lote de produtos lido de um arquivo JSON.
    Batch {
        /// Arquivo JSON com um array de produtos.
        #[arg(long)]
        file: PathBuf,

        /// Limite de classificações simultâneas.
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Identificador da empresa.
        #[arg(long, default_value = "default")]
        tenant: String,
    },

    /// Mostra a estratégia escolhida e a qualidade da descrição.
    Strategy {
        /// Descrição do produto.
        description: String,

        /// NCM informado pelo ERP.
        #[arg(long)]
        ncm: Option<String>,
    },

    /// Executa os produtos de demonstração embutidos.
    Demo,
}
