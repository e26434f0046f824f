//! Interface de terminal do ncmflow: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para o progresso de lotes e `console` para estilizar o
//! status de cada classificação. O [`BatchProgress`] acompanha visualmente
//! um lote em execução.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{WorkflowResult, WorkflowStatus};
use crate::stats::Statistics;

/// Barra de progresso de um lote de produtos.
///
/// Cada item concluído avança a barra; itens com ERRO são listados acima
/// dela em vermelho.
pub struct BatchProgress {
    // Barra do indicatif, com contagem de itens.
    pb: ProgressBar,
    red: Style,
}

impl BatchProgress {
    /// Cria a barra para `total` produtos.
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        // Template fixo; se algum dia falhar, o estilo padrão serve.
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("=> "));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            red: Style::new().red().bold(),
        }
    }

    /// Registra um item concluído na posição `index` do lote.
    pub fn item_done(&self, index: usize, result: &WorkflowResult) {
        if result.status == WorkflowStatus::Error {
            self.pb.println(format!(
                "  {} #{index} {}: {}",
                self.red.apply_to("✗"),
                result.product_id,
                result.error.as_deref().unwrap_or("erro desconhecido")
            ));
        }
        self.pb.set_message(format!("{} {}", result.product_id, result.status));
        self.pb.inc(1);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn status_style(status: WorkflowStatus) -> Style {
    match status {
        WorkflowStatus::Confirmed | WorkflowStatus::Determined => Style::new().green().bold(),
        WorkflowStatus::ManualReview => Style::new().yellow().bold(),
        _ => Style::new().red().bold(),
    }
}

/// Resumo de uma classificação em uma linha colorida.
pub fn summary_line(result: &WorkflowResult) -> String {
    let ncm = result.final_result.ncm.as_deref().unwrap_or("-");
    let cest = result.final_result.cest.as_deref().unwrap_or("-");
    format!(
        "{} [{}] NCM {ncm} CEST {cest} confiança {:.2}{}",
        status_style(result.status).apply_to(result.status),
        result.workflow_type,
        result.confidence,
        if result.final_result.auto_approved {
            " (aprovação automática)"
        } else {
            ""
        }
    )
}

/// Imprime o resumo e o resultado completo em JSON.
pub fn print_result(result: &WorkflowResult) {
    println!("  {}", summary_line(result));
    if let Some(review) = &result.final_result.review {
        println!("  {} {}", Style::new().yellow().apply_to("revisão:"), review.reason);
        for action in &review.suggested_actions {
            println!("    - {action}");
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(result).unwrap_or_default()
    );
}

/// Imprime as estatísticas acumuladas do gerenciador.
pub fn print_statistics(stats: &Statistics) {
    let dim = Style::new().dim();
    println!();
    println!("{}", dim.apply_to("─── Estatísticas ───"));
    println!(
        "  processados {} | confirmação {} | determinação {} | híbrido {}",
        stats.total_processed, stats.confirmation_count, stats.determination_count, stats.hybrid_count
    );
    println!(
        "  revisão manual {} | erros {} | taxa de sucesso {:.0}% | confiança média {:.2}",
        stats.manual_review_count,
        stats.error_count,
        stats.success_rate * 100.0,
        stats.average_confidence
    );
}
