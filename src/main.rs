use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ncmflow::cli::{Cli, Command};
use ncmflow::config::WorkflowConfig;
use ncmflow::product::load_products;
use ncmflow::router::StrategyRouter;
use ncmflow::ui::{self, BatchProgress};
use ncmflow::{AgentSet, ProductData, WorkflowManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => WorkflowConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => WorkflowConfig::load().context("failed to load configuration")?,
    };

    match cli.command {
        Command::Strategy { description, ncm } => {
            let mut product = ProductData::new(description);
            product.informed_ncm = ncm;
            println!(
                "{} (description quality {:.2})",
                StrategyRouter::route(&product),
                StrategyRouter::description_quality(&product)
            );
        }
        Command::Classify {
            description,
            ncm,
            cest,
            workflow,
            tenant,
        } => {
            let manager = build_manager(config)?;
            let mut product = ProductData::new(description);
            product.informed_ncm = ncm;
            product.informed_cest = cest;
            let result = manager
                .process_product(product, &tenant, workflow.map(Into::into))
                .await;
            ui::print_result(&result);
        }
        Command::Batch {
            file,
            max_concurrent,
            tenant,
        } => {
            let manager = build_manager(config)?;
            let products = load_products(&file)
                .with_context(|| format!("failed to read products from {}", file.display()))?;
            let results = run_with_progress(&manager, products, &tenant, max_concurrent).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            ui::print_statistics(&manager.get_statistics());
        }
        Command::Demo => {
            let manager = build_manager(config)?;
            let results = run_with_progress(&manager, demo_products(), "demo", None).await;
            for result in &results {
                println!("{:<12} {}", result.product_id, ui::summary_line(result));
            }
            ui::print_statistics(&manager.get_statistics());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_manager(config: WorkflowConfig) -> Result<WorkflowManager> {
    WorkflowManager::new(config, AgentSet::catalog()).context("invalid workflow configuration")
}

async fn run_with_progress(
    manager: &WorkflowManager,
    products: Vec<ProductData>,
    tenant: &str,
    max_concurrent: Option<usize>,
) -> Vec<ncmflow::WorkflowResult> {
    let progress = BatchProgress::start(products.len());
    let results = manager
        .process_batch_with_progress(products, tenant, max_concurrent, |index, result| {
            progress.item_done(index, result)
        })
        .await;
    progress.finish();
    results
}

fn demo_products() -> Vec<ProductData> {
    let sample = |id: &str, description: &str| {
        let mut product = ProductData::new(description);
        product.id = Some(id.to_string());
        product
    };
    vec![
        sample("DEMO-001", "DIPIRONA SODICA 500MG COMPRIMIDO").with_ncm("30049069"),
        sample("DEMO-002", "AGUA MINERAL SEM GAS 500ML"),
        sample("DEMO-003", "CERVEJA PILSEN LATA 350ML").with_ncm("22030000"),
        sample("DEMO-004", "XAMPU ANTICASPA 200ML").with_manufacturer("Unilever"),
        sample("DEMO-005", "AMOXICILINA 500MG CAPSULA")
            .with_ncm("3004.20.99")
            .with_manufacturer("EMS"),
        sample("DEMO-006", "PRODUTOS DIVERSOS ...").with_ncm("00123456"),
    ]
}
