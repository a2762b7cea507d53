use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use propwh_etl::{connect_warehouse, EtlConfig, LoadPipeline, LoadSummary};
use propwh_storage::{MemoryWarehouse, Warehouse};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "propwh-cli")]
#[command(about = "Property warehouse loader")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load property records into the warehouse (default).
    Load(LoadArgs),
    /// Create warehouse tables and indexes.
    Schema,
    /// Print row counts and integrity checks for the loaded warehouse.
    Validate,
}

#[derive(Debug, Default, Args)]
struct LoadArgs {
    /// Run against an in-memory warehouse and print its report.
    #[arg(long)]
    dry_run: bool,
    /// Input file (JSON array or JSON Lines).
    #[arg(long)]
    input: Option<PathBuf>,
    /// YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = EtlConfig::from_env();

    match cli.command.unwrap_or(Commands::Load(LoadArgs::default())) {
        Commands::Load(args) => {
            if let Some(input) = args.input {
                config.input_path = input;
            }
            if let Some(path) = args.config {
                config.config_path = path;
            }
            let pipeline = LoadPipeline::new(config);

            if args.dry_run {
                info!("dry run against in-memory warehouse");
                let warehouse = MemoryWarehouse::new();
                let summary = pipeline.run(&warehouse).await?;
                print_summary(&summary);
                let report = warehouse.report().await.context("building dry-run report")?;
                print!("{}", report.render_text());
            } else {
                let prepared = pipeline.prepare().await?;
                let summary = if prepared.is_empty() {
                    prepared.into_summary()
                } else {
                    let warehouse = connect_warehouse(pipeline.config()).await?;
                    pipeline.execute(prepared, &warehouse).await?
                };
                print_summary(&summary);
            }
        }
        Commands::Schema => {
            let warehouse = connect_warehouse(&config).await?;
            let report = warehouse.ensure_schema().await.context("applying schema")?;
            println!(
                "schema applied: executed={} suppressed={} warnings={}",
                report.executed,
                report.suppressed,
                report.warnings.len()
            );
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
        }
        Commands::Validate => {
            let warehouse = connect_warehouse(&config).await?;
            let report = warehouse.report().await.context("running validation queries")?;
            print!("{}", report.render_text());
            let issues = report.issues();
            if !issues.is_empty() {
                bail!("validation found {} issue(s)", issues.len());
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &LoadSummary) {
    println!(
        "load complete: run_id={} records={} staged={} facts={} stage={:?} elapsed_ms={}",
        summary.run_id,
        summary.records,
        summary.staged,
        summary.facts,
        summary.stage,
        (summary.finished_at - summary.started_at).num_milliseconds()
    );
}
