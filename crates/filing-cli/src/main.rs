//! Command-line interface for the filing analysis pipeline

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL;
use filing_analysis::{
    FilingCache, FilingType, FinalReport, LlmCollaborator, NullContextSource, Pipeline, PipelineConfig,
    ProgressEvent, SecEdgarProvider,
};
use filing_llm::providers::OpenAIProvider;
use filing_utils::LogFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "filing-cli")]
#[command(about = "Research reports from SEC filings", long_about = None)]
struct Cli {
    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Snapshot cache directory (overrides FILING_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze the latest filing of the company named in a query
    Analyze {
        /// Natural-language request, e.g. "Analyze Tesla's Q3 2025 performance"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Filing form to analyze: 10-Q or 10-K
        #[arg(long, default_value = "10-Q")]
        filing_type: FilingType,

        /// Directory for per-session artifacts (overrides FILING_SESSION_DIR)
        #[arg(long)]
        session_dir: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete expired snapshot cache entries
    SweepCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    filing_utils::init_tracing_with("info", cli.log_format);

    let mut config = PipelineConfig::default().with_env()?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Commands::Analyze {
            query,
            filing_type,
            session_dir,
            json,
        } => {
            config.filing_type = filing_type;
            if let Some(dir) = session_dir {
                config.session_root = dir;
            }
            analyze(config, &query.join(" "), json).await
        }
        Commands::SweepCache => {
            let cache = FilingCache::new(&config.cache_dir, config.cache_ttl);
            let removed = cache.sweep_expired().await?;
            println!("Removed {removed} expired entries from {}", cache.dir().display());
            Ok(())
        }
    }
}

async fn analyze(config: PipelineConfig, query: &str, json: bool) -> anyhow::Result<()> {
    info!(query, filing_type = %config.filing_type, "Starting analysis");

    let llm = OpenAIProvider::from_env().context("failed to create the LLM provider")?;
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| config.model.clone());
    let collaborator = LlmCollaborator::new(Arc::new(llm), model)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature);

    let pipeline = Pipeline::builder(config.clone())
        .provider(Arc::new(SecEdgarProvider::new(&config.sec_user_agent)))
        .context_source(Arc::new(NullContextSource))
        .collaborator(Arc::new(collaborator))
        .build()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let mut session = pipeline.new_session(query).with_progress(tx);
    let session_dir = session.dir().map(Path::to_path_buf);

    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("[{:>3}%] {}", event.percent, event.message);
        }
    });

    let result = pipeline.execute(&mut session).await;
    // Dropping the session closes the progress channel.
    drop(session);
    progress.await?;

    let report = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if let Some(dir) = session_dir {
        eprintln!("Session artifacts: {}", dir.display());
    }
    Ok(())
}

fn print_report(report: &FinalReport) {
    let synthesis = &report.synthesis.output;
    println!(
        "\n{} {} filed {} - rating: {}\n",
        report.company_id, report.filing.filing_type, report.filing.filing_date, synthesis.rating
    );
    println!("{}\n", synthesis.executive_summary);
    for finding in &synthesis.top_findings {
        println!("  - {finding}");
    }

    println!("\nValidation: {}", report.validation.status);
    println!("{}", ratio_table(report));

    for section in &report.sections {
        if let Some(note) = &section.note {
            println!("{}: {note}", section.title);
        }
    }
    if !report.degraded.is_empty() {
        println!("\nDegraded:");
        for note in &report.degraded {
            println!("  - {note}");
        }
    }
}

fn ratio_table(report: &FinalReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Ratio", "Category", "Value", "Reading"]);

    for ratio in &report.ratios {
        let value = match (ratio.value, &ratio.reason) {
            (Some(value), _) => format!("{value:.2}"),
            (None, Some(reason)) => reason.clone(),
            (None, None) => "n/a".to_string(),
        };
        table.add_row(vec![
            ratio.name.clone(),
            ratio.category.to_string(),
            value,
            ratio.interpretation.to_string(),
        ]);
    }
    table
}
