//! streampdf CLI - memory-aware PDF text extraction tool

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use streampdf::{
    BatchConfigCalculator, BatchConfiguration, EventBus, ExtractionOptions, ExtractionStrategy,
    PageSource, PdfDocument, Pipeline, PipelineConfig, PressureLevel, PressureMonitor,
    SystemSampler,
};

const MB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "streampdf")]
#[command(version)]
#[command(about = "Extract text from PDF documents under memory pressure control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the text of a PDF
    Text {
        /// Input PDF file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Keep page text exactly as extracted
        #[arg(long)]
        raw: bool,

        /// Allow parallel page reads for small documents
        #[arg(long)]
        parallel: bool,

        /// Upper bound on pages per batch
        #[arg(long, value_name = "PAGES")]
        batch_size: Option<u32>,

        /// JSON pipeline configuration
        #[arg(long, value_name = "FILE", env = "STREAMPDF_CONFIG")]
        config: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show how a PDF would be extracted
    Plan {
        /// Input PDF file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Consider parallel page reads
        #[arg(long)]
        parallel: bool,

        /// JSON pipeline configuration
        #[arg(long, value_name = "FILE", env = "STREAMPDF_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show the current memory pressure reading
    Memory {
        /// Print the reading as JSON
        #[arg(long)]
        json: bool,

        /// JSON pipeline configuration
        #[arg(long, value_name = "FILE", env = "STREAMPDF_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Text {
            input,
            output,
            raw,
            parallel,
            batch_size,
            config,
            quiet,
        } => {
            let mut options = ExtractionOptions::new()
                .with_preprocessing(!raw)
                .with_parallel(parallel);
            if let Some(pages) = batch_size {
                options = options.with_max_batch_size(pages);
            }
            cmd_text(&input, output.as_deref(), &options, config.as_deref(), quiet).await
        }
        Commands::Plan {
            input,
            parallel,
            config,
        } => cmd_plan(&input, parallel, config.as_deref()),
        Commands::Memory { json, config } => cmd_memory(json, config.as_deref()),
        Commands::Version => {
            cmd_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json_file(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

async fn cmd_text(
    input: &Path,
    output: Option<&Path>,
    options: &ExtractionOptions,
    config: Option<&Path>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::builder().with_config(load_config(config)?).build()?;
    let _guard = pipeline.start();

    let doc = PdfDocument::open(input)?;
    let plan = pipeline.plan(&doc, options);
    log::info!(
        "{} pages, estimated {} MB, {} strategy",
        doc.page_count(),
        plan.estimated_bytes / MB,
        plan.strategy
    );

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(doc.page_count() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} pages {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(plan.strategy.to_string());

    let mut updates = pipeline.progress();
    let bar = pb.clone();
    let reporter = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(progress) => {
                    bar.set_length(progress.total_pages as u64);
                    bar.set_position(progress.completed_pages as u64);
                    bar.set_message(format!(
                        "batch {}/{}, ~{}s left",
                        progress.current_batch,
                        progress.total_batches,
                        progress.estimated_time_remaining.as_secs()
                    ));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let text = pipeline.extract(&doc, options).await;
    reporter.abort();
    let text = text?;

    pb.set_position(doc.page_count() as u64);
    pb.finish_with_message("Done!");

    if let Some(path) = output {
        fs::write(path, &text)?;
        println!("{} {}", "Saved to".green(), path.display());
    } else {
        println!("{}", text);
    }

    if matches!(plan.strategy, ExtractionStrategy::Streaming) {
        let stats = pipeline.last_run();
        log::info!(
            "{} batches, average {:?}, slowest {:?}, total {:?}",
            stats.completed_batches,
            stats.average_batch_time,
            stats.slowest_batch_time,
            stats.total_elapsed
        );
    }

    Ok(())
}

fn cmd_plan(
    input: &Path,
    parallel: bool,
    config: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::builder().with_config(load_config(config)?).build()?;
    let doc = PdfDocument::open(input)?;
    let options = ExtractionOptions::new().with_parallel(parallel);
    let plan = pipeline.plan(&doc, &options);
    let snapshot = pipeline.snapshot();

    println!("{}", "Extraction Plan".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());

    println!("{}: {}", "File".bold(), input.display());
    println!("{}: PDF {}", "Format".bold(), doc.version());
    println!("{}: {}", "Pages".bold(), doc.page_count());
    println!("{}: {}", "Fingerprint".bold(), plan.fingerprint);
    println!("{}: {} MB", "Estimated memory".bold(), plan.estimated_bytes / MB);
    println!("{}: {}", "Pressure".bold(), snapshot.level);
    println!("{}: {}", "Strategy".bold(), plan.strategy.to_string().green());

    if matches!(plan.strategy, ExtractionStrategy::Streaming) {
        let calculator = BatchConfigCalculator::new(Arc::clone(pipeline.monitor()));
        let base = BatchConfiguration::default().with_batch_size(options.max_batch_size);
        let batches = calculator.calculate(doc.page_count(), &base);
        println!(
            "{}: {} pages x {} batches",
            "Batches".bold(),
            batches.max_batch_size,
            batches.batch_count(doc.page_count())
        );
    }

    Ok(())
}

fn cmd_memory(json: bool, config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let monitor = PressureMonitor::new(
        Arc::new(SystemSampler::new()),
        Arc::new(EventBus::new()),
        config.pressure,
    );
    let snapshot = monitor.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let label = snapshot.level.to_string();
    let level = match snapshot.level {
        PressureLevel::Normal | PressureLevel::Low => label.green(),
        PressureLevel::Medium => label.yellow(),
        PressureLevel::High | PressureLevel::Critical => label.red(),
    };

    println!("{}", "Memory Pressure".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    println!("{}: {}", "Level".bold(), level);
    println!("{}: {} MB", "Resident".bold(), snapshot.resident_bytes / MB);
    println!("{}: {} MB", "Total".bold(), snapshot.total_bytes / MB);
    println!(
        "{}: {:.1}%",
        "Available".bold(),
        snapshot.available_fraction * 100.0
    );
    println!(
        "{}: {} pages",
        "Batch size".bold(),
        snapshot.level.recommended_batch_size()
    );
    println!(
        "{}: {}",
        "Concurrency".bold(),
        snapshot.level.recommended_concurrency()
    );

    Ok(())
}

fn cmd_version() {
    println!("{} {}", "streampdf".cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("Memory-aware PDF text extraction tool");
    println!();
    println!("License: MIT");
}
