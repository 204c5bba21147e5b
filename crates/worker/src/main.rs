//! Command-line runner: one pipeline run per invocation, result printed as
//! JSON so schedulers and dashboards can consume it directly.

use std::path::PathBuf;

use clap::Parser;
use tabpipe_core::config::TransformationConfig;
use tabpipe_core::run::RunStatus;
use tabpipe_pipeline::{InputSpec, Pipeline, PipelineOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tabpipe-worker",
    about = "Automated tabular reporting pipeline runner"
)]
struct Args {
    /// Input directory containing tabular source files
    #[arg(short, long, default_value = "data/input")]
    input_dir: PathBuf,

    /// Output directory for generated reports and the audit log
    #[arg(short, long, default_value = "data/output")]
    output_dir: PathBuf,

    /// Transformation configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output formats to generate, comma separated
    #[arg(long, value_delimiter = ',', default_value = "csv,summary")]
    formats: Vec<String>,

    /// Maximum concurrent extraction/export workers
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabpipe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            TransformationConfig::from_json(&text)?
        }
        None => TransformationConfig::default(),
    };

    let options = PipelineOptions {
        formats: args.formats.clone(),
        concurrency_limit: args.concurrency,
        ..PipelineOptions::default()
    };
    let pipeline = Pipeline::new(&args.output_dir).with_options(options);

    // Ctrl-C requests cancellation; in-flight file work finishes and no
    // further stage begins.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Cancellation requested; finishing in-flight work");
            signal_token.cancel();
        }
    });

    let result = pipeline
        .run(InputSpec::Directory(args.input_dir), &config, cancel)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status != RunStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
