use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use convertly_core::advisor::gemini::DEFAULT_MODEL;
use convertly_core::advisor::{GeminiAdvisor, HttpAdvisor};
use convertly_core::metadata::{self, MetadataReport};
use convertly_core::{
    intake, package, run_batch, Advisor, AdvisorConfig, BatchOptions, CancellationToken,
    ConversionSettings, FileSet, Notice, NoticeLevel, Progress, TargetFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convertly", version, about = "Convert images with advisor-tuned compression settings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert images to a target format
    Convert(ConvertArgs),
    /// Print the EXIF tags embedded in an image
    Metadata {
        file: PathBuf,
    },
}

#[derive(Args)]
struct ConvertArgs {
    /// Images to convert
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Target format: webp, png, jpeg or avif
    #[arg(short, long, default_value = "webp")]
    format: TargetFormat,

    /// Ask for lossless output
    #[arg(long)]
    lossless: bool,

    /// Initial compression speed, 1 (best compression) to 10 (fastest)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    speed: u8,

    /// Size limit in KB passed to the advisor
    #[arg(long, default_value_t = 1024)]
    max_size_kb: u32,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Write one converted_images.zip instead of individual files
    #[arg(long)]
    zip: bool,

    /// Use a convertly-server (or compatible) endpoint instead of calling Gemini directly
    #[arg(long, env = "CONVERTLY_ADVISOR_URL")]
    advisor_url: Option<String>,

    /// Gemini API key (falls back to GOOGLE_API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "CONVERTLY_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Advisor request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Files converted at once (default: all)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Error => eprintln!("[error] {}: {}", notice.title, notice.description),
        NoticeLevel::Info => eprintln!("{}: {}", notice.title, notice.description),
    }
}

fn build_advisor(args: &ConvertArgs) -> anyhow::Result<Box<dyn Advisor>> {
    let config = AdvisorConfig::new()
        .with_model(&args.model)
        .with_timeout(Duration::from_secs(args.timeout));

    if let Some(url) = &args.advisor_url {
        return Ok(Box::new(HttpAdvisor::new(url, &config)?));
    }

    let key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
        .context("no advisor configured: pass --advisor-url or set GEMINI_API_KEY")?;
    Ok(Box::new(GeminiAdvisor::new(config.with_api_key(key))?))
}

async fn convert(args: ConvertArgs) -> anyhow::Result<()> {
    let t_total = std::time::Instant::now();
    let settings = ConversionSettings {
        target_format: args.format,
        lossless: args.lossless,
        compression_speed: args.speed,
        max_file_size_kb: args.max_size_kb,
        ..ConversionSettings::default()
    };
    settings.validate()?;
    let advisor = build_advisor(&args)?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos:>3}% {msg}")
            .context("progress template")?,
    );
    let notify = {
        let pb = pb.clone();
        move |n: &Notice| pb.suspend(|| print_notice(n))
    };

    let intake = intake::intake_paths(&args.files, settings, &notify);
    if intake.records.is_empty() {
        pb.finish_and_clear();
        anyhow::bail!("no valid images to convert");
    }
    let store = FileSet::new();
    store.extend(intake.records);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling: files in flight will finish, the rest stay pending");
            token.cancel();
        })?;
    }

    let mut options = BatchOptions::new().with_cancel_token(token);
    if let Some(limit) = args.concurrency {
        options = options.with_max_concurrency(limit);
    }

    let on_progress = {
        let pb = pb.clone();
        move |p: &Progress| {
            pb.set_position(p.percent.round() as u64);
            pb.set_message(format!("{}/{} {}", p.finished, p.total, p.message));
        }
    };
    let summary = run_batch(&store, advisor.as_ref(), &options, &notify, &on_progress).await;
    pb.finish_and_clear();

    for (record, result) in store.done_results() {
        eprintln!(
            "  {} -> {} ({} KB): {}",
            record.source.name,
            result.file_name,
            result.data.len().div_ceil(1024),
            result.rationale
        );
    }

    if args.zip {
        // Failure is already reported through the notice.
        if let Ok(path) = package::save_archive(&store, &args.output, &print_notice) {
            eprintln!("Wrote {}", path.display());
        }
    } else {
        for path in package::save_all(&store, &args.output)? {
            eprintln!("Wrote {}", path.display());
        }
    }

    eprintln!(
        "Done! {} converted, {} failed, {} removed, {} skipped ({:.2}s)",
        summary.converted,
        summary.failed,
        summary.removed,
        summary.skipped,
        t_total.elapsed().as_secs_f64()
    );
    Ok(())
}

fn show_metadata(file: PathBuf) -> anyhow::Result<()> {
    match metadata::inspect_file(&file)? {
        MetadataReport::Tags(tags) => {
            let width = tags.iter().map(|t| t.name.len()).max().unwrap_or(0);
            for tag in tags {
                println!("{:width$}  {}", tag.name, tag.value, width = width);
            }
        }
        report => {
            if let MetadataReport::Unreadable(reason) = &report {
                tracing::debug!(%reason, "metadata unreadable");
            }
            println!("{}", report.message().unwrap_or_default());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Convert(args) => convert(args).await,
        Command::Metadata { file } => show_metadata(file),
    }
}
