use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vid2text::audio::FfmpegExtractor;
use vid2text::config::{Config, OutputFormat};
use vid2text::pipeline::{JobEvent, JobOutcome, JobStatus, Orchestrator};
use vid2text::request::{Diagnostics, TranscriptionRequest};
use vid2text::transcribe::WhisperClient;

#[derive(Parser)]
#[command(name = "vid2text")]
#[command(version, about = "Transcribe the speech in a video file to text")]
#[command(
    long_about = "Extract the audio track of a video, transcribe it in chunks with the OpenAI Whisper API and write the transcript as text or JSON."
)]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Output file (defaults to input name with the format's extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: text, json
    #[arg(short, long)]
    format: Option<String>,

    /// Language hint for recognition (e.g., en, ja, es)
    #[arg(short, long)]
    language: Option<String>,

    /// Chunk length in seconds
    #[arg(long)]
    chunk_secs: Option<u64>,

    /// Prefix each chunk with an [HH:MM:SS] marker in text output
    #[arg(long)]
    timestamps: bool,

    /// Number of concurrent API requests
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Enable verbose logging and detailed error messages
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Output path for `input`: the given one with a corrected extension, or
/// the input path with the format's extension.
fn resolve_output_path(input: &Path, output: Option<PathBuf>, format: OutputFormat) -> PathBuf {
    match output {
        Some(path) => {
            let corrected = format.ensure_extension(&path);
            if corrected != path {
                warn!(
                    "Output extension changed to .{}: {}",
                    format.extension(),
                    corrected.display()
                );
            }
            corrected
        }
        None => format.ensure_extension(input),
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_summary(outcome: &JobOutcome) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                    Transcription {:<20}", outcome.status);
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Job:        {}", outcome.id);

    if let Some(result) = &outcome.result {
        let meta = &result.metadata;
        println!("  Output:     {}", outcome.output.display());
        println!("  Words:      {}", meta.word_count);
        println!("  Characters: {}", meta.character_count);
        println!(
            "  Duration:   {:.1}s audio",
            meta.audio_duration.as_secs_f64()
        );
        println!(
            "  Chunks:     {} ({} failed)",
            meta.chunk_count, meta.failed_chunks
        );
        println!("  Total:      {:.2}s", outcome.elapsed.as_secs_f64());

        if !result.warnings.is_empty() {
            println!();
            println!("  Warnings:");
            for warning in &result.warnings {
                println!(
                    "    chunk {}: {} after {} attempt(s): {}",
                    warning.chunk_index, warning.kind, warning.attempts, warning.message
                );
            }
        }
    }

    if let Some(error) = &outcome.error {
        println!("  Error ({}):", error.kind);
        for line in error.message.lines() {
            println!("    {}", line);
        }
    }

    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(secs) = cli.chunk_secs {
        config.chunk_secs = secs;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    let format: OutputFormat = match &cli.format {
        Some(f) => f.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => config.default_format,
    };
    let output = resolve_output_path(&cli.input, cli.output, format);

    let mut pipeline_config = config.pipeline_config();
    pipeline_config.join.timestamps = cli.timestamps;

    let mut request = TranscriptionRequest::new(&cli.input, &output, format)
        .with_diagnostics(Diagnostics::from_verbose(cli.verbose))
        .with_config(pipeline_config);
    if let Some(language) = cli.language {
        request = request.with_language(language);
    }

    info!("Input:    {}", cli.input.display());
    info!("Output:   {}", output.display());
    info!("Format:   {}", format);

    let api_key = config.openai_api_key.clone().unwrap_or_default();
    let recognizer = WhisperClient::new(api_key)
        .with_timeout(Duration::from_secs(config.request_timeout_secs));
    let orchestrator = Orchestrator::new(Arc::new(FfmpegExtractor::new()), Arc::new(recognizer));

    let mut handle = orchestrator
        .submit(request)
        .context("Failed to start transcription")?;

    let cancel = handle.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current chunk...");
        cancel.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    let pb = progress_bar();
    let mut outcome = None;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Progress(update) => {
                pb.set_position((update.percentage * 10.0) as u64);
                pb.set_message(update.message);
            }
            JobEvent::Finished(finished) => {
                outcome = Some(finished);
                break;
            }
        }
    }

    let outcome = match outcome {
        Some(outcome) => outcome,
        None => handle.wait().await,
    };

    if outcome.status.is_success() {
        pb.finish_with_message(format!("✓ {}", outcome.status));
    } else {
        pb.abandon_with_message(format!("✗ {}", outcome.status));
    }
    print_summary(&outcome);

    Ok(match outcome.status {
        JobStatus::Completed | JobStatus::CompletedWithErrors => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
