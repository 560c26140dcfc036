use anyhow::Context;
use clap::{Parser, ValueEnum};
use pitchscribe_domain::io::exporter_for;
use pitchscribe_domain::{ExportFormat, ReportExporter, TranscriptionConfig};
use pitchscribe_transcriber::{TranscriptionJob, TranscriptionPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ExportFormat::Json,
            OutputFormat::Yaml => ExportFormat::Yaml,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Transcribe pitch detector output into timed note events",
    long_about = None
)]
struct Cli {
    /// Detector capture (JSON or YAML)
    capture: String,
    /// Run configuration (JSON or YAML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Close a note still sounding at the end of the stream
    #[arg(long)]
    force_final_note_off: bool,
    /// Ignore frames below this detector confidence
    #[arg(long)]
    min_confidence: Option<f32>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TranscriptionConfig::load(path)
            .with_context(|| format!("load config {}", path))?,
        None => TranscriptionConfig::default(),
    };
    if cli.force_final_note_off {
        config.force_final_note_off = true;
    }
    if cli.min_confidence.is_some() {
        config.min_confidence = cli.min_confidence;
    }
    info!(?config, "starting transcription");

    let pipeline = TranscriptionPipeline::new(config)?;
    let job = TranscriptionJob {
        capture_path: cli.capture,
    };
    let report = pipeline.transcribe(&job)?;
    let bytes = exporter_for(cli.format.into()).export(&report, cli.format.into())?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
