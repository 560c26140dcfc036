use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pitchscribe_domain::{DetectorCapture, Frame, Onset};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Convert aubiopitch/aubioonset output into a detector capture"
)]
struct Args {
    /// `aubiopitch -T seconds --pitch-unit Hz` output: one `time hz` pair per line
    pitch: PathBuf,
    /// `aubioonset` output: one onset time in seconds per line
    #[arg(long)]
    onsets: Option<PathBuf>,
    #[arg(long, default_value_t = 256)]
    hop_size: u32,
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,
    /// Write the capture here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let pitch_text = fs::read_to_string(&args.pitch)
        .with_context(|| format!("read pitch track {}", args.pitch.display()))?;
    let onset_text = match &args.onsets {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("read onsets {}", path.display()))?,
        ),
        None => None,
    };

    let capture = build_capture(&args, &pitch_text, onset_text.as_deref())?;
    info!(
        frames = capture.frames.len(),
        onsets = capture.onsets.len(),
        "built detector capture"
    );

    let json = serde_json::to_string_pretty(&capture)?;
    match &args.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("write capture {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn build_capture(
    args: &Args,
    pitch_text: &str,
    onset_text: Option<&str>,
) -> Result<DetectorCapture> {
    let frames = parse_pitch_track(pitch_text).context("pitch track")?;
    let onsets = match onset_text {
        Some(text) => parse_onsets(text).context("onsets")?,
        None => Vec::new(),
    };
    Ok(DetectorCapture {
        sample_rate: Some(args.sample_rate),
        hop_size: Some(args.hop_size),
        frames,
        onsets,
        detections: Vec::new(),
    })
}

/// Frames from `time hz` lines. aubio reports silence as 0 Hz and has no
/// confidence channel, so every frame is fully confident.
fn parse_pitch_track(text: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for (number, line) in numbered_lines(text) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [time, hz] = fields.as_slice() else {
            bail!("line {}: expected `time hz`, got {:?}", number, line);
        };
        let time = parse_number(time, number)?;
        let hz = parse_number(hz, number)?;
        frames.push(Frame::new(frames.len() as u64, time, hz, 1.0));
    }
    debug!(frames = frames.len(), "parsed pitch track");
    Ok(frames)
}

fn parse_onsets(text: &str) -> Result<Vec<Onset>> {
    numbered_lines(text)
        .map(|(number, line)| parse_number(line, number).map(Onset::new))
        .collect()
}

/// Non-blank lines with their 1-based line numbers.
fn numbered_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

fn parse_number(field: &str, line: usize) -> Result<f64> {
    field
        .parse::<f64>()
        .with_context(|| format!("line {}: {:?} is not a number", line, field))
}
