//! Replays a WAV file through a translation session using the bundled
//! development bindings and writes the synthesized output as a WAV.
//!
//! ```text
//! cargo run -p parley-core --bin replay -- --input speech.wav --output out.wav
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use parley_core::inference::{StubRecognizer, ToneSynthesizer, TranslationRouter};
use parley_core::vad::EnergyVad;
use parley_core::{AudioFrame, Capabilities, SessionConfig, TranslationSession};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Inbound frames are cut to this length, like a WebRTC track delivers them.
const INPUT_FRAME_MS: u32 = 20;

/// Upper bound on waiting for the pipeline to drain after the last frame.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    source_lang: Option<String>,
    target_lang: Option<String>,
    voice: Option<String>,
    realtime: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut source_lang = None;
    let mut target_lang = None;
    let mut voice = None;
    let mut realtime = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .with_context(|| format!("missing value for {name}"))
        };
        match arg.as_str() {
            "--input" => input = Some(PathBuf::from(value("--input")?)),
            "--output" => output = Some(PathBuf::from(value("--output")?)),
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--source" => source_lang = Some(value("--source")?),
            "--target" => target_lang = Some(value("--target")?),
            "--voice" => voice = Some(value("--voice")?),
            "--realtime" => realtime = true,
            "--help" | "-h" => {
                println!(
                    "Usage: replay --input <in.wav> [--output <out.wav>] [--config <session.json>]\n\
                     \x20             [--source <lang>] [--target <lang>] [--voice <id>] [--realtime]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    let Some(input) = input else {
        bail!("--input is required");
    };
    Ok(Args {
        output: output.unwrap_or_else(|| input.with_extension("translated.wav")),
        input,
        config,
        source_lang,
        target_lang,
        voice,
        realtime,
    })
}

/// Decode the WAV into transport-shaped frames at its native rate and layout.
fn read_frames(path: &Path) -> anyhow::Result<Vec<AudioFrame>> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels;
    let per_frame = (spec.sample_rate * INPUT_FRAME_MS / 1000) as usize * channels as usize;
    if per_frame == 0 {
        bail!("unsupported sample rate {}", spec.sample_rate);
    }
    info!(
        sample_rate = spec.sample_rate,
        channels,
        bits = spec.bits_per_sample,
        "reading input"
    );

    let frames = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let samples = reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("decoding 16-bit samples")?;
            samples
                .chunks(per_frame)
                .map(|c| AudioFrame::from_i16(c, spec.sample_rate, channels))
                .collect()
        }
        (hound::SampleFormat::Float, 32) => {
            let samples = reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("decoding float samples")?;
            samples
                .chunks(per_frame)
                .map(|c| AudioFrame::from_f32(c, spec.sample_rate, channels))
                .collect()
        }
        (format, bits) => bail!("unsupported WAV encoding: {format:?} {bits}-bit"),
    };
    Ok(frames)
}

fn load_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SessionConfig::from_json(&json)?
        }
        None => SessionConfig::default(),
    };
    if let Some(lang) = &args.source_lang {
        config.source_lang = lang.clone();
    }
    if let Some(lang) = &args.target_lang {
        config.target_lang = lang.clone();
    }
    if let Some(voice) = &args.voice {
        config.voice = voice.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley_core=info,replay=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("replay failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = load_config(&args)?;
    let frames = read_frames(&args.input)?;

    let session = Arc::new(TranslationSession::new(
        config,
        Box::new(EnergyVad::default()),
        Capabilities::new(
            Arc::new(StubRecognizer::new()),
            Arc::new(TranslationRouter::new()),
            Arc::new(ToneSynthesizer::default()),
        ),
    ));
    session.start()?;

    let writer = {
        let session = Arc::clone(&session);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: parley_core::audio::CANONICAL_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut wav = hound::WavWriter::create(&args.output, spec)
            .with_context(|| format!("creating {}", args.output.display()))?;
        tokio::spawn(async move {
            let mut written = 0usize;
            while let Some(frame) = session.next_output_frame().await {
                for sample in frame.samples() {
                    wav.write_sample(sample)?;
                }
                written += 1;
            }
            wav.finalize()?;
            Ok::<usize, hound::Error>(written)
        })
    };

    info!(frames = frames.len(), realtime = args.realtime, "feeding input");
    let mut pace = tokio::time::interval(Duration::from_millis(INPUT_FRAME_MS as u64));
    for frame in &frames {
        if args.realtime {
            pace.tick().await;
        } else {
            tokio::task::yield_now().await;
        }
        session.on_audio_frame(frame);
    }
    session.finish_input();

    let written = match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
        Ok(joined) => joined.context("output writer task failed")??,
        Err(_) => {
            warn!("pipeline did not drain in time; stopping");
            session.stop().await;
            bail!("timed out waiting for output after {DRAIN_TIMEOUT:?}");
        }
    };
    session.stop().await;

    info!(
        frames = written,
        path = %args.output.display(),
        "wrote translated audio"
    );
    println!("{}", serde_json::to_string_pretty(&session.diagnostics())?);
    Ok(())
}
