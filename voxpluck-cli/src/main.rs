//! Voxpluck CLI: hum into the microphone, hear a plucked string.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use voxpluck_engine::context::list_devices;
use voxpluck_engine::{AudioContext, DeviceSelection, EngineConfig, PitchReading, ScaleDefinition, ScaleKind};

#[derive(Debug, Parser)]
#[command(name = "voxpluck")]
#[command(about = "Real-time hum-to-string player")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List audio input and output devices.
    Devices,
    /// List the built-in scales.
    Scales,
    /// Start a live session.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// JSON config file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Input device name (default device if omitted).
    #[arg(long)]
    input: Option<String>,
    /// Output device name (default device if omitted).
    #[arg(long)]
    output: Option<String>,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Scale name, e.g. `major`, `pentatonic-minor`, `blues`.
    #[arg(long)]
    scale: Option<String>,
    /// Key, e.g. `C`, `F#`, `Bb`.
    #[arg(long)]
    key: Option<String>,
    /// Correction strength, 0..1.
    #[arg(long)]
    amount: Option<f32>,
    /// String resonance (feedback), 0..0.9999.
    #[arg(long)]
    resonance: Option<f32>,
    /// Damping cutoff in Hz (brightness).
    #[arg(long)]
    damping: Option<f32>,
    /// Output volume, 0..1.
    #[arg(long)]
    volume: Option<f32>,
    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,
    /// Print the recorded note events as JSON when the session ends.
    #[arg(long)]
    print_notes: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn list_audio_devices() -> Result<()> {
    let list = list_devices().context("enumerating audio devices")?;
    let mark = |name: &str, default: &Option<String>| if default.as_deref() == Some(name) { " (default)" } else { "" };
    println!("Input devices:");
    for name in &list.inputs {
        println!("- {name}{}", mark(name, &list.default_input));
    }
    println!("Output devices:");
    for name in &list.outputs {
        println!("- {name}{}", mark(name, &list.default_output));
    }
    Ok(())
}

fn list_scales() {
    println!("Available scales:");
    for kind in ScaleKind::CATALOG {
        let scale = ScaleDefinition::catalog(kind);
        println!("- {:<17} {:?}", kind.name(), scale.pitch_classes());
    }
    println!("- {:<17} (pitch classes from the config file)", ScaleKind::Custom.name());
}

fn load_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(scale) = &args.scale { cfg.corrector.scale = scale.clone(); }
    if let Some(key) = &args.key     { cfg.corrector.key = key.clone(); }
    if let Some(a) = args.amount     { cfg.corrector.amount = a; }
    if let Some(r) = args.resonance  { cfg.synth.resonance = r; }
    if let Some(d) = args.damping    { cfg.synth.damping_hz = d; }
    if let Some(v) = args.volume     { cfg.synth.volume = v; }
    Ok(cfg)
}

fn print_reading(r: &PitchReading) {
    match r.frequency {
        Some(f) => println!(
            "{:>2}{:<2} {:+6.1} cents  {:7.2} Hz  conf {:.2}  vol {:.3}",
            r.note, r.octave, r.cents, f, r.confidence, r.volume
        ),
        None => println!("--          (silence)        vol {:.3}", r.volume),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let resolved = load_config(args)?.resolve();
    let scale = resolved.corrector.scale.name();
    let key = resolved.corrector.key_offset;
    let selection = DeviceSelection {
        input: args.input.clone(),
        output: args.output.clone(),
        sample_rate: args.sample_rate,
    };

    println!("voxpluck: real-time hum-to-string player\n");

    let mut ctx = AudioContext::new(resolved, selection);
    ctx.init().context("initialising audio devices")?;
    ctx.start().context("starting capture")?;

    if let (Some(mode), Some(latency)) = (ctx.mode(), ctx.latency()) {
        println!("Capture mode: {}  | block latency {:.2} ms", mode.name(), latency.buffer_ms());
    }
    println!("Scale: {scale}  | Key: {}", voxpluck_engine::tuning::NOTE_NAMES[usize::from(key)]);
    if let Some(d) = args.duration { println!("Auto-stop after {d} seconds"); }
    println!("Press Ctrl+C to stop…\n");

    let readings = ctx.readings();
    let started = Instant::now();
    let limit = args.duration.map(Duration::from_secs);
    let mut last_print = Instant::now();
    let mut last_latency = Instant::now();
    let mut latest: Option<PitchReading> = None;

    while limit.map_or(true, |l| started.elapsed() < l) {
        if let Ok(r) = readings.recv_timeout(Duration::from_millis(50)) {
            latest = Some(r);
            latest = readings.try_iter().last().or(latest);
        }
        if last_print.elapsed() >= Duration::from_millis(250) {
            if let Some(r) = latest.take() {
                print_reading(&r);
            }
            last_print = Instant::now();
        }
        if last_latency.elapsed() >= Duration::from_secs(5) {
            if let Some(info) = ctx.latency() {
                println!(
                    "[latency] buffer {:.2} ms + hardware {:.2} ms = {:.2} ms ({:?})",
                    info.buffer_ms(),
                    info.hardware_ms(),
                    info.total_ms(),
                    info.budget()
                );
            }
            last_latency = Instant::now();
        }
    }

    ctx.stop()?;
    // let the release tail ring out
    std::thread::sleep(Duration::from_millis(300));

    let notes = ctx.take_note_events();
    if args.print_notes {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else {
        println!("\nRecorded {} notes.", notes.len());
    }
    ctx.dispose();
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Command::Devices => list_audio_devices(),
        Command::Scales => {
            list_scales();
            Ok(())
        }
        Command::Run(args) => run(args),
    }
}
