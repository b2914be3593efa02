use std::f32::consts::TAU;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use spectrograph_core::gl::HeadlessContext;
use spectrograph_core::render::CompositionTemplate;
use spectrograph_core::{AppConfig, AssetSource, AssetStore, FileAssetSource, Visualizer};
use tracing_subscriber::EnvFilter;

fn main() -> spectrograph_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            assets,
            frames,
            frequency,
            fps,
        } => run_headless(config.as_deref(), assets.as_deref(), frames, frequency, fps),
        Commands::Shader { config } => print_shader(config.as_deref()),
        Commands::Config => print_default_config(),
    }
}

fn load_config(path: Option<&Path>) -> spectrograph_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_headless(
    config: Option<&Path>,
    assets: Option<&Path>,
    frames: u32,
    frequency: f32,
    fps: u32,
) -> spectrograph_core::Result<()> {
    let config = load_config(config)?;
    let sample_rate = config.audio.sample_rate;
    tracing::info!(frames, frequency, fps, "starting headless run");

    let mut gl = HeadlessContext::new();
    let mut visualizer = Visualizer::new(&mut gl, config)?;

    let source: Box<dyn AssetSource> = match assets {
        Some(root) => Box::new(FileAssetSource::new(root)),
        None => Box::new(AssetStore::with_builtin()),
    };
    pollster::block_on(visualizer.load(&mut gl, source.as_ref()))?;

    let fps = fps.max(1);
    let block_len = (sample_rate / fps) as usize;
    let mut tone = Tone::new(frequency, sample_rate as f32);
    let mut block = vec![0.0; block_len];
    let mut draws = 0;
    for _ in 0..frames {
        tone.fill(&mut block);
        gl.take_commands();
        visualizer.frame(&mut gl, &block, 1.0 / f64::from(fps))?;
        draws += gl.draw_call_count();
    }

    let strength = visualizer.audio().spectrum().frequency_strength(frequency)?;
    tracing::info!(
        frames,
        draws,
        seconds = visualizer.clock().time_seconds,
        ?strength,
        "headless run finished"
    );
    visualizer.release(&mut gl);
    Ok(())
}

fn print_shader(config: Option<&Path>) -> spectrograph_core::Result<()> {
    let config = load_config(config)?;
    let source = CompositionTemplate::default().generate(&config.render.blend_modes());
    println!("{source}");
    Ok(())
}

fn print_default_config() -> spectrograph_core::Result<()> {
    println!("{}", AppConfig::default().to_json_string()?);
    Ok(())
}

/// Sine generator that keeps its phase across blocks.
struct Tone {
    step: f32,
    phase: f32,
}

impl Tone {
    fn new(frequency: f32, sample_rate: f32) -> Self {
        Self {
            step: TAU * frequency / sample_rate,
            phase: 0.0,
        }
    }

    fn fill(&mut self, block: &mut [f32]) {
        for sample in block {
            *sample = 0.5 * self.phase.sin();
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive layered visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render frames of a synthetic tone against the headless backend.
    Run {
        /// JSON configuration file; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory to load shader templates from instead of the bundled ones.
        #[arg(short, long)]
        assets: Option<PathBuf>,
        /// Number of frames to render.
        #[arg(short, long, default_value_t = 120)]
        frames: u32,
        /// Frequency of the generated tone in Hz.
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
        #[arg(long, default_value_t = 60)]
        fps: u32,
    },
    /// Print the composition shader generated for a configuration.
    Shader {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as JSON.
    Config,
}
