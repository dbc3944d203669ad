//! torchts: text-to-speech HTTP service and command-line renderer.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use torchts::{
    audio,
    backend::{onnx::OnnxLoader, Device},
    config::{GenerationConfig, ManagerConfig},
    download::ModelSource,
    generate::Generator,
    manager::ModelManager,
    phonemize,
    render::{read_text_file, render_document},
    server,
    session::SessionTracker,
};

#[derive(Parser)]
#[command(name = "torchts", version, about = "Text-to-speech service with on-demand model loading")]
struct Cli {
    /// Model package: a local directory or a HuggingFace repo id
    #[arg(long, env = "TORCHTS_MODEL")]
    model: String,

    /// Bundled espeak-ng-data directory (system data is used otherwise)
    #[arg(long, env = "ESPEAK_DATA_PATH")]
    espeak_data: Option<PathBuf>,

    #[command(flatten)]
    lifecycle: LifecycleArgs,

    /// Longest text chunk sent to the model, in characters
    #[arg(long, env = "TORCHTS_MAX_CHUNK_CHARS", default_value_t = torchts::chunk::DEFAULT_MAX_CHARS)]
    max_chunk_chars: usize,

    /// Dither before 16-bit quantisation
    #[arg(long, env = "TORCHTS_DITHER")]
    dither: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct LifecycleArgs {
    /// Idle seconds before the model is unloaded
    #[arg(long, env = "MODEL_UNLOAD_TIMEOUT", default_value_t = 300)]
    unload_timeout: u64,

    /// cpu or cuda
    #[arg(long, env = "MODEL_DEVICE")]
    device: Option<Device>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeArgs),

    /// Render text or a .txt/.md file to a WAV file
    Speak(SpeakArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "TORCHTS_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TORCHTS_PORT", default_value_t = 8000)]
    port: u16,

    /// Seconds an unfinished chunk walk stays stoppable between requests
    #[arg(long, env = "TORCHTS_SESSION_TTL", default_value_t = 600)]
    session_ttl: u64,
}

#[derive(Args)]
struct SpeakArgs {
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    text: Option<String>,

    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long, default_value = "af_heart")]
    voice: String,

    #[arg(long, default_value_t = 1.0)]
    speed: f32,

    #[arg(short, long, default_value = "output.wav")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.espeak_data {
        phonemize::set_data_path(path);
    }

    let source = ModelSource::parse(&cli.model);
    tracing::info!(model = %source, "using model package");
    let manager_config = ManagerConfig {
        unload_timeout: Duration::from_secs(cli.lifecycle.unload_timeout),
        device: cli.lifecycle.device,
        ..Default::default()
    };
    let models = Arc::new(ModelManager::new(Arc::new(OnnxLoader::new(source)), manager_config));
    let generation = GenerationConfig {
        max_chunk_chars: cli.max_chunk_chars,
        dither: cli.dither,
        ..Default::default()
    };

    match cli.command {
        Command::Serve(args) => {
            let addr: SocketAddr = format!("{}:{}", args.host, args.port)
                .parse()
                .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;
            let sessions = Arc::new(SessionTracker::with_ttl(Duration::from_secs(args.session_ttl)));
            let generator = Arc::new(Generator::new(models, sessions, generation));
            server::serve(generator, addr).await
        }
        Command::Speak(args) => {
            let result = tokio::task::spawn_blocking(move || {
                let outcome = speak(&models, &args, &generation);
                models.shutdown();
                outcome
            })
            .await
            .context("Renderer panicked")?;
            result
        }
    }
}

fn speak(models: &ModelManager, args: &SpeakArgs, config: &GenerationConfig) -> Result<()> {
    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_text_file(path)?,
        (None, None) => anyhow::bail!("Pass --text or --file"),
    };

    let mut samples = render_document(models, &text, &args.voice, args.speed, config)?;
    audio::normalize(&mut samples);
    let pcm = if config.dither {
        let mut rng = rand::thread_rng();
        audio::quantize(&samples, Some(&mut rng as &mut dyn rand::RngCore))
    } else {
        audio::quantize(&samples, None)
    };
    audio::write_wav(&pcm, &args.output)
}
