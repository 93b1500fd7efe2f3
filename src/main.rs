use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use maskcam::capture::WebcamDevice;
use maskcam::output::V4L2Output;
use maskcam::render::Canvas;
use maskcam::schedule::TokioFrameScheduler;
use maskcam::segmentation::{ModelConfig, Normalization, OnnxModelLoader, OverlapPolicy};
use maskcam::webcam::{WebCam, WebCamOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputScale {
    /// Pixels scaled to [0, 1]
    Unit,
    /// Pixels scaled to [-1, 1]
    Symmetric,
}

impl From<InputScale> for Normalization {
    fn from(scale: InputScale) -> Self {
        match scale {
            InputScale::Unit => Normalization::UnitRange,
            InputScale::Symmetric => Normalization::Symmetric,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Path to the person segmentation model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Model input width
    #[arg(long, default_value_t = 256)]
    model_width: u32,

    /// Model input height
    #[arg(long, default_value_t = 256)]
    model_height: u32,

    /// How the model expects pixel values to be scaled
    #[arg(long, value_enum, default_value_t = InputScale::Unit)]
    input_scale: InputScale,

    /// Probability at or above which a pixel counts as person
    #[arg(long, default_value_t = maskcam::segmentation::DEFAULT_PERSON_THRESHOLD)]
    threshold: f32,

    /// Frame refresh rate in Hz
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Optional v4l2loopback device to present the canvas on
    #[arg(short, long)]
    output_device: Option<PathBuf>,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Drop frames while a previous estimate is still running
    #[arg(long)]
    skip_while_busy: bool,

    /// Run init and estimate immediately instead of waiting for commands
    #[arg(long)]
    auto: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("maskcam starting");
    tracing::info!("Model: {}", args.model.display());
    tracing::info!("Refresh rate: {} Hz", args.fps);

    let webcam = build_webcam(&args)?;

    if args.auto {
        webcam.setup().await;
        webcam.start_loop();
    }

    tracing::info!("Commands: init, estimate, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read command")? else {
                    break;
                };
                if !run_command(&webcam, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    webcam.teardown();
    tracing::info!("Stopped after {} frames drawn", webcam.canvas().generation());

    Ok(())
}

fn build_webcam(args: &Args) -> Result<WebCam> {
    let device = Arc::new(WebcamDevice::new(args.input_device));

    let mut config = ModelConfig::new(&args.model);
    config.input_width = args.model_width;
    config.input_height = args.model_height;
    config.normalization = args.input_scale.into();
    config.threshold = args.threshold;
    let loader = Arc::new(OnnxModelLoader::new(config));

    let scheduler = Arc::new(TokioFrameScheduler::new(args.fps).context("Failed to start frame scheduler")?);

    let canvas = match &args.output_device {
        Some(path) => {
            let output = V4L2Output::new(path, args.output_width, args.output_height)
                .context("Failed to initialize v4l2loopback output")?;
            Canvas::with_presenter(Box::new(output))
        }
        None => Canvas::new(),
    };

    let options = WebCamOptions {
        overlap: if args.skip_while_busy {
            OverlapPolicy::SkipWhileBusy
        } else {
            OverlapPolicy::LastWriteWins
        },
    };

    Ok(WebCam::new(device, loader, scheduler, canvas, options))
}

/// Returns false when the user asked to quit
async fn run_command(webcam: &WebCam, command: &str) -> bool {
    match command {
        "init" => {
            let status = webcam.setup().await;
            tracing::info!("Camera: {:?}", status);
        }
        "estimate" => webcam.start_loop(),
        "status" => {
            tracing::info!(
                "State: {:?}, camera: {:?}, model: {:?}, frames drawn: {}",
                webcam.state(),
                webcam.capture_status(),
                webcam.session().status(),
                webcam.canvas().generation()
            );
        }
        "quit" | "exit" => return false,
        "" => {}
        other => tracing::warn!("Unknown command '{}'", other),
    }
    true
}
