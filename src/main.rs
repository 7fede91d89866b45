use anyhow::{Context, Result};
use camola_cutout::capture::WebcamCapture;
use camola_cutout::config::{
    DEFAULT_DILATE_PX, DEFAULT_EMA_ALPHA, DEFAULT_FEATHER_PX, DEFAULT_RGB_SCALE,
};
use camola_cutout::output::{self, OutputSink, V4L2Output};
use camola_cutout::pipeline::{OutputBuffer, Session, StopHandle};
use camola_cutout::segmentation;
use camola_cutout::{EdgeMode, ModelSelection, PipelineConfig};
use clap::Parser;
use image::Rgb;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Ticks per second (the display refresh the cut-out is produced at)
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    #[arg(long)]
    model: Option<String>,

    /// Model quality hint passed to the segmentation provider
    #[arg(long, value_enum, default_value_t = ModelSelection::General)]
    model_selection: ModelSelection,

    /// Edge softening radius in pixels
    #[arg(long, default_value_t = DEFAULT_FEATHER_PX)]
    feather_px: f32,

    /// Edge growth radius in pixels
    #[arg(long, default_value_t = DEFAULT_DILATE_PX)]
    dilate_px: f32,

    /// Weight of the newest mask in the temporal average (0-1)
    #[arg(long, default_value_t = DEFAULT_EMA_ALPHA)]
    ema_alpha: f32,

    /// Shrink factor for the colour layer (clamped to 0.97-1.0)
    #[arg(long, default_value_t = DEFAULT_RGB_SCALE)]
    rgb_scale: f32,

    /// Request a new mask every N ticks
    #[arg(long, default_value_t = 1)]
    mask_divider: u32,

    /// How the mask edge is grown and softened
    #[arg(long, value_enum, default_value_t = EdgeMode::CombinedBlur)]
    edge_mode: EdgeMode,

    /// Colour shown behind the cut-out on the loopback device (RRGGBB)
    #[arg(long, default_value = "00b140")]
    background: String,

    /// Show matte visualization (grayscale silhouette) instead of the cut-out
    #[arg(long)]
    show_matte: bool,
}

#[tokio::main(flavor = "current_thread")]
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

    tracing::info!("Camola cutout starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Target FPS: {}", args.fps);

    let config = PipelineConfig::builder()
        .model_selection(args.model_selection)
        .feather_px(args.feather_px)
        .dilate_px(args.dilate_px)
        .ema_alpha(args.ema_alpha)
        .rgb_scale(args.rgb_scale)
        .mask_request_divider(args.mask_divider)
        .edge_mode(args.edge_mode)
        .build()
        .context("Invalid pipeline settings")?;
    let background = output::parse_hex_color(&args.background)?;

    let capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
    )
    .context("Failed to initialize webcam capture")?;

    let mut builder = Session::builder(config)
        .frame_provider(Box::new(capture))
        .refresh_rate(args.fps);

    if let Some(model_path) = &args.model {
        let provider = segmentation::create_default_provider(model_path, args.model_selection)
            .context("Failed to load segmentation model")?;
        tracing::info!("Segmentation model loaded successfully");
        builder = builder.mask_provider(provider);
    }

    let mut session = builder
        .build()
        .context("Failed to create session (is --model set?)")?;

    let (width, height) = (args.capture_width, args.capture_height);
    let mut sink = V4L2Output::new(&args.output_device, width, height)
        .context("Failed to initialize v4l2loopback output")?;
    let (out_width, out_height) = sink.resolution();
    tracing::info!("Output: {}x{}", out_width, out_height);

    let stop = session.stop_handle();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping");
            ctrl_c.stop();
        }
    });
    tracing::info!("Press Ctrl+C to stop");

    let buffer = session.output();
    tokio::select! {
        result = session.run() => result.context("Pipeline failed")?,
        result = present(buffer, &mut sink, background, args.show_matte, &stop) => result?,
    }

    Ok(())
}

/// Push every new composite to the sink until the session goes away
async fn present<O: OutputSink>(
    mut buffer: OutputBuffer,
    sink: &mut O,
    background: Rgb<u8>,
    show_matte: bool,
    stop: &StopHandle,
) -> Result<()> {
    while buffer.changed().await {
        let frame = {
            let cutout = buffer.read();
            if show_matte {
                output::alpha_to_rgb(&cutout)
            } else {
                output::flatten_over(&cutout, background)
            }
        };

        if let Err(e) = sink.write_frame(&frame) {
            stop.stop();
            return Err(e).context("Failed to write frame");
        }
    }

    Ok(())
}
