use camcast::capture::{list_cameras, CameraSource, FrameSource};
use camcast::config::{RtspTransport, StreamConfig};
use camcast::error::StreamResult;
use camcast::pipeline::{PipelineSummary, StreamPipeline};
use camcast::push::{EncoderSupervisor, PushChannel, RetryPolicy};
use camcast::record::Mp4Recorder;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camcast v{}", env!("CARGO_PKG_VERSION"));

    let Some(config) = parse_args() else {
        // --list-cameras handled inline
        return Ok(());
    };

    // Gracefully stop the pipeline on SIGINT/SIGTERM; the loop and any
    // in-flight backoff sleep observe the flag.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .expect("Error setting Ctrl-C handler");
    }

    let summary = stream(&config, shutdown)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Wire the collaborators together and run one streaming session.
fn stream(config: &StreamConfig, shutdown: Arc<AtomicBool>) -> StreamResult<PipelineSummary> {
    let source = CameraSource::open(config.device.as_deref())?;
    let geometry = source.geometry();
    let pixel_format = source.pixel_format();

    let recorder = Mp4Recorder::create(&config.output_dir, &geometry, pixel_format)?;

    let supervisor = EncoderSupervisor::new(
        config.push_url.clone(),
        config.transport,
        geometry,
        pixel_format,
    );
    let push = PushChannel::open(
        supervisor,
        geometry.frame_rate,
        config.retry,
        shutdown.clone(),
    )?;

    StreamPipeline::new(source, recorder, push, shutdown).run()
}

/// Parse the CLI into a config, or `None` when an informational flag
/// already did all the work.
fn parse_args() -> Option<StreamConfig> {
    let defaults = RetryPolicy::default();

    let matches = Command::new("camcast")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("list-cameras")
                .long("list-cameras")
                .help("List connected cameras and exit.")
                .action(ArgAction::SetTrue)
                .conflicts_with("url"),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("RTSP_URL")
                .help("RTSP destination to push the stream to.")
                .required_unless_present("list-cameras"),
        )
        .arg(
            Arg::new("transport")
                .long("transport")
                .value_name("MODE")
                .help("RTSP transport mode (tcp/udp).")
                .default_value("tcp")
                .ignore_case(true),
        )
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("CAMERA")
                .help("Camera index or id (default: first camera)."),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Directory local recordings are written to.")
                .default_value("./recordings"),
        )
        .arg(
            Arg::new("backoff-ms")
                .long("backoff-ms")
                .value_name("MS")
                .help("Delay before each encoder restart."),
        )
        .arg(
            Arg::new("max-restarts")
                .long("max-restarts")
                .value_name("N")
                .help("Consecutive encoder restarts before giving up."),
        )
        .arg(
            Arg::new("floor-fps")
                .long("floor-fps")
                .value_name("FPS")
                .help("Lowest frame rate the push may degrade to."),
        )
        .arg(
            Arg::new("degradation-step")
                .long("degradation-step")
                .value_name("FPS")
                .help("Frame-rate reduction per consecutive restart."),
        )
        .get_matches();

    if matches.get_flag("list-cameras") {
        for (id, name) in list_cameras() {
            println!("{id}: {name}");
        }
        return None;
    }

    let transport = match matches.get_one::<String>("transport") {
        Some(mode) if mode.eq_ignore_ascii_case("udp") => RtspTransport::Udp,
        _ => RtspTransport::Tcp,
    };

    let retry = RetryPolicy {
        backoff_ms: parse_or(&matches, "backoff-ms", defaults.backoff_ms),
        max_consecutive_restarts: parse_or(
            &matches,
            "max-restarts",
            defaults.max_consecutive_restarts,
        ),
        floor_fps: parse_or(&matches, "floor-fps", defaults.floor_fps),
        degradation_step: parse_or(&matches, "degradation-step", defaults.degradation_step),
    };

    Some(StreamConfig {
        push_url: matches
            .get_one::<String>("url")
            .expect("--url is required")
            .clone(),
        transport,
        device: matches.get_one::<String>("device").cloned(),
        output_dir: PathBuf::from(
            matches
                .get_one::<String>("output-dir")
                .expect("--output-dir has a default")
                .clone(),
        ),
        retry,
    })
}

fn parse_or<T: std::str::FromStr + Copy>(
    matches: &clap::ArgMatches,
    name: &str,
    default: T,
) -> T {
    matches
        .get_one::<String>(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
