use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use anonymous_face::error::StartupError;
use anonymous_face::{
    default_output_path, is_supported_image, server, DetectionParams, FaceMasker, HttpFetcher,
    HttpPublisher, Keys, Workflow, WorkflowConfig, DEFAULT_MAX_FETCH_BYTES, DEFAULT_UPLOAD_URL,
};

#[derive(Parser)]
#[command(
    name = "anonymousface",
    about = "Mask faces in images linked from Nostr messages",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer signed messages over HTTP
    Serve(ServeArgs),
    /// Mask faces in a local image file or directory
    Mask(MaskArgs),
}

#[derive(Args)]
struct DetectionArgs {
    /// Facefinder cascade file
    #[arg(long, env = "ANONYMOUSFACE_CASCADE")]
    cascade: PathBuf,

    /// Mask image overriding the built-in one
    #[arg(long, env = "ANONYMOUSFACE_MASK")]
    mask: Option<PathBuf>,

    /// Smallest face side in pixels
    #[arg(long, default_value_t = DetectionParams::default().min_size)]
    min_size: u32,

    /// Largest face side in pixels
    #[arg(long, default_value_t = DetectionParams::default().max_size)]
    max_size: u32,

    /// Scan step as a fraction of the window side
    #[arg(long, default_value_t = DetectionParams::default().shift_factor)]
    shift_factor: f32,

    /// Growth factor between pyramid scales
    #[arg(long, default_value_t = DetectionParams::default().scale_factor)]
    scale_factor: f32,

    /// Minimum confidence for a face to be masked
    #[arg(long, default_value_t = DetectionParams::default().quality_threshold)]
    quality: f32,

    /// Overlap at which two hits count as the same face
    #[arg(long, default_value_t = DetectionParams::default().iou_threshold)]
    iou: f64,
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Signing key, as nsec1... or hex
    #[arg(long, env = "ANONYMOUSFACE_NSEC", hide_env_values = true)]
    nsec: String,

    /// Where anonymized images are uploaded
    #[arg(long, default_value = DEFAULT_UPLOAD_URL)]
    upload_url: String,

    /// Topic tag value that marks a message for this service
    #[arg(long, default_value = anonymous_face::workflow::DEFAULT_TRIGGER_LABEL)]
    trigger: String,

    /// Accept messages without checking their id and signature
    #[arg(long)]
    skip_verify: bool,

    /// Give up on a fetch or upload after this many seconds (default: wait)
    #[arg(long)]
    timeout: Option<u64>,

    /// Refuse linked images larger than this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FETCH_BYTES)]
    max_fetch_bytes: u64,

    #[command(flatten)]
    detection: DetectionArgs,
}

#[derive(Args)]
struct MaskArgs {
    /// Input image file or directory
    input: PathBuf,

    /// Output file or directory (default: {name}_masked.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    detection: DetectionArgs,
}

impl DetectionArgs {
    fn params(&self) -> DetectionParams {
        DetectionParams {
            min_size: self.min_size,
            max_size: self.max_size,
            shift_factor: self.shift_factor,
            scale_factor: self.scale_factor,
            quality_threshold: self.quality,
            iou_threshold: self.iou,
        }
    }

    fn load(&self) -> Result<FaceMasker, StartupError> {
        let cascade = std::fs::read(&self.cascade)?;
        let mask = self.mask.as_ref().map(std::fs::read).transpose()?;
        FaceMasker::from_assets(&cascade, mask.as_deref(), self.params())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(&args),
        Command::Mask(args) => mask(&args),
    }
}

fn serve(args: &ServeArgs) -> ExitCode {
    let workflow = match build_workflow(args) {
        Ok(workflow) => Arc::new(workflow),
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        pubkey = %workflow.keys().public_key_hex(),
        upload = %args.upload_url,
        "signing identity loaded"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let result = runtime.block_on(run(addr, Arc::clone(&workflow)));
    drop(runtime);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_workflow(args: &ServeArgs) -> Result<Workflow, Box<dyn std::error::Error>> {
    let keys = Keys::parse(&args.nsec).map_err(StartupError::from)?;
    let masker = args.detection.load()?;
    let timeout = args.timeout.map(Duration::from_secs);
    let config = WorkflowConfig {
        trigger_label: args.trigger.clone(),
        verify_signatures: !args.skip_verify,
    };
    Ok(Workflow::new(
        Arc::new(masker),
        keys,
        Box::new(HttpFetcher::new(timeout)?.with_max_bytes(args.max_fetch_bytes)),
        Box::new(HttpPublisher::new(args.upload_url.clone(), timeout)?),
        config,
    ))
}

async fn run(addr: SocketAddr, workflow: Arc<Workflow>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, server::router(workflow))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await
}

fn mask(args: &MaskArgs) -> ExitCode {
    let masker = match args.detection.load() {
        Ok(masker) => masker,
        Err(e) => {
            eprintln!("Fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !args.input.exists() {
        eprintln!("Error: Input path does not exist: {}", args.input.display());
        return ExitCode::FAILURE;
    }

    let jobs = if args.input.is_dir() {
        let Some(output_dir) = &args.output else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: anonymousface mask <input_dir> -o <output_dir>");
            return ExitCode::FAILURE;
        };
        match directory_jobs(&args.input, output_dir) {
            Ok(jobs) => jobs,
            Err(e) => {
                eprintln!("Error: Cannot read {}: {e}", args.input.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&args.input));
        vec![(args.input.clone(), output)]
    };

    let mut failed = 0usize;
    for (input, output) in &jobs {
        let name = input.file_name().map_or_else(
            || input.display().to_string(),
            |f| f.to_string_lossy().to_string(),
        );
        match masker.process_file(input, output) {
            Ok(faces) => eprintln!("[OK] {name}: {faces} face(s) -> {}", output.display()),
            Err(e) => {
                failed += 1;
                eprintln!("[FAIL] {name}: {e}");
            }
        }
    }

    if jobs.len() > 1 {
        eprintln!(
            "[Summary] Processed: {}, Failed: {failed}",
            jobs.len() - failed
        );
    }
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn directory_jobs(input: &Path, output_dir: &Path) -> std::io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut inputs: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported_image(path))
        .collect();
    inputs.sort();

    Ok(inputs
        .into_iter()
        .map(|path| {
            let name = default_output_path(&path);
            let file = name.file_name().map(PathBuf::from).unwrap_or_default();
            (path, output_dir.join(file))
        })
        .collect())
}
