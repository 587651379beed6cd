//! stereo-recon CLI: camera calibration, stereo calibration and reconstruction.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use stereo_recon::calib::{load_mono, save_mono, save_stereo};
use stereo_recon::core::LogProgress;
use stereo_recon::disparity::{BlockMatchParams, MatcherConfig, SgmParams};
use stereo_recon::pipeline::{
    calibrate_camera_dir, calibrate_stereo_dirs, reconstruct_files, ReconstructRequest,
};
use stereo_recon::{PipelineError, ReconstructionConfig};

type CliResult<T> = Result<T, PipelineError>;

#[derive(Parser)]
#[command(name = "stereo-recon")]
#[command(about = "Calibrate a stereo camera rig and reconstruct colored point clouds")]
#[command(version)]
struct Cli {
    /// JSON run configuration; missing fields use defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON log lines (builds with the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate one camera from a folder of chessboard images.
    CalibrateCamera(CalibrateCameraArgs),

    /// Calibrate the rig from paired left/right folders and two camera artifacts.
    CalibrateStereo(CalibrateStereoArgs),

    /// Match a stereo pair and write a colored PLY point cloud.
    Reconstruct(ReconstructArgs),

    /// Print the effective configuration as JSON.
    ShowConfig,
}

#[derive(Debug, Clone, Args, Default)]
struct PatternArgs {
    /// Inner corners per chessboard row.
    #[arg(long)]
    cols: Option<u32>,

    /// Inner corners per chessboard column.
    #[arg(long)]
    rows: Option<u32>,

    /// Square edge length; sets the unit of every translation (default 0.025 m).
    #[arg(long)]
    square_size: Option<f64>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateCameraArgs {
    /// Folder of calibration images.
    #[arg(long)]
    images: PathBuf,

    /// Output camera artifact (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Write every detection with its corners drawn into this folder.
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    #[command(flatten)]
    pattern: PatternArgs,
}

#[derive(Debug, Clone, Args)]
struct CalibrateStereoArgs {
    /// Folder of left-camera images.
    #[arg(long)]
    left: PathBuf,

    /// Folder of right-camera images, paired with `--left` by sorted position.
    #[arg(long)]
    right: PathBuf,

    /// Left camera artifact from `calibrate-camera`.
    #[arg(long)]
    left_camera: PathBuf,

    /// Right camera artifact from `calibrate-camera`.
    #[arg(long)]
    right_camera: PathBuf,

    /// Output stereo artifact (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Rectification scaling: 0 keeps only valid pixels, 1 keeps all source pixels.
    #[arg(long)]
    alpha: Option<f64>,

    #[command(flatten)]
    pattern: PatternArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MatcherArg {
    Sgm,
    BlockMatch,
}

#[derive(Debug, Clone, Args)]
struct ReconstructArgs {
    /// Left image.
    #[arg(long)]
    left: PathBuf,

    /// Right image.
    #[arg(long)]
    right: PathBuf,

    /// Stereo artifact from `calibrate-stereo`.
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Artifact whose `Q` matrix overrides the stereo artifact's.
    #[arg(long)]
    q: Option<PathBuf>,

    /// Undistort and rectify the pair before matching (needs `--calibration`).
    #[arg(long)]
    rectify: bool,

    /// Matching strategy; overrides the configured kind with its defaults.
    #[arg(long, value_enum)]
    matcher: Option<MatcherArg>,

    /// Output point cloud (ASCII PLY).
    #[arg(long)]
    out: PathBuf,

    /// Also write the normalized disparity map as an image.
    #[arg(long)]
    disparity: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        if cli.verbose > 0 && std::env::var_os("RUST_LOG").is_none() {
            eprintln!("tracing builds read their filter from RUST_LOG; -v is ignored");
        }
        stereo_recon::core::init_tracing(cli.log_json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = stereo_recon::core::level_from_verbosity(cli.verbose);
        if let Err(e) = stereo_recon::core::init_with_level(level) {
            eprintln!("logger setup failed: {e}");
        }
        if cli.log_json {
            log::warn!("--log-json needs a build with the `tracing` feature");
        }
    }
}

fn load_config(cli: &Cli) -> CliResult<ReconstructionConfig> {
    let config = match &cli.config {
        Some(path) => ReconstructionConfig::load_json(path)?,
        None => ReconstructionConfig::default(),
    };
    Ok(config)
}

fn apply_pattern(config: &mut ReconstructionConfig, args: &PatternArgs) -> CliResult<()> {
    if let Some(cols) = args.cols {
        config.pattern.cols = cols;
    }
    if let Some(rows) = args.rows {
        config.pattern.rows = rows;
    }
    if let Some(size) = args.square_size {
        config.pattern.square_size = size;
    }
    config.pattern.validate()?;
    Ok(())
}

fn run_calibrate_camera(
    mut config: ReconstructionConfig,
    args: &CalibrateCameraArgs,
) -> CliResult<()> {
    apply_pattern(&mut config, &args.pattern)?;
    let out = calibrate_camera_dir(
        &args.images,
        &config,
        args.debug_dir.as_deref(),
        &LogProgress::default(),
    )?;
    for name in &out.report.missing {
        log::warn!("chessboard not found in {name}");
    }
    save_mono(&args.out, &out.calibration.intrinsics)?;
    println!(
        "calibrated from {}/{} images, rms {:.4} px -> {}",
        out.report.detected.len(),
        out.report.total(),
        out.calibration.intrinsics.rms,
        args.out.display()
    );
    Ok(())
}

fn run_calibrate_stereo(
    mut config: ReconstructionConfig,
    args: &CalibrateStereoArgs,
) -> CliResult<()> {
    apply_pattern(&mut config, &args.pattern)?;
    if let Some(alpha) = args.alpha {
        config.rectify.alpha = alpha;
    }
    let left = load_mono(&args.left_camera)?;
    let right = load_mono(&args.right_camera)?;
    let out = calibrate_stereo_dirs(
        &args.left,
        &args.right,
        &left,
        &right,
        &config,
        &LogProgress::default(),
    )?;
    save_stereo(&args.out, &out.artifact)?;
    println!(
        "calibrated from {} pairs, rms {:.4} px, baseline {:.4} -> {}",
        out.pairs,
        out.calibration.rms,
        out.artifact.extrinsics.baseline(),
        args.out.display()
    );
    Ok(())
}

fn run_reconstruct(mut config: ReconstructionConfig, args: &ReconstructArgs) -> CliResult<()> {
    match (args.matcher, config.matcher) {
        (Some(MatcherArg::Sgm), MatcherConfig::BlockMatch(_)) => {
            config.matcher = MatcherConfig::Sgm(SgmParams::default());
        }
        (Some(MatcherArg::BlockMatch), MatcherConfig::Sgm(_)) => {
            config.matcher = MatcherConfig::BlockMatch(BlockMatchParams::default());
        }
        _ => {}
    }
    let request = ReconstructRequest {
        left_image: args.left.clone(),
        right_image: args.right.clone(),
        calibration: args.calibration.clone(),
        q_file: args.q.clone(),
        rectify: args.rectify,
        ply_out: args.out.clone(),
        disparity_out: args.disparity.clone(),
    };
    let result = reconstruct_files(&request, &config, &LogProgress { every: 64 })?;
    println!("{} points -> {}", result.cloud.len(), args.out.display());
    Ok(())
}

fn run_show_config(config: &ReconstructionConfig) -> CliResult<()> {
    let json = serde_json::to_string_pretty(config).map_err(|source| PipelineError::Config {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{json}");
    Ok(())
}

fn try_main(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli)?;
    config.validate()?;
    match &cli.command {
        Commands::CalibrateCamera(args) => run_calibrate_camera(config, args),
        Commands::CalibrateStereo(args) => run_calibrate_stereo(config, args),
        Commands::Reconstruct(args) => run_reconstruct(config, args),
        Commands::ShowConfig => run_show_config(&config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
