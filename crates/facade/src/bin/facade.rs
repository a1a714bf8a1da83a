//! `facade` command-line tool: camera calibration and facade stitching.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use facade::calib::{run_calibration, ViewOutcome};
use facade::stitch::run_stitch;
use facade::{AppConfig, FacadeError};
use log::{info, warn, LevelFilter};

#[derive(Parser)]
#[command(name = "facade")]
#[command(about = "Calibrate a camera from checkerboard images and stitch facade photo grids")]
#[command(version)]
struct Cli {
    /// Log verbosity of the stderr logger.
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Emit `tracing` spans instead of plain log lines (filtered by RUST_LOG).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    tracing: bool,

    /// Format tracing output as JSON.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true, requires = "tracing")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate from checkerboard images and undistort a second image set.
    Calibrate(CalibrateArgs),

    /// Stitch a grid of facade photographs into one image.
    Stitch(StitchArgs),

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Directory of checkerboard images.
    #[arg(long)]
    calibration_dir: Option<PathBuf>,

    /// Directory of images to undistort.
    #[arg(long)]
    distorted_dir: Option<PathBuf>,

    /// Where undistorted images and calibration.json are written.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StitchArgs {
    /// Directory of `<row>_<col>` named facade images.
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output image (default: <input-dir>/result.jpg).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write a JSON report of the run.
    #[arg(long)]
    report: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> Result<(), FacadeError> {
    #[cfg(feature = "tracing")]
    {
        if cli.tracing {
            facade::core::init_tracing(cli.json)?;
            return Ok(());
        }
    }
    facade::core::init_with_level(cli.log_level.into())?;
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> Result<(), FacadeError> {
    let config = AppConfig::load(args.config.as_deref())?;
    let paths = config.paths;
    let calibration_dir = args.calibration_dir.unwrap_or(paths.calibration_dir);
    let distorted_dir = args.distorted_dir.unwrap_or(paths.distorted_dir);
    let output_dir = args.output_dir.unwrap_or(paths.undistorted_dir);

    let report = run_calibration(
        &calibration_dir,
        &distorted_dir,
        &output_dir,
        &config.calibration,
    )?;
    for record in &report.views {
        if !record.outcome.is_accepted() {
            let reason = match &record.outcome {
                ViewOutcome::PatternNotFound { reason } | ViewOutcome::Unreadable { reason } => {
                    reason.clone()
                }
                ViewOutcome::SizeMismatch { expected, found } => format!(
                    "size {}x{} differs from {}x{}",
                    found[0], found[1], expected[0], expected[1]
                ),
                ViewOutcome::Accepted { .. } => String::new(),
            };
            warn!("{} rejected: {reason}", record.path.display());
        }
    }
    info!(
        "rms {:.4} px over {} views, {} images undistorted",
        report.calibration.rms,
        report.calibration.poses.len(),
        report.undistorted.len()
    );
    println!("{}", output_dir.display());
    Ok(())
}

fn run_stitch_command(args: StitchArgs) -> Result<(), FacadeError> {
    let config = AppConfig::load(args.config.as_deref())?;
    let paths = config.paths;
    let input_dir = args.input_dir.unwrap_or(paths.facade_dir);
    let output = args.output.or(paths.stitch_output);
    let report_path = args.report.or(paths.stitch_report);

    let report = run_stitch(&input_dir, output.as_deref(), report_path.as_deref(), &config.stitch)?;
    println!("{}", report.output.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FacadeError> {
    init_logging(&cli)?;
    match cli.command {
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Stitch(args) => run_stitch_command(args),
        Commands::DefaultConfig => {
            let json = serde_json::to_string_pretty(&AppConfig::default())?;
            println!("{json}");
            Ok(())
        }
    }
}
