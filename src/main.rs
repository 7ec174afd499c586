//! scentinel: quantify an analyte from a photographed sensor strip.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use scentinel::data::image_io::load_image;
use scentinel::{AssayConfig, AssayReport, AssayRun, CalibrationInput, DetectionFile};

#[derive(Parser)]
#[command(
    name = "scentinel",
    version,
    about = "Colorimetric sensor strip quantification"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one strip image
    Analyze {
        /// Strip image (PNG, JPEG, ...)
        #[arg(long)]
        image: PathBuf,

        /// Region detections as JSON
        #[arg(long)]
        detections: PathBuf,

        /// Calibration JSON: {"unknown": 3, "concentrations": {"1": "0", ...}}
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Object number of the unknown sample (overrides the calibration file)
        #[arg(long)]
        unknown: Option<usize>,

        /// Configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Toxicity threshold (overrides the configuration)
        #[arg(long)]
        threshold: Option<f64>,

        /// Write the report as JSON to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Write the run log here (.json for JSON, text otherwise)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Print JSON instead of the text table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write the default configuration to a file
    InitConfig { path: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig { path } => {
            AssayConfig::default().save(&path)?;
            ::log::info!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Command::Analyze {
            image,
            detections,
            calibration,
            unknown,
            config,
            threshold,
            out,
            log,
            json,
        } => {
            ::log::info!("scentinel v{}", env!("CARGO_PKG_VERSION"));

            let mut cfg = match &config {
                Some(path) => AssayConfig::load(path)?,
                None => AssayConfig::default(),
            };
            if let Some(t) = threshold {
                cfg = cfg.with_threshold(t);
            }

            let input = calibration_input(calibration.as_deref(), unknown)?;
            let img = load_image(&image)?;
            let detector = DetectionFile::load(&detections)?;
            let source = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut run = AssayRun::run_to_calibration(img, &detector, cfg, &source)?;

            let outcome = match &input {
                Some(input) => run.calibrate(input).map(|_| ()),
                None => {
                    ::log::info!("No calibration given; stopping before the curve fit");
                    Ok(())
                }
            };

            let report = run.report();
            emit(&report, out.as_deref(), json)?;
            if let Some(path) = &log {
                run.log().save(path)?;
                ::log::info!("Run log saved to {}", path.display());
            }

            outcome?;
            Ok(())
        }
    }
}

/// Merge the calibration file and `--unknown`; `None` when neither is given.
fn calibration_input(
    path: Option<&Path>,
    unknown: Option<usize>,
) -> Result<Option<CalibrationInput>, Box<dyn std::error::Error>> {
    let mut input = match path {
        Some(p) => CalibrationInput::load(p)?,
        None => match unknown {
            Some(u) => return Ok(Some(CalibrationInput::new(u))),
            None => return Ok(None),
        },
    };
    if unknown.is_some() {
        input.unknown = unknown;
    }
    Ok(Some(input))
}

fn emit(report: &AssayReport, out: Option<&Path>, json: bool) -> std::io::Result<()> {
    if let Some(path) = out {
        std::fs::write(path, report.to_json())?;
        ::log::info!("Report written to {}", path.display());
    }
    if json {
        println!("{}", report.to_json());
    } else {
        print!("{}", report.to_text());
    }
    Ok(())
}
