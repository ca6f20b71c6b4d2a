//! dm4-convert - DigitalMicrograph to calibrated TIFF
//!
//! Converts a single DM3/DM4 file or every one found under a directory.
//! Run with: cargo run --bin dm4-convert -- <INPUT>

use anyhow::Context;
use clap::Parser;
use micrograph_tools::convert::is_dm_file;
use micrograph_tools::dm4::DmFile;
use micrograph_tools::{convert_dir, inspect_dir, AppSettings, Dm4Error, OutcomeStatus, PixelMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dm4-convert", version, about = "Convert DM3/DM4 micrographs to calibrated TIFF")]
struct Args {
    /// DM3/DM4 file or directory to convert
    input: PathBuf,

    /// Output directory (default: next to each source file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Prefix for output file names
    #[arg(short, long)]
    prefix: Option<String>,

    /// Pixel mapping
    #[arg(short, long, value_enum)]
    mode: Option<PixelMode>,

    /// Print the tag tree of each file instead of converting
    #[arg(long)]
    dump: bool,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Store the effective mode and prefix as the new defaults
    #[arg(long)]
    save_settings: bool,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // File settings, then environment, then flags
    let mut settings = AppSettings::load();
    settings.apply_env();
    if let Some(mode) = args.mode {
        settings.pixel_mode = mode;
    }
    if let Some(prefix) = args.prefix {
        settings.output_prefix = prefix;
    }
    if args.save_settings {
        settings.save().context("Failed to save settings")?;
        if let Some(path) = AppSettings::settings_path() {
            println!("💾 Settings saved to {}", path.display());
        }
    }
    let mut options = settings.convert_options();
    if let Some(dir) = args.output {
        options = options.with_destination(dir);
    }

    if args.dump {
        let report = inspect_dir(&args.input, is_dm_file, |path| {
            let file = DmFile::open(path)?;
            println!(
                "📄 {} (DM{}, {})",
                path.display(),
                file.version.number(),
                file.byte_order.as_str()
            );
            print!("{}", file.root.dump());
            Ok::<_, Dm4Error>(())
        })
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
        for failure in report.failures() {
            println!("❌ {}: {}", failure.path.display(), failure.detail);
        }
        if report.failures().next().is_some() {
            anyhow::bail!("{} file(s) could not be parsed", report.count(OutcomeStatus::Failed));
        }
        return Ok(());
    }

    println!("🔬 DM4 Convert - calibrated TIFF export");
    println!("================================================");
    println!("Input: {}", args.input.display());
    match &options.destination {
        Some(dir) => println!("Output: {}", dir.display()),
        None => println!("Output: next to source files"),
    }
    println!("Pixel mode: {}", options.mode.as_str());
    if !options.prefix.is_empty() {
        println!("Prefix: {}", options.prefix);
    }
    println!("================================================\n");

    let report = convert_dir(&args.input, &options, |index, total, outcome| {
        println!(
            "{} [{}/{}] {}: {}",
            outcome.status.glyph(),
            index,
            total,
            outcome.path.display(),
            outcome.detail
        );
    })
    .with_context(|| format!("Cannot read {}", args.input.display()))?;

    println!("\n================================================");
    println!(
        "Converted: {}  Failed: {}  Skipped: {}",
        report.count(OutcomeStatus::Converted),
        report.count(OutcomeStatus::Failed),
        report.count(OutcomeStatus::Skipped)
    );

    if let Some(path) = args.report {
        report
            .save_json(&path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("📝 Report written to {}", path.display());
    }

    if report.outcomes.is_empty() {
        println!("⚠️ No DM3/DM4 files found");
    }
    if report.failures().next().is_some() {
        anyhow::bail!("{} file(s) failed to convert", report.count(OutcomeStatus::Failed));
    }
    Ok(())
}
