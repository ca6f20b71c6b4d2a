//! tiff-resfix - TIFF resolution tag repair
//!
//! Checks XResolution / YResolution of TIFF files and patches implausible
//! values in place. Operate on copies: repaired files are overwritten.
//! Run with: cargo run --bin tiff-resfix -- <INPUT>

use anyhow::Context;
use clap::Parser;
use micrograph_tools::repair::is_tiff_file;
use micrograph_tools::{imagej_scale, inspect_dir, read_tags, repair_dir, AppSettings, OutcomeStatus};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tiff-resfix", version, about = "Repair invalid TIFF resolution tags")]
struct Args {
    /// TIFF file or directory to check
    input: PathBuf,

    /// Report what would change without writing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Resolution written when no existing value can be kept
    #[arg(long)]
    default_resolution: Option<f64>,

    /// Smallest plausible resolution
    #[arg(long = "min")]
    min_resolution: Option<f64>,

    /// Largest plausible resolution
    #[arg(long = "max")]
    max_resolution: Option<f64>,

    /// Largest plausible ratio between X and Y resolution
    #[arg(long)]
    max_aspect: Option<f64>,

    /// Print IFD0 tags and ImageJ scale instead of repairing
    #[arg(long)]
    inspect: bool,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Store the effective repair bounds as the new defaults
    #[arg(long)]
    save_settings: bool,
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let tags = read_tags(path).with_context(|| format!("Failed to read {}", path.display()))?;
    println!("📄 {}", path.display());
    for tag in tags {
        println!(
            "  {:>5} {:<26} type {:>2} x{:<4} {}",
            tag.tag,
            tag.name.as_deref().unwrap_or("?"),
            tag.field_type,
            tag.count,
            tag.value
        );
    }
    match imagej_scale(path) {
        Ok(scale) => println!(
            "  📏 {} x {} {} per pixel",
            scale.pixel_width(),
            scale.pixel_height(),
            scale.unit.as_deref().unwrap_or("unit")
        ),
        Err(e) => println!("  ⚠️ No scale: {}", e),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.inspect {
        let report = inspect_dir(&args.input, is_tiff_file, inspect)
            .with_context(|| format!("Cannot read {}", args.input.display()))?;
        for failure in report.failures() {
            println!("❌ {}: {}", failure.path.display(), failure.detail);
        }
        if report.failures().next().is_some() {
            anyhow::bail!("{} file(s) could not be inspected", report.count(OutcomeStatus::Failed));
        }
        return Ok(());
    }

    // File settings, then environment, then flags
    let mut settings = AppSettings::load();
    settings.apply_env();
    if let Some(value) = args.default_resolution {
        settings.default_resolution = value;
    }
    if let Some(value) = args.min_resolution {
        settings.min_resolution = value;
    }
    if let Some(value) = args.max_resolution {
        settings.max_resolution = value;
    }
    if let Some(value) = args.max_aspect {
        settings.max_aspect = value;
    }
    let policy = settings.repair_policy();
    policy.validate()?;
    if args.save_settings {
        settings.save().context("Failed to save settings")?;
        if let Some(path) = AppSettings::settings_path() {
            println!("💾 Settings saved to {}", path.display());
        }
    }

    println!("🔧 TIFF ResFix - resolution tag repair");
    println!("================================================");
    println!("Input: {}", args.input.display());
    println!(
        "Valid range: [{}, {}], max aspect {}",
        policy.min_resolution, policy.max_resolution, policy.max_aspect
    );
    println!("Default resolution: {}", policy.default_resolution);
    if args.dry_run {
        println!("Dry run: no files will be written");
    }
    println!("================================================\n");

    let report = repair_dir(&args.input, &policy, args.dry_run, |index, total, outcome| {
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
    let changed = if args.dry_run {
        ("Would repair", report.count(OutcomeStatus::WouldRepair))
    } else {
        ("Repaired", report.count(OutcomeStatus::Repaired))
    };
    println!(
        "{}: {}  Unchanged: {}  Skipped: {}  Failed: {}",
        changed.0,
        changed.1,
        report.count(OutcomeStatus::Unchanged),
        report.count(OutcomeStatus::Skipped),
        report.count(OutcomeStatus::Failed)
    );

    if let Some(path) = args.report {
        report
            .save_json(&path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("📝 Report written to {}", path.display());
    }

    if report.failures().next().is_some() {
        anyhow::bail!("{} file(s) could not be checked", report.count(OutcomeStatus::Failed));
    }
    Ok(())
}
