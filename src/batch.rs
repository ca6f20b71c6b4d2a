//! Directory sweeps with per-file outcomes.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::atomic::write_bytes_atomic;
use crate::convert::{convert_file, is_dm_file, ConvertError, ConvertOptions};
use crate::raster::TiffError;
use crate::repair::{is_tiff_file, repair_file, RepairAction, RepairError, RepairPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Converted,
    Repaired,
    WouldRepair,
    Unchanged,
    Skipped,
    Inspected,
    Failed,
}

impl OutcomeStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            OutcomeStatus::Converted | OutcomeStatus::Repaired => "✅",
            OutcomeStatus::WouldRepair => "🔧",
            OutcomeStatus::Unchanged => "👌",
            OutcomeStatus::Skipped => "⏭️",
            OutcomeStatus::Inspected => "🔍",
            OutcomeStatus::Failed => "❌",
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: OutcomeStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl FileOutcome {
    fn new(path: &Path, status: OutcomeStatus, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            detail: detail.into(),
            output: None,
        }
    }
}

/// Summary of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub root: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    fn start(root: &Path) -> Self {
        let now = Local::now();
        Self {
            root: root.to_path_buf(),
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    /// Write the report as pretty JSON.
    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_bytes_atomic(path, json.as_bytes())
    }
}

/// Files under `root` accepted by `matches`, sorted.
///
/// A file given as `root` is returned as is. Unreadable subdirectories are
/// logged and skipped.
pub fn collect_files(root: &Path, matches: impl Fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(root)?;
    if meta.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() && matches(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

/// Convert every DM3 / DM4 file under `root`.
///
/// `progress` is called after each file with its 1-based index, the total
/// and the outcome.
pub fn convert_dir(
    root: &Path,
    options: &ConvertOptions,
    mut progress: impl FnMut(usize, usize, &FileOutcome),
) -> io::Result<BatchReport> {
    let files = collect_files(root, is_dm_file)?;
    if let Some(dir) = &options.destination {
        std::fs::create_dir_all(dir)?;
    }
    let mut report = BatchReport::start(root);
    for (index, path) in files.iter().enumerate() {
        let outcome = match convert_file(path, options) {
            Ok(conversion) => FileOutcome {
                output: Some(conversion.output),
                ..FileOutcome::new(
                    path,
                    OutcomeStatus::Converted,
                    format!(
                        "{}x{}x{} at {} {}/px",
                        conversion.width,
                        conversion.height,
                        conversion.frames,
                        conversion.calibration.scale_x,
                        conversion.calibration.unit
                    ),
                )
            },
            Err(ConvertError::NotDmFile(_)) => {
                FileOutcome::new(path, OutcomeStatus::Skipped, "not a DM3/DM4 file")
            }
            Err(e) => {
                error!("Failed to convert {}: {}", path.display(), e);
                FileOutcome::new(path, OutcomeStatus::Failed, e.to_string())
            }
        };
        progress(index + 1, files.len(), &outcome);
        report.outcomes.push(outcome);
    }
    report.finished_at = Local::now();
    Ok(report)
}

/// Check and repair every TIFF file under `root`.
pub fn repair_dir(
    root: &Path,
    policy: &RepairPolicy,
    dry_run: bool,
    mut progress: impl FnMut(usize, usize, &FileOutcome),
) -> io::Result<BatchReport> {
    let files = collect_files(root, is_tiff_file)?;
    let mut report = BatchReport::start(root);
    for (index, path) in files.iter().enumerate() {
        let outcome = match repair_file(path, policy, dry_run) {
            Ok(RepairAction::Unchanged(res)) => FileOutcome::new(
                path,
                OutcomeStatus::Unchanged,
                format!("{} x {}", res.x, res.y),
            ),
            Ok(RepairAction::Rewritten { after, reason, .. }) => FileOutcome::new(
                path,
                OutcomeStatus::Repaired,
                format!("{}; now {} x {}", reason, after.x, after.y),
            ),
            Ok(RepairAction::WouldRewrite { after, reason, .. }) => FileOutcome::new(
                path,
                OutcomeStatus::WouldRepair,
                format!("{}; would become {} x {}", reason, after.x, after.y),
            ),
            Err(RepairError::Tiff(
                e @ (TiffError::MissingTag(_) | TiffError::NotTiff | TiffError::Unsupported(_)),
            )) => {
                warn!("Skipping {}: {}", path.display(), e);
                FileOutcome::new(path, OutcomeStatus::Skipped, e.to_string())
            }
            Err(e) => {
                error!("Failed to repair {}: {}", path.display(), e);
                FileOutcome::new(path, OutcomeStatus::Failed, e.to_string())
            }
        };
        progress(index + 1, files.len(), &outcome);
        report.outcomes.push(outcome);
    }
    report.finished_at = Local::now();
    Ok(report)
}

/// Run `visit` on every file under `root` accepted by `matches`.
///
/// A failing file is recorded and the sweep moves on.
pub fn inspect_dir<E: std::fmt::Display>(
    root: &Path,
    matches: impl Fn(&Path) -> bool,
    mut visit: impl FnMut(&Path) -> Result<(), E>,
) -> io::Result<BatchReport> {
    let files = collect_files(root, matches)?;
    let mut report = BatchReport::start(root);
    for path in &files {
        let outcome = match visit(path) {
            Ok(()) => FileOutcome::new(path, OutcomeStatus::Inspected, ""),
            Err(e) => {
                warn!("Cannot inspect {}: {}", path.display(), e);
                FileOutcome::new(path, OutcomeStatus::Failed, e.to_string())
            }
        };
        report.outcomes.push(outcome);
    }
    report.finished_at = Local::now();
    Ok(report)
}
