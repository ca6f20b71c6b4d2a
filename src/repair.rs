//! Detection and in-place correction of bad TIFF resolution tags.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::atomic::write_bytes_atomic;
use crate::raster::{Resolution, TiffError, TiffLayout};

pub const DEFAULT_RESOLUTION: f64 = 1.0;
pub const MIN_RESOLUTION: f64 = 1e-4;
pub const MAX_RESOLUTION: f64 = 1e9;
pub const MAX_ASPECT: f64 = 10.0;

/// Repair errors for a single file.
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("Invalid repair policy: {0}")]
    Policy(String),
    #[error(transparent)]
    Tiff(#[from] TiffError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "XResolution",
            Axis::Y => "YResolution",
        })
    }
}

/// Why a resolution pair was rejected.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum InvalidTagValue {
    #[error("{axis} is not a finite number")]
    NotFinite { axis: Axis },
    #[error("{axis} is {value}, must be positive")]
    NotPositive { axis: Axis, value: f64 },
    #[error("{axis} is {value}, outside [{min}, {max}]")]
    OutOfRange { axis: Axis, value: f64, min: f64, max: f64 },
    #[error("XResolution {x} and YResolution {y} differ by more than {max_aspect}x")]
    AspectMismatch { x: f64, y: f64, max_aspect: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Valid,
    Invalid(InvalidTagValue),
}

/// Bounds for plausible resolution values and the fallback used when none
/// of the existing values can be kept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepairPolicy {
    pub default_resolution: f64,
    pub min_resolution: f64,
    pub max_resolution: f64,
    /// Largest allowed ratio between the two axes.
    pub max_aspect: f64,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            default_resolution: DEFAULT_RESOLUTION,
            min_resolution: MIN_RESOLUTION,
            max_resolution: MAX_RESOLUTION,
            max_aspect: MAX_ASPECT,
        }
    }
}

impl RepairPolicy {
    /// Reject bounds under which the default itself would be invalid.
    pub fn validate(&self) -> Result<(), RepairError> {
        let finite = [
            self.default_resolution,
            self.min_resolution,
            self.max_resolution,
            self.max_aspect,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(RepairError::Policy("values must be finite".to_string()));
        }
        if self.min_resolution <= 0.0 || self.min_resolution > self.max_resolution {
            return Err(RepairError::Policy(format!(
                "range [{}, {}] is empty or not positive",
                self.min_resolution, self.max_resolution
            )));
        }
        if self.max_aspect < 1.0 {
            return Err(RepairError::Policy(format!(
                "max aspect {} is below 1",
                self.max_aspect
            )));
        }
        self.check_axis(Axis::X, self.default_resolution)
            .map_err(|reason| RepairError::Policy(format!("default resolution: {}", reason)))
    }

    pub fn check_axis(&self, axis: Axis, value: f64) -> Result<(), InvalidTagValue> {
        if !value.is_finite() {
            return Err(InvalidTagValue::NotFinite { axis });
        }
        if value <= 0.0 {
            return Err(InvalidTagValue::NotPositive { axis, value });
        }
        if value < self.min_resolution || value > self.max_resolution {
            return Err(InvalidTagValue::OutOfRange {
                axis,
                value,
                min: self.min_resolution,
                max: self.max_resolution,
            });
        }
        Ok(())
    }

    pub fn classify(&self, resolution: &Resolution) -> Classification {
        let checked = self
            .check_axis(Axis::X, resolution.x)
            .and_then(|_| self.check_axis(Axis::Y, resolution.y))
            .and_then(|_| {
                let (x, y) = (resolution.x, resolution.y);
                if x > self.max_aspect * y || y > self.max_aspect * x {
                    Err(InvalidTagValue::AspectMismatch {
                        x,
                        y,
                        max_aspect: self.max_aspect,
                    })
                } else {
                    Ok(())
                }
            });
        match checked {
            Ok(()) => Classification::Valid,
            Err(reason) => Classification::Invalid(reason),
        }
    }

    /// Square-pixel resolution to write in place of `resolution`.
    ///
    /// A single valid axis is copied to the other; otherwise both take the
    /// default. The unit is kept.
    pub fn replacement(&self, resolution: &Resolution) -> Resolution {
        let x_ok = self.check_axis(Axis::X, resolution.x).is_ok();
        let y_ok = self.check_axis(Axis::Y, resolution.y).is_ok();
        let value = match (x_ok, y_ok) {
            (true, false) => resolution.x,
            (false, true) => resolution.y,
            _ => self.default_resolution,
        };
        Resolution::new(value, value, resolution.unit)
    }
}

/// What [`repair_file`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    Unchanged(Resolution),
    Rewritten {
        before: Resolution,
        after: Resolution,
        reason: InvalidTagValue,
    },
    /// Dry run: the file would have been rewritten.
    WouldRewrite {
        before: Resolution,
        after: Resolution,
        reason: InvalidTagValue,
    },
}

/// `.tif` or `.tiff`, case-insensitive.
pub fn is_tiff_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// Check the resolution tags of `path` and patch them when invalid.
///
/// Only the rational payloads of XResolution and YResolution change; the
/// file is replaced atomically. A valid file is never written.
pub fn repair_file(path: &Path, policy: &RepairPolicy, dry_run: bool) -> Result<RepairAction, RepairError> {
    let mut bytes = std::fs::read(path).map_err(TiffError::from)?;
    let layout = TiffLayout::parse(&bytes)?;
    let before = layout.resolution(&bytes)?;

    let reason = match policy.classify(&before) {
        Classification::Valid => {
            debug!("{}: resolution {} x {} is valid", path.display(), before.x, before.y);
            return Ok(RepairAction::Unchanged(before));
        }
        Classification::Invalid(reason) => reason,
    };
    let after = policy.replacement(&before);

    if dry_run {
        info!("Would repair {}: {}", path.display(), reason);
        return Ok(RepairAction::WouldRewrite {
            before,
            after,
            reason,
        });
    }

    layout.patch_resolution(&mut bytes, &after)?;
    write_bytes_atomic(path, &bytes).map_err(TiffError::from)?;
    info!(
        "Repaired {}: {} (now {} x {})",
        path.display(),
        reason,
        after.x,
        after.y
    );
    Ok(RepairAction::Rewritten {
        before,
        after,
        reason,
    })
}
