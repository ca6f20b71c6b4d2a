//! DigitalMicrograph to calibrated TIFF conversion.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::contrast::{map_pixels, PixelMode};
use crate::dm4::{CalibrationRecord, Dm4Error, Micrograph};
use crate::raster::{write_tiff, RasterImage, Resolution, TiffError};

/// Conversion errors for a single file.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Not a DigitalMicrograph file: {0}")]
    NotDmFile(PathBuf),
    #[error("Output would overwrite the source: {0}")]
    SameAsSource(PathBuf),
    #[error(transparent)]
    Dm4(#[from] Dm4Error),
    #[error(transparent)]
    Tiff(#[from] TiffError),
}

/// Options for [`convert_file`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    pub mode: PixelMode,
    /// Prepended to the output stem as `<prefix>_`; empty for none.
    pub prefix: String,
    /// Output directory; the source directory when unset.
    pub destination: Option<PathBuf>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            mode: PixelMode::default(),
            prefix: String::new(),
            destination: None,
        }
    }
}

impl ConvertOptions {
    pub fn with_mode(mut self, mode: PixelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub source: PathBuf,
    pub output: PathBuf,
    pub calibration: CalibrationRecord,
    pub resolution: Resolution,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
}

/// `.dm3` or `.dm4`, case-insensitive.
pub fn is_dm_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("dm3") || ext.eq_ignore_ascii_case("dm4"))
        .unwrap_or(false)
}

/// Where [`convert_file`] writes the TIFF for `source`.
pub fn output_path(source: &Path, options: &ConvertOptions) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = if options.prefix.is_empty() {
        format!("{}.tif", stem)
    } else {
        format!("{}_{}.tif", options.prefix, stem)
    };
    let dir = match (&options.destination, source.parent()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(parent)) => parent.to_path_buf(),
        (None, None) => PathBuf::new(),
    };
    dir.join(name)
}

/// Build the TIFF pages and calibration for a micrograph.
pub fn render(micrograph: &Micrograph, mode: PixelMode) -> RasterImage {
    let calibration = &micrograph.calibration;
    RasterImage {
        frames: map_pixels(&micrograph.image, mode),
        resolution: Resolution::from_pixel_size(calibration.scale_x, calibration.scale_y),
        unit: calibration.unit.clone(),
    }
}

/// Convert one DM3 / DM4 file to a calibrated TIFF.
///
/// The source is only read. The output replaces any existing file of the
/// same name.
pub fn convert_file(source: &Path, options: &ConvertOptions) -> Result<Conversion, ConvertError> {
    if !is_dm_file(source) {
        return Err(ConvertError::NotDmFile(source.to_path_buf()));
    }
    let output = output_path(source, options);
    if output == source {
        return Err(ConvertError::SameAsSource(output));
    }

    let micrograph = Micrograph::open(source)?;
    debug!(
        "{}: {:?} {}",
        source.display(),
        micrograph.name,
        micrograph.element_type.name()
    );
    let raster = render(&micrograph, options.mode);
    write_tiff(&output, &raster)?;

    info!(
        "Converted {} -> {} ({} {}/px, {})",
        source.display(),
        output.display(),
        micrograph.calibration.scale_x,
        micrograph.calibration.unit,
        options.mode.as_str()
    );
    Ok(Conversion {
        source: source.to_path_buf(),
        output,
        calibration: micrograph.calibration,
        resolution: raster.resolution,
        width: micrograph.image.width,
        height: micrograph.image.height,
        frames: micrograph.image.depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::ByteOrder;
    use crate::dm4::fixture::{ramp, DmWriter};
    use crate::dm4::{FormatError, Version};
    use crate::raster::{imagej_scale, read_resolution, ResolutionUnit};

    fn write_dm(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_half_nanometre_pixels_become_two_per_nm() {
        let dir = tempfile::tempdir().unwrap();
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let source = write_dm(dir.path(), "grain.dm4", &w.micrograph(0.5, "nm", 8, 6, &ramp(8, 6)));

        let conversion = convert_file(&source, &ConvertOptions::default()).unwrap();
        assert_eq!(conversion.output, dir.path().join("grain.tif"));

        let res = read_resolution(&conversion.output).unwrap();
        assert_eq!(res.unit, ResolutionUnit::None);
        assert!((res.x - 2.0).abs() < 1e-9);
        assert!((res.y - 2.0).abs() < 1e-9);

        let scale = imagej_scale(&conversion.output).unwrap();
        assert_eq!(scale.unit.as_deref(), Some("nm"));
        assert!((scale.pixel_width() - 0.5).abs() < 1e-9);

        let decoded = image::open(&conversion.output).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (8, 6));
    }

    #[test]
    fn test_round_trip_scale() {
        let dir = tempfile::tempdir().unwrap();
        let w = DmWriter::new(Version::V3, ByteOrder::Big);
        for (i, scale) in [0.0125f32, 0.37, 1.0, 3.5, 250.0].into_iter().enumerate() {
            let source = write_dm(
                dir.path(),
                &format!("s{}.dm3", i),
                &w.micrograph(scale, "nm", 4, 4, &ramp(4, 4)),
            );
            let options = ConvertOptions::default().with_mode(PixelMode::Linear);
            let conversion = convert_file(&source, &options).unwrap();
            let res = read_resolution(&conversion.output).unwrap();
            let expected = 1.0 / scale as f64;
            assert!((res.x - expected).abs() / expected < 1e-6, "scale {}", scale);
        }
    }

    #[test]
    fn test_source_is_never_modified() {
        let dir = tempfile::tempdir().unwrap();
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let bytes = w.micrograph(0.2, "nm", 5, 5, &ramp(5, 5));
        let source = write_dm(dir.path(), "keep.dm4", &bytes);

        convert_file(&source, &ConvertOptions::default().with_mode(PixelMode::Float)).unwrap();
        assert_eq!(std::fs::read(&source).unwrap(), bytes);
    }

    #[test]
    fn test_malformed_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let w = DmWriter::new(Version::V4, ByteOrder::Little);
        let source = write_dm(dir.path(), "bad.dm4", &w.micrograph(1.0, "nm", 4, 4, &ramp(4, 3)));

        let err = convert_file(&source, &ConvertOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Dm4(Dm4Error::Format(FormatError::DimensionMismatch { .. }))
        ));
        assert!(!dir.path().join("bad.tif").exists());
    }

    #[test]
    fn test_output_path_with_prefix_and_destination() {
        let options = ConvertOptions::default()
            .with_prefix("HAADF")
            .with_destination("/tmp/out");
        assert_eq!(
            output_path(Path::new("/data/run1/img 01.dm4"), &options),
            PathBuf::from("/tmp/out/HAADF_img 01.tif")
        );
        assert_eq!(
            output_path(Path::new("/data/a.DM3"), &ConvertOptions::default()),
            PathBuf::from("/data/a.tif")
        );
    }

    #[test]
    fn test_rejects_other_extensions() {
        assert!(is_dm_file(Path::new("x.DM4")));
        assert!(!is_dm_file(Path::new("x.tif")));
        assert!(matches!(
            convert_file(Path::new("notes.txt"), &ConvertOptions::default()),
            Err(ConvertError::NotDmFile(_))
        ));
    }
}
