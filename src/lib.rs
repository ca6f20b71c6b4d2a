// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Micrograph Tools
//!
//! Calibration-preserving conversion of Gatan DigitalMicrograph (DM3 / DM4)
//! images to TIFF, and repair of TIFF files whose resolution tags are
//! missing their physical meaning.
//!
//! Converted files follow the ImageJ convention: `ResolutionUnit` is `None`,
//! `XResolution` / `YResolution` hold pixels per unit, and the unit itself is
//! named in the `ImageDescription` tag.
//!
//! ## Converting a file
//!
//! ```rust,no_run
//! use micrograph_tools::{convert_file, ConvertOptions, PixelMode};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let options = ConvertOptions::default().with_mode(PixelMode::Linear);
//!     let conversion = convert_file(Path::new("grain.dm4"), &options)?;
//!
//!     println!(
//!         "{} px per {}",
//!         conversion.resolution.x, conversion.calibration.unit
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Repairing a directory
//!
//! ```rust,no_run
//! use micrograph_tools::{repair_dir, RepairPolicy};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let report = repair_dir(Path::new("scans"), &RepairPolicy::default(), false, |i, n, outcome| {
//!         println!("{}/{} {}", i, n, outcome.path.display());
//!     })?;
//!     report.save_json(Path::new("repair-report.json"))?;
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod batch;
pub mod bytes;
pub mod contrast;
pub mod convert;
pub mod dm4;
pub mod raster;
pub mod repair;
pub mod settings;

pub use batch::{collect_files, convert_dir, inspect_dir, repair_dir, BatchReport, FileOutcome, OutcomeStatus};
pub use contrast::{map_pixels, PixelMode};
pub use convert::{convert_file, output_path, ConvertError, ConvertOptions, Conversion};
pub use dm4::{CalibrationRecord, Dm4Error, DmFile, FormatError, ImageBuffer, Micrograph, ParseError};
pub use raster::{
    imagej_scale, read_resolution, read_tags, write_tiff, ImageJScale, Resolution, ResolutionUnit,
    TiffError,
};
pub use repair::{
    repair_file, Classification, InvalidTagValue, RepairAction, RepairError, RepairPolicy,
};
pub use settings::{AppSettings, SettingsError};
