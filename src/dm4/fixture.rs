//! Builds synthetic DigitalMicrograph files for tests.

use crate::bytes::ByteOrder;

use super::parser::Version;
use super::types::{ElementType, ARRAY_CODE};

pub(crate) struct DmWriter {
    version: Version,
    order: ByteOrder,
}

impl DmWriter {
    pub(crate) fn new(version: Version, order: ByteOrder) -> Self {
        Self { version, order }
    }

    fn word(&self, out: &mut Vec<u8>, value: u64) {
        match self.version {
            Version::V3 => out.extend_from_slice(&(value as u32).to_be_bytes()),
            Version::V4 => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn header(&self, out: &mut Vec<u8>, kind: u8, label: &str, body_len: usize) {
        out.push(kind);
        out.extend_from_slice(&(label.len() as u16).to_be_bytes());
        out.extend_from_slice(label.as_bytes());
        if self.version == Version::V4 {
            out.extend_from_slice(&(body_len as u64).to_be_bytes());
        }
    }

    fn group_body(&self, entries: &[Vec<u8>]) -> Vec<u8> {
        let mut body = vec![0u8, 1u8];
        self.word(&mut body, entries.len() as u64);
        for entry in entries {
            body.extend_from_slice(entry);
        }
        body
    }

    pub(crate) fn group_entry(&self, label: &str, entries: &[Vec<u8>]) -> Vec<u8> {
        let body = self.group_body(entries);
        let mut out = Vec::new();
        self.header(&mut out, 20, label, body.len());
        out.extend_from_slice(&body);
        out
    }

    pub(crate) fn data_entry(&self, label: &str, info: &[u64], payload: &[u8]) -> Vec<u8> {
        let mut body = b"%%%%".to_vec();
        self.word(&mut body, info.len() as u64);
        for &word in info {
            self.word(&mut body, word);
        }
        body.extend_from_slice(payload);

        let mut out = Vec::new();
        self.header(&mut out, 21, label, body.len());
        out.extend_from_slice(&body);
        out
    }

    fn f32_bytes(&self, value: f32) -> [u8; 4] {
        match self.order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    fn u32_bytes(&self, value: u32) -> [u8; 4] {
        match self.order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub(crate) fn f32_entry(&self, label: &str, value: f32) -> Vec<u8> {
        self.data_entry(label, &[ElementType::F32.code()], &self.f32_bytes(value))
    }

    pub(crate) fn u32_entry(&self, label: &str, value: u32) -> Vec<u8> {
        self.data_entry(label, &[ElementType::U32.code()], &self.u32_bytes(value))
    }

    /// Text stored as a `u16` array, the way DigitalMicrograph stores labels.
    pub(crate) fn text_entry(&self, label: &str, text: &str) -> Vec<u8> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut payload = Vec::new();
        for unit in &units {
            match self.order {
                ByteOrder::Big => payload.extend_from_slice(&unit.to_be_bytes()),
                ByteOrder::Little => payload.extend_from_slice(&unit.to_le_bytes()),
            }
        }
        self.data_entry(
            label,
            &[ARRAY_CODE, ElementType::U16.code(), units.len() as u64],
            &payload,
        )
    }

    pub(crate) fn f32_array_entry(&self, label: &str, values: &[f32]) -> Vec<u8> {
        let payload: Vec<u8> = values.iter().flat_map(|&v| self.f32_bytes(v)).collect();
        self.data_entry(
            label,
            &[ARRAY_CODE, ElementType::F32.code(), values.len() as u64],
            &payload,
        )
    }

    pub(crate) fn u16_array_entry(&self, label: &str, values: &[u16]) -> Vec<u8> {
        let payload: Vec<u8> = values
            .iter()
            .flat_map(|&v| match self.order {
                ByteOrder::Big => v.to_be_bytes(),
                ByteOrder::Little => v.to_le_bytes(),
            })
            .collect();
        self.data_entry(
            label,
            &[ARRAY_CODE, ElementType::U16.code(), values.len() as u64],
            &payload,
        )
    }

    /// A complete file whose root group holds `entries`.
    pub(crate) fn file(&self, entries: &[Vec<u8>]) -> Vec<u8> {
        let body = self.group_body(entries);
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.number().to_be_bytes());
        self.word(&mut out, body.len() as u64);
        let flag: u32 = match self.order {
            ByteOrder::Big => 0,
            ByteOrder::Little => 1,
        };
        out.extend_from_slice(&flag.to_be_bytes());
        out.extend_from_slice(&body);
        out.extend(std::iter::repeat(0u8).take(match self.version {
            Version::V3 => 4,
            Version::V4 => 8,
        }));
        out
    }

    fn calibration(&self, scale_x: f32, scale_y: f32, unit: &str) -> Vec<u8> {
        let axis = |scale: f32| {
            self.group_entry(
                "",
                &[
                    self.f32_entry("Origin", 0.0),
                    self.f32_entry("Scale", scale),
                    self.text_entry("Units", unit),
                ],
            )
        };
        self.group_entry(
            "Calibrations",
            &[
                self.group_entry(
                    "Brightness",
                    &[
                        self.f32_entry("Origin", 0.0),
                        self.f32_entry("Scale", 1.0),
                        self.text_entry("Units", "counts"),
                    ],
                ),
                self.group_entry("Dimension", &[axis(scale_x), axis(scale_y)]),
            ],
        )
    }

    /// One `ImageList` entry with float pixels.
    pub(crate) fn image_entry(
        &self,
        name: &str,
        scale: f32,
        unit: &str,
        dims: &[u32],
        pixels: &[f32],
    ) -> Vec<u8> {
        let dimensions: Vec<Vec<u8>> = dims.iter().map(|&d| self.u32_entry("", d)).collect();
        self.group_entry(
            "",
            &[
                self.group_entry(
                    "ImageData",
                    &[
                        self.calibration(scale, scale, unit),
                        self.f32_array_entry("Data", pixels),
                        self.u32_entry("DataType", 2),
                        self.group_entry("Dimensions", &dimensions),
                        self.u32_entry("PixelDepth", 4),
                    ],
                ),
                self.text_entry("Name", name),
            ],
        )
    }

    /// A file shaped like a DigitalMicrograph export: a small thumbnail
    /// followed by the calibrated main image.
    pub(crate) fn micrograph(
        &self,
        scale: f32,
        unit: &str,
        width: u32,
        height: u32,
        pixels: &[f32],
    ) -> Vec<u8> {
        self.file(&[self.group_entry(
            "ImageList",
            &[
                self.image_entry("thumbnail", 1.0, "", &[2, 2], &[0.0, 1.0, 2.0, 3.0]),
                self.image_entry("main", scale, unit, &[width, height], pixels),
            ],
        )])
    }
}

/// A ramp image of `width * height` pixels.
pub(crate) fn ramp(width: u32, height: u32) -> Vec<f32> {
    (0..width * height).map(|i| i as f32).collect()
}
