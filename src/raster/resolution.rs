//! Resolution tags and their rational encoding.

use serde::{Deserialize, Serialize};

/// Value of the TIFF `ResolutionUnit` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionUnit {
    /// No absolute unit; ImageJ names the unit in the image description.
    None,
    Inch,
    Centimeter,
}

impl ResolutionUnit {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ResolutionUnit::None),
            2 => Some(ResolutionUnit::Inch),
            3 => Some(ResolutionUnit::Centimeter),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            ResolutionUnit::None => 1,
            ResolutionUnit::Inch => 2,
            ResolutionUnit::Centimeter => 3,
        }
    }

    pub(crate) fn to_tiff(self) -> tiff::tags::ResolutionUnit {
        match self {
            ResolutionUnit::None => tiff::tags::ResolutionUnit::None,
            ResolutionUnit::Inch => tiff::tags::ResolutionUnit::Inch,
            ResolutionUnit::Centimeter => tiff::tags::ResolutionUnit::Centimeter,
        }
    }
}

/// Pixel density along both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Pixels per unit along x.
    pub x: f64,
    /// Pixels per unit along y.
    pub y: f64,
    pub unit: ResolutionUnit,
}

impl Resolution {
    pub fn new(x: f64, y: f64, unit: ResolutionUnit) -> Self {
        Self { x, y, unit }
    }

    /// Resolution for a pixel size of `scale_x` by `scale_y` units, in the
    /// ImageJ convention.
    pub fn from_pixel_size(scale_x: f64, scale_y: f64) -> Self {
        Self::new(1.0 / scale_x, 1.0 / scale_y, ResolutionUnit::None)
    }
}

/// Best rational approximation `n / d` of a non-negative `value` with both
/// terms at most `limit`, by continued fractions.
///
/// Returns `None` for negative or non-finite values. Values above `limit`
/// saturate to `limit / 1`.
pub fn approximate(value: f64, limit: u64) -> Option<(u64, u64)> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value >= limit as f64 {
        return Some((limit, 1));
    }

    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut x = value;
    for _ in 0..64 {
        let a = x.floor();
        let a = a as u64;
        let p2 = a.checked_mul(p1).and_then(|v| v.checked_add(p0));
        let q2 = a.checked_mul(q1).and_then(|v| v.checked_add(q0));
        let (p2, q2) = match (p2, q2) {
            (Some(p), Some(q)) if p <= limit && q <= limit => (p, q),
            _ => break,
        };
        (p0, q0, p1, q1) = (p1, q1, p2, q2);

        let frac = x - a as f64;
        if frac <= f64::EPSILON || (p1 as f64 / q1 as f64 - value).abs() <= value * f64::EPSILON {
            break;
        }
        x = 1.0 / frac;
    }
    Some((p1, q1.max(1)))
}

/// Unsigned TIFF RATIONAL.
pub fn to_rational(value: f64) -> Option<(u32, u32)> {
    approximate(value, u32::MAX as u64).map(|(n, d)| (n as u32, d as u32))
}

/// Signed TIFF SRATIONAL.
pub fn to_srational(value: f64) -> Option<(i32, i32)> {
    let (n, d) = approximate(value.abs(), i32::MAX as u64)?;
    let n = n as i32;
    Some((if value < 0.0 { -n } else { n }, d as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_values() {
        assert_eq!(to_rational(2.0), Some((2, 1)));
        assert_eq!(to_rational(0.0), Some((0, 1)));
        assert_eq!(to_rational(0.25), Some((1, 4)));
        assert_eq!(to_rational(1.5), Some((3, 2)));
    }

    #[test]
    fn test_irrational_within_precision() {
        let (n, d) = to_rational(std::f64::consts::PI).unwrap();
        assert!((n as f64 / d as f64 - std::f64::consts::PI).abs() < 1e-12);

        let value = 1.0 / 0.3183;
        let (n, d) = to_rational(value).unwrap();
        assert!((n as f64 / d as f64 - value).abs() / value < 1e-9);
    }

    #[test]
    fn test_tiny_and_huge_values() {
        let (n, d) = to_rational(1e-7).unwrap();
        assert!((n as f64 / d as f64 - 1e-7).abs() < 1e-9);
        assert_eq!(to_rational(1e12), Some((u32::MAX, 1)));
    }

    #[test]
    fn test_rejects_invalid() {
        assert_eq!(to_rational(-1.0), None);
        assert_eq!(to_rational(f64::NAN), None);
        assert_eq!(to_rational(f64::INFINITY), None);
    }

    #[test]
    fn test_signed() {
        assert_eq!(to_srational(-0.5), Some((-1, 2)));
        assert_eq!(to_srational(3.0), Some((3, 1)));
    }

    #[test]
    fn test_resolution_from_pixel_size() {
        let res = Resolution::from_pixel_size(0.5, 0.25);
        assert_eq!(res.x, 2.0);
        assert_eq!(res.y, 4.0);
        assert_eq!(res.unit, ResolutionUnit::None);
    }
}
