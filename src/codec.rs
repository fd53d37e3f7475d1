//! Calibration-file codec.
//!
//! Two on-disk formats share the `pointercal` file, told apart by the
//! first byte:
//!
//! - **coefficient lines** (anything else): whitespace-separated signed
//!   decimal integers. Six or seven values are the legacy affine
//!   constants; up to twelve are the polynomial constants, with identity
//!   defaults filled in for whatever is missing. Never fails: a truncated
//!   file degrades toward the identity transform.
//! - **point records** (leading `(`): `(x,y)(i,j)` lines as written by the
//!   quadrant calibration tool. Five records select the quadrant model,
//!   nine the polynomial model; the fit is re-run from the stored points.
//!
//! The actual file I/O (and the `TSLIB_CALIBFILE` override) belongs to the
//! host; this module only speaks the byte formats.

use core::fmt::Write;

use heapless::{String, Vec};

use crate::calib::{fit_quadrant, fit_scaled, CalPoint, CalibError, ScreenBounds, PT_MM};
use crate::coeff::{AffineCoeffs, CalModel, PolyCoeffs};
use crate::transform::DEFAULT_RAW_MAX;

/// Default calibration file location on the target.
pub const DEFAULT_CALIB_FILE: &str = "/etc/pointercal";
/// Environment variable the host honours to relocate the file.
pub const CALIB_FILE_ENV: &str = "TSLIB_CALIBFILE";

/// Field separators shared by both formats.
const DELIMS: &[u8] = b" \t\r\n(),";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// A point-record file ended mid-record (or at a count other than
    /// five or nine records).
    NotEnoughNumbers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadError {
    Parse(ParseError),
    Calib(CalibError),
}

impl From<ParseError> for LoadError {
    fn from(e: ParseError) -> Self {
        LoadError::Parse(e)
    }
}

impl From<CalibError> for LoadError {
    fn from(e: CalibError) -> Self {
        LoadError::Calib(e)
    }
}

// ── Integer scanning ──────────────────────────────────────────────────────────

/// Pulls signed decimal integers out of a delimiter-soup string, stopping
/// at the end of input or the first token that is not a number.
struct IntScanner<'a> {
    rest: &'a [u8],
}

impl<'a> IntScanner<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s.as_bytes() }
    }

    fn next_int(&mut self) -> Option<i32> {
        let mut k = 0;
        while k < self.rest.len() && DELIMS.contains(&self.rest[k]) {
            k += 1;
        }
        self.rest = &self.rest[k..];

        let mut idx = 0;
        let neg = match self.rest.first() {
            Some(b'-') => {
                idx = 1;
                true
            }
            Some(b'+') => {
                idx = 1;
                false
            }
            _ => false,
        };

        let mut val: i64 = 0;
        let mut digits = 0;
        while idx < self.rest.len() && self.rest[idx].is_ascii_digit() {
            val = val * 10 + (self.rest[idx] - b'0') as i64;
            if val > u32::MAX as i64 {
                // Keep consuming digits, the value saturates below.
                val = u32::MAX as i64;
            }
            digits += 1;
            idx += 1;
        }
        if digits == 0 {
            return None;
        }
        self.rest = &self.rest[idx..];

        let val = if neg { -val } else { val };
        Some(val.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }
}

// ── Coefficient lines ─────────────────────────────────────────────────────────

/// Decode a coefficient line. Six or seven integers are the legacy affine
/// constants in (offset, i-scale, j-scale) order per axis, applied with an
/// implicit shift of -16; any other count is the 12-value polynomial
/// layout with identity defaults for missing values.
pub fn parse_coeff_line(input: &str) -> CalModel {
    let mut vals = [0i32; 12];
    let mut n = 0;
    let mut sc = IntScanner::new(input);
    while n < 12 {
        match sc.next_int() {
            Some(v) => {
                vals[n] = v;
                n += 1;
            }
            None => break,
        }
    }

    if n == 6 || n == 7 {
        debug!("legacy affine calibration constants");
        return CalModel::Affine(AffineCoeffs {
            a: [vals[1], vals[2], vals[0], vals[4], vals[5], vals[3]],
            shift: -16,
        });
    }

    if n < 12 {
        warn!("short coefficient line: {} of 12 values, rest defaulted", n);
    }
    let mut a = PolyCoeffs::identity().a;
    a[..n].copy_from_slice(&vals[..n]);
    CalModel::Poly(PolyCoeffs { a })
}

/// One line, twelve space-separated integers, newline-terminated.
pub fn write_coeff_line(r: &PolyCoeffs) -> String<256> {
    let mut s = String::new();
    for (k, v) in r.a.iter().enumerate() {
        let _ = write!(s, "{}{}", v, if k == 11 { '\n' } else { ' ' });
    }
    s
}

/// The `_e` sidecar: the same constants as decimal fractions of 65536.
pub fn write_coeff_line_decimal(r: &PolyCoeffs) -> String<256> {
    let mut s = String::new();
    for (k, v) in r.a.iter().enumerate() {
        let _ = write!(s, "{:.5}{}", *v as f32 / 65536.0, if k == 11 { '\n' } else { ' ' });
    }
    s
}

/// The `_x` sidecar: a display-server "Coordinate Transformation Matrix"
/// row. `r` must come from a 3-coefficient normalised fit; the cross and
/// squared terms have no slot in the 3x3 matrix.
pub fn write_xinput_matrix(device: &str, r: &PolyCoeffs) -> String<400> {
    let f = |k: usize| r.a[k] as f32 / 65536.0;
    let mut s = String::new();
    let _ = write!(
        s,
        "\"{}\" \"Coordinate Transformation Matrix\" {:.5} {:.5} {:.5} {:.5} {:.5} {:.5} 0 0 1\n",
        device,
        f(1),
        f(2),
        f(0),
        f(7),
        f(8),
        f(6),
    );
    s
}

// ── Point records ─────────────────────────────────────────────────────────────

/// Decode point records. Exactly five records (quadrant tool) or nine
/// (9-point tool); input ending anywhere else is an error.
pub fn parse_point_records(input: &str) -> Result<Vec<CalPoint, 9>, ParseError> {
    let mut sc = IntScanner::new(input);
    let mut pts: Vec<CalPoint, 9> = Vec::new();

    for q in 0..9 {
        let x = match sc.next_int() {
            Some(v) => v,
            // A five-point file is allowed to end here.
            None if q == 5 => break,
            None => {
                warn!("point-record file ended after {} records", q);
                return Err(ParseError::NotEnoughNumbers);
            }
        };
        let mut rest = [0i32; 3];
        for slot in &mut rest {
            *slot = sc.next_int().ok_or(ParseError::NotEnoughNumbers)?;
        }
        let _ = pts.push(CalPoint {
            x: x.max(0) as u32,
            y: rest[0].max(0) as u32,
            i: rest[1].max(0) as u32,
            j: rest[2].max(0) as u32,
        });
    }
    Ok(pts)
}

/// One `(x,y)(i,j)` line per point, as the calibration tool stores them.
pub fn write_point_records(points: &[CalPoint]) -> String<400> {
    let mut s = String::new();
    for d in points {
        let _ = write!(s, "({},{})({},{})\n", d.x, d.y, d.i, d.j);
    }
    s
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// A decoded calibration plus the screen extents the apply path should
/// clamp against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadedModel {
    pub model: CalModel,
    pub xmax: u32,
    pub ymax: u32,
}

/// Decode a calibration file's contents.
///
/// Coefficient lines clamp against the caller's screen extents (pass 0 to
/// keep the legacy unclamped behaviour of geometry-less setups). Point
/// records carry their own geometry: the centre point sits at half the
/// extents, so xmax = 2*MM.x, ymax = 2*MM.y, and the fit is re-run here.
pub fn load_model(
    input: &str,
    xres: u32,
    yres: u32,
    imax: u32,
    jmax: u32,
) -> Result<LoadedModel, LoadError> {
    if input.as_bytes().first() != Some(&b'(') {
        return Ok(LoadedModel { model: parse_coeff_line(input), xmax: xres, ymax: yres });
    }

    let pts = parse_point_records(input)?;
    let mm = pts[PT_MM];
    let xmax = mm.x * 2;
    let ymax = mm.y * 2;

    if pts.len() == 5 {
        let cal = [pts[0], pts[1], pts[2], pts[3], pts[4]];
        let q = fit_quadrant(&cal)?;
        return Ok(LoadedModel { model: CalModel::Quadrant(q), xmax, ymax });
    }

    let imax = if imax == 0 { DEFAULT_RAW_MAX } else { imax };
    let jmax = if jmax == 0 { DEFAULT_RAW_MAX } else { jmax };
    let bounds = ScreenBounds { xmax, ymax, imax, jmax };
    let p = fit_scaled(&pts, &bounds, 6)?;
    Ok(LoadedModel { model: CalModel::Poly(p), xmax, ymax })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_value_line_parses_exactly() {
        let line = "-4194 39212 13107200 104857 1 2 13107200 -39212 -4194 1 2 104857\n";
        match parse_coeff_line(line) {
            CalModel::Poly(p) => assert_eq!(
                p.a,
                [-4194, 39212, 13107200, 104857, 1, 2, 13107200, -39212, -4194, 1, 2, 104857]
            ),
            other => panic!("wrong model: {other:?}"),
        }
    }

    #[test]
    fn six_values_are_legacy_affine() {
        match parse_coeff_line("0 65536 0 0 0 65536\n") {
            CalModel::Affine(r) => {
                assert_eq!(r.a, [65536, 0, 0, 0, 65536, 0]);
                assert_eq!(r.shift, -16);
            }
            other => panic!("wrong model: {other:?}"),
        }
    }

    #[test]
    fn seventh_value_is_ignored() {
        let a = parse_coeff_line("0 65536 0 0 0 65536 65536\n");
        let b = parse_coeff_line("0 65536 0 0 0 65536\n");
        assert_eq!(a, b);
    }

    #[test]
    fn short_line_falls_back_to_identity() {
        match parse_coeff_line("7 9 11\n") {
            CalModel::Poly(p) => {
                assert_eq!(&p.a[..3], &[7, 9, 11]);
                assert_eq!(&p.a[3..], &PolyCoeffs::identity().a[3..]);
            }
            other => panic!("wrong model: {other:?}"),
        }
        assert_eq!(parse_coeff_line(""), CalModel::Poly(PolyCoeffs::identity()));
        assert_eq!(parse_coeff_line("garbage"), CalModel::Poly(PolyCoeffs::identity()));
    }

    #[test]
    fn coeff_line_round_trips() {
        let p = PolyCoeffs { a: [-4194, 39212, 13107200, 104857, 1, 2, 13107200, -39212, -4194, 1, 2, 104857] };
        let line = write_coeff_line(&p);
        assert!(line.ends_with('\n'));
        assert_eq!(parse_coeff_line(&line), CalModel::Poly(p));
    }

    #[test]
    fn decimal_sidecar_divides_by_65536() {
        let line = write_coeff_line_decimal(&PolyCoeffs::identity());
        assert_eq!(
            line.as_str(),
            "0.00000 1.00000 0.00000 0.00000 0.00000 0.00000 \
             0.00000 0.00000 1.00000 0.00000 0.00000 0.00000\n"
        );
    }

    #[test]
    fn xinput_sidecar_reorders_into_matrix_rows() {
        // 3-coefficient fit layout: x = a0 + a1*i + a2*j.
        let mut a = [0i32; 12];
        a[0] = 32768; // x offset 0.5
        a[1] = 65536; // x i-scale 1.0
        a[6] = 16384; // y offset 0.25
        a[8] = 65536; // y j-scale 1.0
        let line = write_xinput_matrix("ts0", &PolyCoeffs { a });
        assert_eq!(
            line.as_str(),
            "\"ts0\" \"Coordinate Transformation Matrix\" \
             1.00000 0.00000 0.50000 0.00000 1.00000 0.25000 0 0 1\n"
        );
    }

    fn five_points() -> [CalPoint; 5] {
        [
            CalPoint { x: 50, y: 50, i: 180, j: 210 },
            CalPoint { x: 590, y: 50, i: 3880, j: 230 },
            CalPoint { x: 590, y: 430, i: 3860, j: 3900 },
            CalPoint { x: 50, y: 430, i: 200, j: 3880 },
            CalPoint { x: 320, y: 240, i: 2020, j: 2060 },
        ]
    }

    #[test]
    fn point_records_round_trip() {
        let pts = five_points();
        let text = write_point_records(&pts);
        assert!(text.starts_with('('));
        let back = parse_point_records(&text).unwrap();
        assert_eq!(&back[..], &pts[..]);
    }

    #[test]
    fn point_records_accept_five_or_nine_only() {
        let pts = five_points();
        let mut nine = std::string::String::new();
        for _ in 0..2 {
            nine.push_str(&write_point_records(&pts));
        }
        // 10 records: the scan stops after nine.
        assert_eq!(parse_point_records(&nine).unwrap().len(), 9);

        let seven: std::string::String =
            write_point_records(&pts).as_str().to_owned() + "(1,2)(3,4)\n(5,6)(7,8)\n";
        assert_eq!(parse_point_records(&seven), Err(ParseError::NotEnoughNumbers));

        let truncated = "(50,50)(180,210)\n(590,50)(3880";
        assert_eq!(parse_point_records(truncated), Err(ParseError::NotEnoughNumbers));
    }

    #[test]
    fn load_quadrant_model_from_five_records() {
        let text = write_point_records(&five_points());
        let m = load_model(&text, 0, 0, 4096, 4096).unwrap();
        assert_eq!((m.xmax, m.ymax), (640, 480));
        assert!(matches!(m.model, CalModel::Quadrant(_)));
    }

    #[test]
    fn load_poly_model_from_nine_records() {
        let pts: std::vec::Vec<CalPoint> = crate::calib::target_positions(640, 480)
            .iter()
            .map(|&(x, y)| CalPoint { x, y, i: x * 4096 / 640, j: y * 4096 / 480 })
            .collect();
        let text = write_point_records(&pts);
        let m = load_model(&text, 0, 0, 4096, 4096).unwrap();
        assert_eq!((m.xmax, m.ymax), (640, 480));
        assert!(matches!(m.model, CalModel::Poly(_)));
    }

    #[test]
    fn load_coeff_line_keeps_caller_extents() {
        let m = load_model("0 65536 0 0 0 65536\n", 800, 600, 0, 0).unwrap();
        assert_eq!((m.xmax, m.ymax), (800, 600));
        assert!(matches!(m.model, CalModel::Affine(_)));
    }

    #[test]
    fn load_rejects_degenerate_points() {
        let text = "(0,0)(0,0)\n(0,0)(10,10)\n(0,0)(20,20)\n(0,0)(30,30)\n(0,0)(40,40)\n";
        assert_eq!(
            load_model(text, 0, 0, 4096, 4096),
            Err(LoadError::Calib(CalibError::Singular))
        );
    }
}
