//! Least-squares calibration fits.
//!
//! Both model families run through the same masked normal-equations path:
//! accumulate the symmetric S matrix and right-hand sides from the sampled
//! points, invert over the active basis mask via determinant + adjugate,
//! then convert the fractional coefficients to the fixed-point layout the
//! apply path expects.
//!
//! The affine fit works on raw readings and emits shift-normalised
//! mantissas; the polynomial fit normalises everything to the screen/raw
//! extents first and emits 16.16 values.

use crate::coeff::{AffineCoeffs, PolyCoeffs, QuadrantCoeffs};
use crate::matrix::{adjugate, determinant, SymMat, DIM};

// ── Point roles ───────────────────────────────────────────────────────────────
// 5-point mode uses the first five; 9-point mode all nine.

pub const PT_LT: usize = 0;
pub const PT_RT: usize = 1;
pub const PT_RB: usize = 2;
pub const PT_LB: usize = 3;
pub const PT_MM: usize = 4;
pub const PT_MT: usize = 5;
pub const PT_MB: usize = 6;
pub const PT_LM: usize = 7;
pub const PT_RM: usize = 8;

// ── Fit constants ─────────────────────────────────────────────────────────────

/// Basis mask for the 3-unknown fit: {1, i, j}.
const MASK_AFFINE: u32 = 0b000111;
/// Singularity threshold on the (normalised) determinant.
const DET_EPSILON: f64 = 1e-9;
/// Floor for the common affine exponent; keeps 20 fractional bits of
/// headroom in the 32-bit apply path.
const MIN_SHIFT: i32 = -20;
/// Exponent reported for an exactly-zero coefficient, below anything a
/// finite f64 can produce.
const ZERO_EXP: i32 = -1024;

// ── Types ─────────────────────────────────────────────────────────────────────

/// One calibration correspondence: where the crosshair was drawn and what
/// the sensor reported when it was touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalPoint {
    /// Target pixel position.
    pub x: u32,
    pub y: u32,
    /// Raw sensor reading for that position.
    pub i: u32,
    pub j: u32,
}

/// Screen and raw-sensor extents. Screen extents clamp the apply path and
/// normalise the polynomial fit; raw extents normalise its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScreenBounds {
    pub xmax: u32,
    pub ymax: u32,
    pub imax: u32,
    pub jmax: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibError {
    /// The normal-equations system has no unique solution (collinear or
    /// repeated points).
    Singular,
    /// Fewer points than active basis functions.
    NotEnoughPoints,
    /// A normalisation denominator is zero.
    InvalidBounds,
}

// ── Shared solver ─────────────────────────────────────────────────────────────

/// Solve S*theta = r for both output axes over `mask`. Coefficients land at
/// their basis positions; unmasked positions stay zero.
fn solve(
    s: &SymMat,
    rx: &[f64; DIM],
    ry: &[f64; DIM],
    mask: u32,
) -> Result<([f64; DIM], [f64; DIM]), CalibError> {
    let det = determinant(s, mask, mask);
    if det > -DET_EPSILON && det < DET_EPSILON {
        error!("calibration: determinant is zero");
        return Err(CalibError::Singular);
    }

    let d = adjugate(s, mask);
    let mut cx = [0.0; DIM];
    let mut cy = [0.0; DIM];
    for col in 0..DIM {
        if mask & (1 << col) == 0 {
            continue;
        }
        let mut sx = 0.0;
        let mut sy = 0.0;
        for w in 0..DIM {
            if mask & (1 << w) == 0 {
                continue;
            }
            sx += d.get(w, col) * rx[w];
            sy += d.get(w, col) * ry[w];
        }
        cx[col] = sx / det;
        cy[col] = sy / det;
    }
    Ok((cx, cy))
}

// ── Affine fit (raw values, shift-normalised output) ──────────────────────────

/// Mantissa + binary exponent for a coefficient: scales |v| into
/// [2^30, 2^31) so v == mantissa * 2^exp.
fn float_to_fixed(v: f64) -> (i32, i32) {
    let neg = v < 0.0;
    let mut m = if neg { -v } else { v };
    if m == 0.0 {
        return (0, ZERO_EXP);
    }
    let mut exp = 0;
    while m >= 2147483648.0 {
        m /= 2.0;
        exp += 1;
    }
    while m < 1073741824.0 {
        m *= 2.0;
        exp -= 1;
    }
    let mant = m as i32;
    (if neg { -mant } else { mant }, exp)
}

/// Fit x = a*i + b*j + c (and likewise for y) on raw readings.
///
/// The six fitted values can span orders of magnitude, so each one is
/// normalised to its own exponent first, then all are right-shifted to the
/// largest exponent (floored at -20), which is stored once in the record.
pub fn fit_affine(points: &[CalPoint]) -> Result<AffineCoeffs, CalibError> {
    if points.len() < 3 {
        return Err(CalibError::NotEnoughPoints);
    }

    let mut s = SymMat::zero();
    let mut rx = [0.0; DIM];
    let mut ry = [0.0; DIM];

    s.set(0, 0, points.len() as f64);
    for p in points {
        let x = p.x as f64;
        let y = p.y as f64;
        let i = p.i as f64;
        let j = p.j as f64;

        s.add(0, 1, i);
        s.add(0, 2, j);
        s.add(1, 1, i * i);
        s.add(1, 2, i * j);
        s.add(2, 2, j * j);

        rx[0] += x;
        rx[1] += x * i;
        rx[2] += x * j;
        ry[0] += y;
        ry[1] += y * i;
        ry[2] += y * j;
    }

    let (cx, cy) = solve(&s, &rx, &ry, MASK_AFFINE)?;

    // Reorder from basis positions {1, i, j} into the apply layout
    // (i-scale, j-scale, offset) per axis.
    let vals = [cx[1], cx[2], cx[0], cy[1], cy[2], cy[0]];

    let mut mant = [0i32; 6];
    let mut exp = [0i32; 6];
    let mut max_shift = MIN_SHIFT;
    for k in 0..6 {
        let (m, e) = float_to_fixed(vals[k]);
        mant[k] = m;
        exp[k] = e;
        if e > max_shift {
            max_shift = e;
        }
    }

    let mut a = [0i32; 6];
    for k in 0..6 {
        let sh = (max_shift - exp[k]).min(31) as u32;
        a[k] = mant[k] >> sh;
    }

    debug!("affine fit: shift={}", max_shift);
    Ok(AffineCoeffs { a, shift: max_shift })
}

// ── Polynomial fit (normalised values, 16.16 output) ──────────────────────────

/// Normalised least-squares fit over the basis {1, i, j, ij, i*i, j*j}
/// masked to the low `n_coefs` bits (3 or 6). Inputs are divided by the
/// raw extents and targets by the screen extents so every accumulated sum
/// is O(1); coefficients come out scaled by 2^16.
pub fn fit_scaled(
    points: &[CalPoint],
    bounds: &ScreenBounds,
    n_coefs: usize,
) -> Result<PolyCoeffs, CalibError> {
    if points.len() < n_coefs {
        return Err(CalibError::NotEnoughPoints);
    }
    if bounds.xmax == 0 || bounds.ymax == 0 || bounds.imax == 0 || bounds.jmax == 0 {
        return Err(CalibError::InvalidBounds);
    }
    let mask = (1u32 << n_coefs) - 1;

    let mut s = SymMat::zero();
    let mut rx = [0.0; DIM];
    let mut ry = [0.0; DIM];

    s.set(0, 0, points.len() as f64);
    for p in points {
        let x = p.x as f64 / bounds.xmax as f64;
        let y = p.y as f64 / bounds.ymax as f64;
        let i = p.i as f64 / bounds.imax as f64;
        let j = p.j as f64 / bounds.jmax as f64;
        let ij = i * j;
        let i2 = i * i;
        let j2 = j * j;

        rx[0] += x;
        rx[1] += x * i;
        rx[2] += x * j;
        rx[3] += x * ij;
        rx[4] += x * i2;
        rx[5] += x * j2;

        ry[0] += y;
        ry[1] += y * i;
        ry[2] += y * j;
        ry[3] += y * ij;
        ry[4] += y * i2;
        ry[5] += y * j2;

        s.add(0, 1, i);
        s.add(1, 1, i2);

        s.add(0, 2, j);
        s.add(1, 2, ij);
        s.add(2, 2, j2);

        s.add(1, 3, i * ij); // i2j
        s.add(2, 3, j * ij); // ij2
        s.add(3, 3, ij * ij); // i2j2

        s.add(1, 4, i * i2); // i3
        s.add(3, 4, ij * i2); // i3j
        s.add(4, 4, i2 * i2); // i4

        s.add(2, 5, j * j2); // j3
        s.add(3, 5, ij * j2); // ij3
        s.add(5, 5, j2 * j2); // j4
    }

    // Positions that alias an already-accumulated sum.
    s.set(0, 3, s.get(1, 2)); // ij
    s.set(0, 4, s.get(1, 1)); // i2
    s.set(2, 4, s.get(1, 3)); // i2j
    s.set(0, 5, s.get(2, 2)); // j2
    s.set(1, 5, s.get(2, 3)); // ij2
    s.set(4, 5, s.get(3, 3)); // i2j2

    let (cx, cy) = solve(&s, &rx, &ry, mask)?;

    let mut a = [0i32; 12];
    for col in 0..DIM {
        if mask & (1 << col) == 0 {
            continue;
        }
        a[col] = (cx[col] * 65536.0) as i32;
        a[col + 6] = (cy[col] * 65536.0) as i32;
    }

    debug!("scaled fit: n_coefs={}", n_coefs);
    Ok(PolyCoeffs { a })
}

/// Full second-order fit. With fewer than six points the active basis
/// shrinks to {1, i, j}, which is the same system as [`fit_affine`] in the
/// normalised coordinate space.
pub fn fit_polynomial(points: &[CalPoint], bounds: &ScreenBounds) -> Result<PolyCoeffs, CalibError> {
    let n_coefs = if points.len() < 6 { 3 } else { 6 };
    fit_scaled(points, bounds, n_coefs)
}

// ── Quadrant fit ──────────────────────────────────────────────────────────────

/// Five affine fits: MAIN over all five points, then one per screen
/// triangle over {centre + two adjacent corners}. Any singular sub-fit
/// fails the whole calibration; no partial set is returned.
pub fn fit_quadrant(cal: &[CalPoint; 5]) -> Result<QuadrantCoeffs, CalibError> {
    let main = fit_affine(&cal[..])?;
    let top = fit_affine(&[cal[PT_MM], cal[PT_LT], cal[PT_RT]])?;
    let left = fit_affine(&[cal[PT_MM], cal[PT_LT], cal[PT_LB]])?;
    let bottom = fit_affine(&[cal[PT_MM], cal[PT_LB], cal[PT_RB]])?;
    let right = fit_affine(&[cal[PT_MM], cal[PT_RB], cal[PT_RT]])?;
    Ok(QuadrantCoeffs { quads: [main, top, left, bottom, right] })
}

// ── Crosshair layout ──────────────────────────────────────────────────────────

/// Target pixel positions for the calibration crosshairs, indexed by the
/// `PT_*` roles. Corners sit inset by 50 pixels vertically and the
/// aspect-matched amount horizontally.
pub fn target_positions(xres: u32, yres: u32) -> [(u32, u32); 9] {
    let dy = 50u32;
    let dx = if yres == 0 { dy } else { dy * xres / yres };
    let right = xres.saturating_sub(1 + dx);
    let bottom = yres.saturating_sub(1 + dy);

    let mut pts = [(0u32, 0u32); 9];
    pts[PT_LT] = (dx, dy);
    pts[PT_RT] = (right, dy);
    pts[PT_RB] = (right, bottom);
    pts[PT_LB] = (dx, bottom);
    pts[PT_MM] = (xres / 2, yres / 2);
    pts[PT_MT] = (xres / 2, dy);
    pts[PT_MB] = (xres / 2, bottom);
    pts[PT_LM] = (dx, yres / 2);
    pts[PT_RM] = (right, yres / 2);
    pts
}
