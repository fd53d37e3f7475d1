//! Runtime apply path: raw reading -> screen pixel.
//!
//! Hot-path code. Every multiply is 32x32 -> 64 bit, sums stay in 64 bits
//! until after the shift, and the only divisions are by the raw extents in
//! the polynomial basis. Results clamp to [0, xmax) x [0, ymax) whenever
//! both screen extents are known; with a zero extent only the lower clamp
//! applies (legacy coefficient files carry no screen geometry).

use crate::calib::ScreenBounds;
use crate::coeff::{
    AffineCoeffs, CalModel, PolyCoeffs, QuadrantCoeffs, QUAD_BOTTOM, QUAD_LEFT, QUAD_MAIN,
    QUAD_RIGHT, QUAD_TOP,
};
use crate::sample::{TsSample, TsSampleMt};

/// Raw extent assumed when the device reports none.
pub const DEFAULT_RAW_MAX: u32 = 2048;

/// Applies one loaded [`CalModel`]. Read-only after construction; distinct
/// instances may run on distinct threads, a shared instance needs external
/// synchronisation only because `transform` takes `&self` anyway - there is
/// no interior state.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    model: CalModel,
    xmax: i32,
    ymax: i32,
    imax: i32,
    jmax: i32,
}

impl Transformer {
    pub fn new(model: CalModel, bounds: ScreenBounds) -> Self {
        let imax = if bounds.imax == 0 { DEFAULT_RAW_MAX } else { bounds.imax };
        let jmax = if bounds.jmax == 0 { DEFAULT_RAW_MAX } else { bounds.jmax };
        Self {
            model,
            xmax: bounds.xmax as i32,
            ymax: bounds.ymax as i32,
            imax: imax as i32,
            jmax: jmax as i32,
        }
    }

    pub fn model(&self) -> &CalModel {
        &self.model
    }

    /// Transform one coordinate pair.
    pub fn transform_xy(&self, i: i32, j: i32) -> (i32, i32) {
        match &self.model {
            CalModel::Affine(r) => self.apply_affine(r, i, j),
            CalModel::Poly(r) => self.apply_poly(r, i, j),
            CalModel::Quadrant(q) => self.apply_quadrant(q, i, j),
        }
    }

    /// Transform a sample in place.
    pub fn transform(&self, s: &mut TsSample) {
        let (x, y) = self.transform_xy(s.x, s.y);
        s.x = x;
        s.y = y;
    }

    /// Transform a multi-touch slot in place; untouched slots are skipped.
    pub fn transform_mt(&self, s: &mut TsSampleMt) {
        if !s.valid {
            return;
        }
        let (x, y) = self.transform_xy(s.x, s.y);
        s.x = x;
        s.y = y;
    }

    // ── Affine / quadrant ─────────────────────────────────────────────────────

    fn affine_pass(&self, r: &AffineCoeffs, i: i32, j: i32) -> (i32, i32) {
        let tx = r.a[0] as i64 * i as i64 + r.a[1] as i64 * j as i64 + r.a[2] as i64;
        let ty = r.a[3] as i64 * i as i64 + r.a[4] as i64 * j as i64 + r.a[5] as i64;
        let (mut cx, mut cy) = if r.shift < 0 {
            let sh = (-r.shift).min(63) as u32;
            (tx >> sh, ty >> sh)
        } else {
            let sh = r.shift.min(63) as u32;
            (tx << sh, ty << sh)
        };

        if cx < 0 {
            cx = 0;
        }
        if cy < 0 {
            cy = 0;
        }
        if self.xmax != 0 && self.ymax != 0 {
            if cx >= self.xmax as i64 {
                cx = self.xmax as i64 - 1;
            }
            if cy >= self.ymax as i64 {
                cy = self.ymax as i64 - 1;
            }
        }
        (cx as i32, cy as i32)
    }

    fn apply_affine(&self, r: &AffineCoeffs, i: i32, j: i32) -> (i32, i32) {
        self.affine_pass(r, i, j)
    }

    fn apply_quadrant(&self, q: &QuadrantCoeffs, i: i32, j: i32) -> (i32, i32) {
        let (cx, cy) = self.affine_pass(&q.quads[QUAD_MAIN], i, j);
        if self.xmax == 0 || self.ymax == 0 {
            // No geometry to select against.
            return (cx, cy);
        }
        // Single refinement step: the corner pass does not re-select.
        self.affine_pass(&q.quads[self.select_quadrant(cx, cy)], i, j)
    }

    /// Pick the triangular region the preliminary result landed in. The
    /// two screen diagonals split it: cy/cx against ymax/xmax separates
    /// LEFT+BOTTOM from TOP+RIGHT, (ymax-cy)/cx separates LEFT+TOP from
    /// BOTTOM+RIGHT. Cross-multiplied to stay in integers.
    fn select_quadrant(&self, cx: i32, cy: i32) -> usize {
        if cx == 0 {
            return QUAD_LEFT;
        }
        let a = self.ymax as i64 * cx as i64;
        let b = self.xmax as i64 * cy as i64;
        let c = self.xmax as i64 * (self.ymax - cy) as i64;
        if b >= a {
            if c >= a {
                QUAD_LEFT
            } else {
                QUAD_BOTTOM
            }
        } else if c >= a {
            QUAD_TOP
        } else {
            QUAD_RIGHT
        }
    }

    // ── Polynomial ────────────────────────────────────────────────────────────

    fn apply_poly(&self, r: &PolyCoeffs, i: i32, j: i32) -> (i32, i32) {
        if i >= self.imax || j >= self.jmax {
            warn!("raw reading beyond extents: i={} imax={} j={} jmax={}", i, self.imax, j, self.jmax);
        }

        // Basis vector in 16.16 over the normalised inputs.
        let s1 = ((i as i64) << 16) / self.imax as i64;
        let s2 = ((j as i64) << 16) / self.jmax as i64;
        let s = [1i64 << 16, s1, s2, (s1 * s2) >> 16, (s1 * s1) >> 16, (s2 * s2) >> 16];

        let mut xsum = 0i64;
        let mut ysum = 0i64;
        for k in 0..6 {
            xsum += r.a[k] as i64 * s[k];
            ysum += r.a[k + 6] as i64 * s[k];
        }
        let mut cx = (xsum * self.xmax as i64) >> 32;
        let mut cy = (ysum * self.ymax as i64) >> 32;

        if cx < 0 {
            cx = 0;
        }
        if cy < 0 {
            cy = 0;
        }
        if self.xmax != 0 && self.ymax != 0 {
            if cx >= self.xmax as i64 {
                cx = self.xmax as i64 - 1;
            }
            if cy >= self.ymax as i64 {
                cy = self.ymax as i64 - 1;
            }
        }
        (cx as i32, cy as i32)
    }
}
