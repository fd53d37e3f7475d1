//! Pull-based transform filter.
//!
//! `LinearFilter` wraps an upstream [`SampleSource`], applies the loaded
//! calibration to every sample it pulls, rescales pressure and optionally
//! swaps the axes. It implements [`SampleSource`] itself, so filters stack
//! the same way the device reader, this module and a consumer always have.
//! Samples keep upstream order; upstream errors pass through unchanged.

use core::num::IntErrorKind;

use crate::sample::{ReadError, SampleSource, TsSample, TsSampleMt};
use crate::transform::Transformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Value does not fit the native unsigned range.
    OutOfRange,
    /// Value is not a number in any accepted base.
    BadValue,
    /// `pressure_div` of zero would trap on the first sample.
    ZeroDivisor,
    /// Key is not one the filter knows.
    UnknownKey,
    /// Key requires a `=value` part and none was given.
    MissingValue,
}

/// Filter configuration. Keys: `xyswap` (flag), `pressure_offset`,
/// `pressure_mul`, `pressure_div`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinearParams {
    pub swap_xy: bool,
    pub p_offset: i32,
    pub p_mult: i32,
    pub p_div: i32,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { swap_xy: false, p_offset: 0, p_mult: 1, p_div: 1 }
    }
}

/// strtoul-style base-0 integer: `0x` prefix is hex, a leading `0` is
/// octal, anything else decimal. Range is the native 32-bit unsigned long.
fn parse_ulong(s: &str) -> Result<u32, ConfigError> {
    let (digits, radix) = if let Some(h) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (h, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u32::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ConfigError::OutOfRange,
        _ => ConfigError::BadValue,
    })
}

impl LinearParams {
    /// Parse a whitespace-separated `key` / `key=value` parameter string.
    pub fn parse(params: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for tok in params.split_whitespace() {
            let (key, val) = match tok.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (tok, None),
            };
            let int_val = || -> Result<u32, ConfigError> {
                parse_ulong(val.ok_or(ConfigError::MissingValue)?)
            };
            match key {
                "xyswap" => cfg.swap_xy = true,
                "pressure_offset" => cfg.p_offset = int_val()? as i32,
                "pressure_mul" => cfg.p_mult = int_val()? as i32,
                "pressure_div" => {
                    let v = int_val()?;
                    if v == 0 {
                        return Err(ConfigError::ZeroDivisor);
                    }
                    cfg.p_div = v as i32;
                }
                _ => {
                    warn!("unknown filter parameter");
                    return Err(ConfigError::UnknownKey);
                }
            }
        }
        Ok(cfg)
    }
}

/// The transform filter. Coefficients are read-only once constructed; a
/// single instance must not be shared across threads without external
/// synchronisation (`read` needs `&mut self` through the source anyway).
pub struct LinearFilter<S> {
    source: S,
    xfm: Transformer,
    params: LinearParams,
}

impl<S: SampleSource> LinearFilter<S> {
    pub fn new(source: S, xfm: Transformer, params: LinearParams) -> Self {
        Self { source, xfm, params }
    }

    pub fn transformer(&self) -> &Transformer {
        &self.xfm
    }

    fn rescale_pressure(&self, pressure: i32) -> i32 {
        (pressure + self.params.p_offset) * self.params.p_mult / self.params.p_div
    }
}

impl<S: SampleSource> SampleSource for LinearFilter<S> {
    fn read(&mut self, out: &mut [TsSample]) -> Result<usize, ReadError> {
        let n = self.source.read(out)?;
        for s in &mut out[..n] {
            self.xfm.transform(s);
            s.pressure = self.rescale_pressure(s.pressure);
            if self.params.swap_xy {
                core::mem::swap(&mut s.x, &mut s.y);
            }
        }
        Ok(n)
    }

    fn read_mt(&mut self, out: &mut [TsSampleMt], max_slots: usize) -> Result<usize, ReadError> {
        let n = self.source.read_mt(out, max_slots)?;
        if max_slots == 0 {
            return Ok(n);
        }
        for row in out.chunks_mut(max_slots).take(n) {
            for s in row {
                if !s.valid {
                    continue;
                }
                self.xfm.transform_mt(s);
                s.pressure = self.rescale_pressure(s.pressure);
                if self.params.swap_xy {
                    core::mem::swap(&mut s.x, &mut s.y);
                }
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::ScreenBounds;
    use crate::coeff::{AffineCoeffs, CalModel};

    fn identity_filter<S: SampleSource>(source: S, params: LinearParams) -> LinearFilter<S> {
        let xfm = Transformer::new(
            CalModel::Affine(AffineCoeffs { a: [65536, 0, 0, 0, 65536, 0], shift: -16 }),
            ScreenBounds { xmax: 640, ymax: 480, imax: 4096, jmax: 4096 },
        );
        LinearFilter::new(source, xfm, params)
    }

    struct Stub {
        queue: std::vec::Vec<TsSample>,
        fail: Option<i32>,
    }

    impl SampleSource for Stub {
        fn read(&mut self, out: &mut [TsSample]) -> Result<usize, ReadError> {
            if let Some(code) = self.fail {
                return Err(ReadError::Device(code));
            }
            let n = out.len().min(self.queue.len());
            for (o, s) in out.iter_mut().zip(self.queue.drain(..n)) {
                *o = s;
            }
            Ok(n)
        }
    }

    struct MtStub {
        rows: std::vec::Vec<std::vec::Vec<TsSampleMt>>,
    }

    impl SampleSource for MtStub {
        fn read(&mut self, _out: &mut [TsSample]) -> Result<usize, ReadError> {
            Ok(0)
        }

        fn read_mt(&mut self, out: &mut [TsSampleMt], max_slots: usize) -> Result<usize, ReadError> {
            let n = self.rows.len().min(out.len() / max_slots);
            for (row, chunk) in self.rows.drain(..n).zip(out.chunks_mut(max_slots)) {
                chunk.copy_from_slice(&row);
            }
            Ok(n)
        }
    }

    #[test]
    fn pressure_rescale_and_swap() {
        let stub = Stub { queue: vec![TsSample { x: 100, y: 200, pressure: 40 }], fail: None };
        let params = LinearParams::parse("pressure_offset=10 pressure_mul=3 pressure_div=2 xyswap").unwrap();
        let mut f = identity_filter(stub, params);

        let mut out = [TsSample::default(); 4];
        let n = f.read(&mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0], TsSample { x: 200, y: 100, pressure: 75 });
    }

    #[test]
    fn upstream_error_passes_through() {
        let stub = Stub { queue: vec![], fail: Some(-5) };
        let mut f = identity_filter(stub, LinearParams::default());
        let mut out = [TsSample::default(); 1];
        assert_eq!(f.read(&mut out), Err(ReadError::Device(-5)));
    }

    #[test]
    fn read_mt_without_upstream_support_is_distinct() {
        let stub = Stub { queue: vec![], fail: None };
        let mut f = identity_filter(stub, LinearParams::default());
        let mut out = [TsSampleMt::default(); 4];
        assert_eq!(f.read_mt(&mut out, 2), Err(ReadError::NotSupported));
    }

    #[test]
    fn read_mt_transforms_valid_slots_only() {
        let row = vec![
            TsSampleMt { x: 100, y: 200, pressure: 10, valid: true },
            TsSampleMt { x: 55, y: 66, pressure: 0, valid: false },
        ];
        let mt = MtStub { rows: vec![row] };
        let mut f = identity_filter(mt, LinearParams::default());

        let mut out = [TsSampleMt::default(); 4];
        let n = f.read_mt(&mut out, 2).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0], TsSampleMt { x: 100, y: 200, pressure: 10, valid: true });
        // Untouched slot, including its stale coordinates.
        assert_eq!(out[1], TsSampleMt { x: 55, y: 66, pressure: 0, valid: false });
    }

    #[test]
    fn filters_stack() {
        let stub = Stub { queue: vec![TsSample { x: 10, y: 20, pressure: 1 }], fail: None };
        let inner = identity_filter(stub, LinearParams::default());
        let mut outer = identity_filter(inner, LinearParams::default());
        let mut out = [TsSample::default(); 1];
        assert_eq!(outer.read(&mut out), Ok(1));
        assert_eq!((out[0].x, out[0].y), (10, 20));
    }

    #[test]
    fn params_defaults() {
        let p = LinearParams::parse("").unwrap();
        assert_eq!(p, LinearParams { swap_xy: false, p_offset: 0, p_mult: 1, p_div: 1 });
    }

    #[test]
    fn params_accept_base_zero_integers() {
        let p = LinearParams::parse("pressure_offset=0x10 pressure_mul=010 pressure_div=9").unwrap();
        assert_eq!((p.p_offset, p.p_mult, p.p_div), (16, 8, 9));
    }

    #[test]
    fn params_reject_bad_input() {
        assert_eq!(
            LinearParams::parse("pressure_mul=99999999999"),
            Err(ConfigError::OutOfRange)
        );
        assert_eq!(LinearParams::parse("pressure_mul=abc"), Err(ConfigError::BadValue));
        assert_eq!(LinearParams::parse("pressure_div=0"), Err(ConfigError::ZeroDivisor));
        assert_eq!(LinearParams::parse("pressure_mul"), Err(ConfigError::MissingValue));
        assert_eq!(LinearParams::parse("sensitivity=3"), Err(ConfigError::UnknownKey));
    }
}
