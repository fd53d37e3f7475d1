#![cfg_attr(not(test), no_std)]

//! Touchscreen calibration engine.
//!
//! Fits a coordinate transform from touched-point/screen-point
//! correspondences and applies it to raw samples in pure integer
//! arithmetic, so the hot path runs unchanged on MCU-class targets.
//! Three model families:
//!
//! - affine (3 unknowns per axis, shift-normalised fixed point)
//! - second-order polynomial (6 unknowns per axis, 16.16 fixed point)
//! - quadrant-piecewise (five affine transforms, selected per sample)
//!
//! The device reader, framebuffer and file I/O live outside the crate;
//! [`sample::SampleSource`] is the upstream contract and [`codec`] speaks
//! the `pointercal` persistence formats.

// This mod must come first so the others see its macros.
mod fmt;

pub mod calib;
pub mod codec;
pub mod coeff;
pub mod matrix;
pub mod pipeline;
pub mod sample;
pub mod transform;

pub use calib::{fit_affine, fit_polynomial, fit_quadrant, CalPoint, CalibError, ScreenBounds};
pub use coeff::{AffineCoeffs, CalModel, PolyCoeffs, QuadrantCoeffs};
pub use pipeline::{LinearFilter, LinearParams};
pub use sample::{ReadError, SampleSource, TsSample, TsSampleMt};
pub use transform::Transformer;
