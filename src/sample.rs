//! Sample types and the upstream source contract.
//!
//! All types are `Copy` to keep per-sample handling cheap.

/// One single-touch sample. `x`/`y` hold raw device readings before the
/// transform and screen pixels after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TsSample {
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
}

/// One multi-touch slot. Slots that were not updated by a read have
/// `valid == false` and must be left untouched by filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TsSampleMt {
    pub x: i32,
    pub y: i32,
    pub pressure: i32,
    pub valid: bool,
}

/// Errors surfaced by a [`SampleSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadError {
    /// The source does not implement the requested operation
    /// (multi-touch reads on a single-touch source).
    NotSupported,
    /// Device-level error code, passed through unchanged. Whether a read
    /// blocks or reports would-block here depends on how the device was
    /// opened.
    Device(i32),
}

/// Pull-based sample producer. Filters wrap a source and implement this
/// trait themselves, so modules stack the same way the raw device, the
/// transform filter and any downstream consumer always have.
pub trait SampleSource {
    /// Fill `out` with up to `out.len()` samples; returns how many were
    /// produced. Delivery order is the device order.
    fn read(&mut self, out: &mut [TsSample]) -> Result<usize, ReadError>;

    /// Multi-touch read. `out` is row-major: one row of `max_slots` slots
    /// per sample event; returns the number of rows filled. Sources
    /// without multi-touch support keep the default body.
    fn read_mt(&mut self, out: &mut [TsSampleMt], max_slots: usize) -> Result<usize, ReadError> {
        let _ = (out, max_slots);
        Err(ReadError::NotSupported)
    }
}
