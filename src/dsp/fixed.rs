//! Fixed-point sample arithmetic.
//!
//! Every signal in the engine is a signed 16-bit sample. Arithmetic is done in
//! wider integers and saturated back into the symmetric range
//! `[SAMPLE_MIN, SAMPLE_MAX]`, so -32768 never appears on a wire.

/// A single 16-bit signal sample.
pub type Sample = i16;

/// Engine sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per millisecond at [`SAMPLE_RATE`].
pub const SAMPLES_PER_MS: u32 = SAMPLE_RATE / 1000;

/// Largest representable sample value.
pub const SAMPLE_MAX: i16 = 32767;

/// Smallest sample value produced by saturation.
pub const SAMPLE_MIN: i16 = -32767;

/// Value of a gain input that leaves a signal unchanged under [`gain`].
pub const UNITY_GAIN: i16 = 4096;

/// Saturates a wide integer into the sample range.
#[inline]
pub fn clip(value: i32) -> i16 {
    value.clamp(SAMPLE_MIN as i32, SAMPLE_MAX as i32) as i16
}

/// Saturating addition.
#[inline]
pub fn add_sat(a: i16, b: i16) -> i16 {
    clip(a as i32 + b as i32)
}

/// Multiplies two samples, treating the second as a 1.15 fraction.
///
/// `mult_shift(x, 32767)` is one step below identity; `mult_shift(x, 0) == 0`.
#[inline]
pub fn mult_shift(a: i16, b: i16) -> i16 {
    clip((a as i32 * b as i32) >> 15)
}

/// Applies a gain value where [`UNITY_GAIN`] is identity.
///
/// Gains above unity amplify up to 8x and saturate.
#[inline]
pub fn gain(a: i16, b: i16) -> i16 {
    clip((a as i32 * b as i32) >> 12)
}

/// Converts a duration in milliseconds to a sample count.
///
/// Negative durations count as zero.
#[inline]
pub fn ms_to_samples(ms: i32) -> u32 {
    ms.max(0) as u32 * SAMPLES_PER_MS
}

/// Converts a sample to `f32` in the range `[-1.0, 1.0]`.
#[inline]
pub fn to_f32(sample: i16) -> f32 {
    sample as f32 / SAMPLE_MAX as f32
}

/// Allocates a zeroed sample table without aborting on exhaustion.
///
/// Returns `None` when the allocator cannot satisfy the request, which
/// callers surface as a failed instance creation.
pub fn try_alloc_table<T: Copy + Default>(len: usize) -> Option<Box<[T]>> {
    let mut table = Vec::new();
    table.try_reserve_exact(len).ok()?;
    table.resize(len, T::default());
    Some(table.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_is_symmetric() {
        assert_eq!(clip(100_000), SAMPLE_MAX);
        assert_eq!(clip(-100_000), SAMPLE_MIN);
        assert_eq!(clip(-32768), -32767);
        assert_eq!(clip(1234), 1234);
    }

    #[test]
    fn test_add_sat_saturates() {
        assert_eq!(add_sat(SAMPLE_MAX, SAMPLE_MAX), SAMPLE_MAX);
        assert_eq!(add_sat(SAMPLE_MIN, SAMPLE_MIN), SAMPLE_MIN);
        assert_eq!(add_sat(1000, -250), 750);
    }

    #[test]
    fn test_mult_shift() {
        assert_eq!(mult_shift(SAMPLE_MAX, 0), 0);
        assert_eq!(mult_shift(16384, 16384), 8192);
        assert_eq!(mult_shift(SAMPLE_MAX, SAMPLE_MAX), 32766);
        assert_eq!(mult_shift(SAMPLE_MIN, SAMPLE_MAX), -32767);
    }

    #[test]
    fn test_unity_gain_is_identity() {
        for x in [SAMPLE_MIN, -1000, 0, 1, 12345, SAMPLE_MAX] {
            assert_eq!(gain(x, UNITY_GAIN), x);
        }
        assert_eq!(gain(20000, UNITY_GAIN * 2), SAMPLE_MAX);
    }

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(10), 480);
        assert_eq!(ms_to_samples(-5), 0);
    }

    #[test]
    fn test_try_alloc_table() {
        let table: Box<[i16]> = try_alloc_table(64).unwrap();
        assert_eq!(table.len(), 64);
        assert!(table.iter().all(|&s| s == 0));
        assert!(try_alloc_table::<i16>(usize::MAX).is_none());
    }
}
