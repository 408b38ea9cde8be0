//! Semitone-cent pitch representation and phase-step conversion.
//!
//! Pitch travels through the graph as a 16-bit "SCT" value: 100 per semitone,
//! 2400 per octave, with [`SCT_A440`] mapped to concert A. Oscillators turn a
//! pitch into the increment of a 32-bit phase accumulator that wraps exactly
//! once per period at [`SAMPLE_RATE`](super::fixed::SAMPLE_RATE).
//!
//! The conversion avoids `powf` on the audio thread: the position inside the
//! octave is split into a coarse index (64 SCT wide) and a fine index, and
//! the two table entries are multiplied. Shifting by the octave number
//! finishes the exponential.

/// SCT units per octave.
pub const SCT_PER_OCTAVE: i32 = 2400;

/// SCT units per semitone.
pub const SCT_PER_SEMITONE: i32 = 100;

/// SCT value of 440 Hz.
pub const SCT_A440: i16 = 18367;

/// Offset that moves every SCT value into a positive octave count.
const OCTAVE_BIAS: i32 = 28 * SCT_PER_OCTAVE - 32767 - 330;

/// Exponential of the octave position, 64 SCT per entry.
const COARSE: [u32; 64] = [
    14417, 14686, 14960, 15240, 15524, 15813, 16108, 16409, 16715, 17027, 17345, 17668, 17998,
    18334, 18676, 19024, 19379, 19741, 20109, 20484, 20866, 21255, 21652, 22056, 22467, 22887,
    23313, 23748, 24191, 24643, 25103, 25571, 26048, 26534, 27029, 27533, 28047, 28570, 29103,
    29646, 30199, 30763, 31336, 31921, 32517, 33123, 33741, 34371, 35012, 35665, 36330, 37008,
    37699, 38402, 39118, 39848, 40592, 41349, 42120, 42906, 43706, 44522, 45352, 46199,
];

/// Exponential of the remaining 0..64 SCT.
const FINE: [u32; 64] = [
    48059, 48073, 48087, 48101, 48115, 48129, 48143, 48156, 48170, 48184, 48198, 48212, 48226,
    48240, 48254, 48268, 48282, 48296, 48310, 48324, 48338, 48352, 48366, 48380, 48394, 48407,
    48421, 48435, 48449, 48463, 48477, 48491, 48505, 48519, 48533, 48548, 48562, 48576, 48590,
    48604, 48618, 48632, 48646, 48660, 48674, 48688, 48702, 48716, 48730, 48744, 48758, 48772,
    48786, 48801, 48815, 48829, 48843, 48857, 48871, 48885, 48899, 48913, 48928, 48942,
];

/// Returns the phase increment per sample for a pitch.
///
/// `pitch_to_step(SCT_A440)` advances a `u32` accumulator through one full
/// wrap 440 times per second.
#[inline]
pub fn pitch_to_step(sct: i16) -> u32 {
    pitch_to_step_undersampled(sct, 0)
}

/// Like [`pitch_to_step`], for a generator that only advances every
/// `2^undersample` samples.
pub fn pitch_to_step_undersampled(sct: i16, undersample: u32) -> u32 {
    let biased = sct as i32 + OCTAVE_BIAS;
    let octave = biased / SCT_PER_OCTAVE;
    let position = (biased % SCT_PER_OCTAVE) as usize;

    let mut step = 2 * COARSE[position >> 6] as u64 * FINE[position & 63] as u64;
    let shift = 27 - octave - undersample as i32;
    if shift > 0 {
        step >>= shift;
    }
    step as u32
}

/// Converts a pitch to a frequency in Hz. Control-plane helper.
pub fn sct_to_hz(sct: i16) -> f32 {
    440.0 * 2f32.powf((sct as i32 - SCT_A440 as i32) as f32 / SCT_PER_OCTAVE as f32)
}

/// Converts a frequency in Hz to the nearest pitch value. Control-plane helper.
pub fn hz_to_sct(hz: f32) -> i16 {
    if hz <= 0.0 {
        return i16::MIN + 1;
    }
    let sct = SCT_A440 as f32 + SCT_PER_OCTAVE as f32 * (hz / 440.0).log2();
    sct.round().clamp(-32767.0, 32767.0) as i16
}
