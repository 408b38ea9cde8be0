//! Biquad Filter module.
//!
//! A fixed-point biquad whose response blends continuously from lowpass
//! through bandpass to highpass. Negative resonance turns the filter into
//! an allpass built around the bandpass response.

use crate::dsp::{
    clip, gain, pitch_to_step, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind,
    OutputPort, PortDefinition, RenderContext, SignalHint, SCT_A440, UNITY_GAIN,
};

/// Mode value for a pure lowpass response.
pub const MODE_LOWPASS: i16 = -32767;
/// Mode value for a pure bandpass response.
pub const MODE_BANDPASS: i16 = 0;
/// Mode value for a pure highpass response.
pub const MODE_HIGHPASS: i16 = 32767;

/// Coefficient fraction bits.
const COEFF_SHIFT: u32 = 29;
/// Extra precision carried by the filter state.
const STATE_SHIFT: u32 = 8;
/// The state saturates at 16 times full scale.
const STATE_LIMIT: i64 = 32768 << (STATE_SHIFT + 4);
/// Coefficients are refreshed at most once per this many samples.
const CONTROL_INTERVAL: usize = 32;
/// Highest cutoff as a phase step, 0.375 of the sample rate.
const MAX_CUTOFF_STEP: u32 = 3 << 29;

/// Bhaskara cosine approximation.
///
/// `x` is a phase where `1 << 32` is a full turn; `1 << 30` in the result
/// is 1.0.
fn approx_cos(x: u32) -> i32 {
    let mut folded = (x & !(1 << 31)) as u64;
    if folded > 1 << 30 {
        folded = (1 << 31) - folded;
    }
    let sq = (folded * folded) >> 32;
    let magnitude = ((((1u64 << 28) - sq) << 32) / ((1 << 30) + sq)) as i32;
    if x > 1 << 30 && x < 3 << 30 {
        -magnitude
    } else {
        magnitude
    }
}

/// Biquad coefficients in `COEFF_SHIFT` fixed point.
///
/// `a[0]` is always one and not stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Coefficients {
    b: [i64; 3],
    a: [i64; 2],
}

impl Coefficients {
    /// Designs a filter for a cutoff pitch, resonance and mode.
    fn design(cutoff: i16, reso: i16, mode: i16) -> Self {
        // Q scaled by 1024, never below 1/6.
        let q = ((reso as i32) >> 2).abs().max(171) as i64;
        let step = pitch_to_step(cutoff).min(MAX_CUTOFF_STEP);

        // 1 << 21 is 1.0 for these three.
        let cos = (approx_cos(step) >> 9) as i64;
        let alpha = approx_cos(step.wrapping_add(3 << 30)) as i64 / q;
        let norm = (1 << 21) + alpha;
        let scale = |value: i64| (value << COEFF_SHIFT) / norm;

        let lowpass = {
            let b1 = scale((1 << 21) - cos);
            [b1 / 2, b1, b1 / 2]
        };
        let bandpass = {
            let b0 = scale(alpha);
            [b0, 0, -b0]
        };
        let highpass = {
            let b1 = -scale((1 << 21) + cos);
            [-b1 / 2, b1, -b1 / 2]
        };

        let b = match mode {
            MODE_LOWPASS => lowpass,
            MODE_BANDPASS => bandpass,
            MODE_HIGHPASS => highpass,
            m if m < 0 => blend(lowpass, bandpass, m as i64 + 32767),
            m => blend(bandpass, highpass, m as i64),
        };
        Self {
            b,
            a: [scale(-2 * cos), scale((1 << 21) - alpha)],
        }
    }
}

/// Linear interpolation between two coefficient sets, `t` in `0..=32767`.
fn blend(from: [i64; 3], to: [i64; 3], t: i64) -> [i64; 3] {
    let mut out = [0; 3];
    for (k, value) in out.iter_mut().enumerate() {
        *value = (from[k] * (32767 - t) + to[k] * t) / 32767;
    }
    out
}

/// Multimode biquad filter.
///
/// # Ports
///
/// - **Output** (0)
/// - **Input** (1)
/// - **Cutoff** (2): SCT.
/// - **Reso** (3): Q times 4096; negative selects the allpass variant.
/// - **Gain** (4): applied to the input.
/// - **Mix** (5): 32767 is fully wet, 0 fully dry, negative inverts the wet signal.
/// - **Mode** (6): lowpass at -32767, bandpass at 0, highpass at 32767.
pub struct Filter {
    coeffs: Coefficients,
    /// Last `(cutoff, reso, mode)` the coefficients were designed for.
    designed: (i16, i16, i16),
    x: [i64; 2],
    y: [i64; 2],
}

impl Filter {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const CUTOFF: InputPort = InputPort(2);
    pub const RESO: InputPort = InputPort(3);
    pub const GAIN: InputPort = InputPort(4);
    pub const MIX: InputPort = InputPort(5);
    pub const MODE: InputPort = InputPort(6);

    const PORTS: [PortDefinition; 7] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("cutoff", "Cutoff", SignalHint::Pitch, SCT_A440),
        PortDefinition::input("reso", "Resonance", SignalHint::Linear, UNITY_GAIN),
        PortDefinition::input("gain", "Gain", SignalHint::Gain, UNITY_GAIN),
        PortDefinition::input("mix", "Mix", SignalHint::Linear, 32767),
        PortDefinition::input("mode", "Mode", SignalHint::Linear, MODE_LOWPASS),
    ];

    fn update(&mut self, cutoff: i16, reso: i16, mode: i16) {
        if self.designed != (cutoff, reso, mode) {
            self.coeffs = Coefficients::design(cutoff, reso, mode);
            self.designed = (cutoff, reso, mode);
        }
    }

    fn is_settled(&self) -> bool {
        self.x == [0; 2] && self.y == [0; 2]
    }

    /// Runs one sample through the biquad, returning the wet signal.
    #[inline]
    fn tick(&mut self, input: i16) -> i32 {
        let x0 = (input as i64) << STATE_SHIFT;
        let Coefficients { b, a } = self.coeffs;
        let acc = b[0] * x0 + b[1] * self.x[0] + b[2] * self.x[1]
            - a[0] * self.y[0]
            - a[1] * self.y[1];
        let y0 = (acc >> COEFF_SHIFT).clamp(-STATE_LIMIT, STATE_LIMIT);

        self.x = [x0, self.x[0]];
        self.y = [y0, self.y[0]];
        (y0 >> STATE_SHIFT) as i32
    }
}

/// Dry/wet crossfade where only the exact end points bypass the arithmetic.
#[inline]
fn mix(wet: i32, dry: i16, mix: i16) -> i16 {
    match mix {
        32767 => clip(wet),
        -32767 => clip(-wet),
        0 => dry,
        m => {
            let dry_level = 32767 - (m as i32).abs();
            let sum = wet as i64 * m as i64 + dry as i64 * dry_level as i64;
            clip((sum >> 15).clamp(i32::MIN as i64, i32::MAX as i64) as i32)
        }
    }
}

impl DspModule for Filter {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let input = ctx.input(Self::INPUT);
        if input.constant() == Some(0) && self.is_settled() {
            ctx.set_output_const(Self::OUT, 0);
            return;
        }

        let cutoff = ctx.input(Self::CUTOFF);
        let reso = ctx.input(Self::RESO);
        let mode = ctx.input(Self::MODE);
        let input_gain = ctx.input(Self::GAIN);
        let dry_wet = ctx.input(Self::MIX);

        let mut allpass = false;
        for i in 0..ctx.num_samples() {
            if i % CONTROL_INTERVAL == 0 {
                let r = reso.get(i);
                allpass = r < 0;
                self.update(cutoff.get(i), r, mode.get(i));
            }
            let dry = gain(input.get(i), input_gain.get(i));
            let mut wet = self.tick(dry);
            if allpass {
                wet = dry as i32 - 2 * wet;
            }
            ctx.set_output(Self::OUT, i, mix(wet, dry, dry_wet.get(i)));
        }
    }
}

impl ModuleKind for Filter {
    const INFO: ModuleInfo = ModuleInfo {
        id: 69420,
        name: "filter",
        category: ModuleCategory::Filter,
        description: "Biquad filter; use negative resonance for allpass variations",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self {
            coeffs: Coefficients::design(SCT_A440, UNITY_GAIN, MODE_LOWPASS),
            designed: (SCT_A440, UNITY_GAIN, MODE_LOWPASS),
            x: [0; 2],
            y: [0; 2],
        })
    }
}
