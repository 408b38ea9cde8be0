//! Flanger module.
//!
//! A short feedback comb filter whose delay is set as a pitch: the comb
//! resonates at the frequency given by `manual`. The read head sits between
//! samples and interpolates, so the delay sweeps smoothly.

use crate::dsp::fixed::try_alloc_table;
use crate::dsp::{
    add_sat, clip, gain, mult_shift, pitch_to_step, DspModule, InputPort, ModuleCategory,
    ModuleInfo, ModuleKind, OutputPort, PortDefinition, RenderContext, SignalHint, SCT_A440,
    UNITY_GAIN,
};

/// Line length in samples (100 ms).
pub const LINE_LEN: usize = 4800;

/// Fractional bits of the read head offset.
const FRACTION_BITS: u32 = 4;

/// Shortest delay, one whole sample.
const MIN_OFFSET: u32 = 1 << FRACTION_BITS;

/// Longest delay, the whole line.
const MAX_OFFSET: u32 = ((LINE_LEN as u32) - 1) << FRACTION_BITS;

/// Comb filter with pitch-controlled delay.
///
/// # Ports
///
/// - **Output** (0)
/// - **Input** (1)
/// - **Manual** (2): SCT; the delay is one period of this pitch.
/// - **Resonance** (3): feedback, where 32767 is just below unity and
///   negative values invert the feedback.
/// - **Decay** (4): milliseconds per 6 dB of echo decay, added on top of
///   the resonance; the sign selects feedback polarity, zero disables it.
/// - **Level** (5): output gain.
/// - **Mix** (6): wet volume; the dry volume is the remainder to full scale.
pub struct Flanger {
    line: Box<[i16]>,
    write_head: usize,
    /// Read head distance behind the write head, in 1/16 samples.
    offset: u32,
    manual: Option<i16>,
    /// Cached decay feedback for `(manual, |decay|)`.
    decay: Option<(i16, i16, i32)>,
}

impl Flanger {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const MANUAL: InputPort = InputPort(2);
    pub const RESONANCE: InputPort = InputPort(3);
    pub const DECAY: InputPort = InputPort(4);
    pub const LEVEL: InputPort = InputPort(5);
    pub const MIX: InputPort = InputPort(6);

    const PORTS: [PortDefinition; 7] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("manual", "Manual", SignalHint::Pitch, SCT_A440),
        PortDefinition::input("resonance", "Resonance", SignalHint::Linear, UNITY_GAIN / 2),
        PortDefinition::input("decay", "Decay (ms/6dB)", SignalHint::Linear, 0),
        PortDefinition::input("level", "Level", SignalHint::Gain, UNITY_GAIN),
        PortDefinition::input("mix", "Mix", SignalHint::Linear, 1 << 14),
    ];

    /// Delay in 1/16 samples for one period of `manual`.
    fn offset_for(manual: i16) -> u32 {
        let step = pitch_to_step(manual).max(1) as u64;
        ((1u64 << (32 + FRACTION_BITS)) / step).clamp(MIN_OFFSET as u64, MAX_OFFSET as u64) as u32
    }

    /// Feedback that loses 6 dB every `decay_ms` at the current delay.
    fn decay_feedback(&self, decay_ms: i16) -> i32 {
        // 2400 SCT per octave over 48 samples per ms.
        let delay_samples = (self.offset >> FRACTION_BITS) as i32;
        let octaves_down = delay_samples * 50 / (decay_ms as i32).abs().max(1);
        let pitch = clip(SCT_A440 as i32 - octaves_down);
        ((pitch_to_step(pitch) as u64) * 32767 / pitch_to_step(SCT_A440) as u64) as i32
    }

    fn update(&mut self, manual: i16, decay: i16) -> i32 {
        if self.manual != Some(manual) {
            self.offset = Self::offset_for(manual);
            self.manual = Some(manual);
        }
        if decay == 0 {
            return 0;
        }
        let magnitude = decay.checked_abs().unwrap_or(i16::MAX);
        let feedback = match self.decay {
            Some((m, d, feedback)) if m == manual && d == magnitude => feedback,
            _ => {
                let feedback = self.decay_feedback(magnitude);
                self.decay = Some((manual, magnitude, feedback));
                feedback
            }
        };
        if decay > 0 {
            feedback
        } else {
            -feedback
        }
    }

    /// Reads the line `offset` behind the write head with linear
    /// interpolation.
    #[inline]
    fn read(&self) -> i16 {
        let position = ((self.write_head as u32) << FRACTION_BITS) + (MAX_OFFSET + MIN_OFFSET)
            - self.offset;
        let index = (position >> FRACTION_BITS) as usize % LINE_LEN;
        let next = (index + 1) % LINE_LEN;
        let fraction = (position & (MIN_OFFSET - 1)) as i32;
        let blended = self.line[index] as i32 * (MIN_OFFSET as i32 - fraction)
            + self.line[next] as i32 * fraction;
        clip(blended >> FRACTION_BITS)
    }
}

impl DspModule for Flanger {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        if !ctx.is_connected(Self::OUT) {
            return;
        }

        let decay_feedback = self.update(
            ctx.input(Self::MANUAL).first(),
            ctx.input(Self::DECAY).first(),
        );
        let feedback = clip(ctx.input(Self::RESONANCE).first() as i32 + decay_feedback);
        let level = ctx.input(Self::LEVEL).first();
        let mix = ctx.input(Self::MIX).first();
        let dry_vol = 32767 - mix.checked_abs().unwrap_or(i16::MAX);
        let input = ctx.input(Self::INPUT);

        for i in 0..ctx.num_samples() {
            self.write_head = (self.write_head + 1) % LINE_LEN;
            let dry = input.get(i);
            let wet = self.read();
            self.line[self.write_head] = add_sat(dry, mult_shift(wet, feedback));

            let out = add_sat(mult_shift(dry, dry_vol), mult_shift(wet, mix));
            ctx.set_output(Self::OUT, i, gain(out, level));
        }
    }

    fn table(&self) -> &[i16] {
        &self.line
    }

    fn table_mut(&mut self) -> &mut [i16] {
        &mut self.line
    }
}

impl ModuleKind for Flanger {
    const INFO: ModuleInfo = ModuleInfo {
        id: 123,
        name: "flanger",
        category: ModuleCategory::Effect,
        description: "Flanger with subsample interpolation and negative mix/resonance capability",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self {
            line: try_alloc_table(LINE_LEN)?,
            write_head: 0,
            offset: Self::offset_for(SCT_A440),
            manual: None,
            decay: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    fn wet_only() -> Harness<Flanger> {
        let mut harness = Harness::new(Flanger::create(0).unwrap());
        harness.set(Flanger::RESONANCE, 0);
        harness.set(Flanger::MIX, 32767);
        harness
    }

    fn impulse_response(harness: &mut Harness<Flanger>, blocks: usize) -> Vec<i16> {
        let mut impulse = [0i16; 256];
        impulse[0] = 32767;
        harness.feed(Flanger::INPUT, &impulse);
        let mut samples = harness.run(256);
        harness.unfeed(Flanger::INPUT);
        for _ in 1..blocks {
            samples.extend(harness.run(256));
        }
        samples
    }

    #[test]
    fn test_offset_is_one_period() {
        // 48000 / 440 = 109.09 samples
        let offset = Flanger::offset_for(SCT_A440);
        assert!((offset as i32 - 1745).abs() <= 1, "{offset}");
        assert_eq!(Flanger::offset_for(32767), MIN_OFFSET);
        assert_eq!(Flanger::offset_for(-32767), MAX_OFFSET);
    }

    #[test]
    fn test_echo_at_one_period() {
        let mut harness = wet_only();
        let samples = impulse_response(&mut harness, 1);
        let (peak, _) = samples
            .iter()
            .enumerate()
            .max_by_key(|&(_, s)| s.abs())
            .unwrap();
        assert!((109..=110).contains(&peak), "echo at {peak}");
        assert!(samples[..100].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_resonance_repeats() {
        let mut harness = wet_only();
        harness.set(Flanger::RESONANCE, 16384);
        harness.set(Flanger::MANUAL, SCT_A440 + 2400);
        let samples = impulse_response(&mut harness, 1);
        let energy = |range: std::ops::Range<usize>| -> i64 {
            samples[range].iter().map(|&s| (s as i64).abs()).sum()
        };
        let first = energy(50..60);
        let second = energy(105..115);
        assert!(first > 0 && second > 0);
        assert!(second < first);
    }

    #[test]
    fn test_decay_feedback() {
        let flanger = Flanger::create(0).unwrap();
        let short = flanger.decay_feedback(10);
        let long = flanger.decay_feedback(1000);
        assert!(short < long);
        assert!(long <= 32767);

        // 109 samples is about 2.27 ms, so 2 ms per 6 dB loses a bit more
        // than half per echo.
        let half = flanger.decay_feedback(2);
        assert!(half < 16384 && half > 8000, "{half}");
    }

    #[test]
    fn test_negative_decay_inverts_feedback() {
        let mut flanger = Flanger::create(0).unwrap();
        let positive = flanger.update(SCT_A440, 100);
        let negative = flanger.update(SCT_A440, -100);
        assert_eq!(positive, -negative);
        assert_eq!(flanger.update(SCT_A440, 0), 0);
    }

    #[test]
    fn test_dry_default_mix() {
        let mut harness = Harness::new(Flanger::create(0).unwrap());
        harness.feed(Flanger::INPUT, &[10000]);
        let out = harness.run(1)[0];
        // Half dry at 1 << 14.
        assert!((out as i32 - 5000).abs() <= 2, "{out}");
    }
}
