//! Multipitch module.
//!
//! Takes one pitch and produces a configurable number of shifted copies,
//! folded by octaves into a pitch range. Trigger input is passed through so
//! a chord of voices can hang off one source.

use crate::dsp::pitch::SCT_PER_OCTAVE;
use crate::dsp::{
    clip, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort,
    PortDefinition, RenderContext, SignalHint, TriggerDecoder, TriggerEncoder, TriggerEvent,
    SCT_A440,
};

/// Largest number of shifted outputs.
pub const MAX_OUTPUTS: u32 = 127;

/// Control-rate pitch splitter.
///
/// All outputs are computed once per block from the first sample of each
/// input.
///
/// # Ports
///
/// - **Input** (0): source pitch.
/// - **Thru** (1): source pitch plus modulation, folded into range.
/// - **Trigger In / Trigger Thru** (2, 3)
/// - **Mod In** (4): full scale shifts by one octave at unity sensitivity.
/// - **Mod Sens** (5): modulation gain.
/// - **Max Pitch / Min Pitch** (6, 7): folding range, swapped if inverted.
/// - then for each output `k`: **Output** (`8 + 2k`) and **Shift** (`9 + 2k`),
///   where a shift of A440 means no shift.
///
/// # Config
///
/// Number of shifted outputs, 0 to 127.
pub struct Multipitch {
    ports: Vec<PortDefinition>,
    outputs: usize,
    trigger_in: TriggerDecoder,
    trigger_thru: TriggerEncoder,
}

impl Multipitch {
    pub const INPUT: InputPort = InputPort(0);
    pub const THRU: OutputPort = OutputPort(1);
    pub const TRIGGER_IN: InputPort = InputPort(2);
    pub const TRIGGER_THRU: OutputPort = OutputPort(3);
    pub const MOD_IN: InputPort = InputPort(4);
    pub const MOD_SENS: InputPort = InputPort(5);
    pub const MAX_PITCH: InputPort = InputPort(6);
    pub const MIN_PITCH: InputPort = InputPort(7);

    /// Shifted output `k`.
    pub const fn output(k: usize) -> OutputPort {
        OutputPort(8 + 2 * k)
    }

    /// Shift of output `k`, relative to A440.
    pub const fn shift(k: usize) -> InputPort {
        InputPort(9 + 2 * k)
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

/// Moves `pitch` by whole octaves until it is no longer outside `[min, max]`.
fn fold_into_range(pitch: i32, min: i32, max: i32) -> i32 {
    let octave = SCT_PER_OCTAVE;
    if pitch > max {
        pitch - octave * ((pitch - max + octave - 1) / octave)
    } else if pitch < min {
        pitch + octave * ((min - pitch + octave - 1) / octave)
    } else {
        pitch
    }
}

impl DspModule for Multipitch {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &self.ports
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        // The first edge in the block wins.
        let trigger = ctx.input(Self::TRIGGER_IN);
        for i in 0..ctx.num_samples() {
            match self.trigger_in.decode(trigger.get(i)) {
                TriggerEvent::Start(velocity) => {
                    self.trigger_thru.start(velocity);
                    break;
                }
                TriggerEvent::Stop(_) => {
                    self.trigger_thru.stop();
                    break;
                }
                _ => {}
            }
            if trigger.constant().is_some() {
                break;
            }
        }
        ctx.set_output_const(Self::TRIGGER_THRU, self.trigger_thru.value());

        let mut max = ctx.input(Self::MAX_PITCH).first() as i32;
        let mut min = ctx.input(Self::MIN_PITCH).first() as i32;
        if max < min {
            std::mem::swap(&mut max, &mut min);
        }

        let modulation = ctx.input(Self::MOD_IN).first() as i64
            * ctx.input(Self::MOD_SENS).first() as i64;
        let pitch = ctx.input(Self::INPUT).first() as i32 + ((modulation * 76_806) >> 32) as i32;

        ctx.set_output_const(Self::THRU, clip(fold_into_range(pitch, min, max)));
        for k in 0..self.outputs {
            let shift = ctx.input(Self::shift(k)).first() as i32 - SCT_A440 as i32;
            let shifted = fold_into_range(pitch + shift, min, max);
            ctx.set_output_const(Self::output(k), clip(shifted));
        }
    }
}

impl ModuleKind for Multipitch {
    const INFO: ModuleInfo = ModuleInfo {
        id: 37,
        name: "multipitch",
        category: ModuleCategory::Utility,
        description: "Takes a pitch input and provides a number of shifted outputs; config is the number of outputs (max 127)",
    };

    fn create(config: u32) -> Option<Self> {
        let outputs = config.min(MAX_OUTPUTS) as usize;

        let mut ports = Vec::new();
        ports.try_reserve_exact(8 + 2 * outputs).ok()?;
        ports.extend([
            PortDefinition::input("input", "Input", SignalHint::Pitch, SCT_A440),
            PortDefinition::output("thru", "Thru", SignalHint::Pitch),
            PortDefinition::input("trigger_in", "Trigger In", SignalHint::Trigger, 0),
            PortDefinition::output("trigger_thru", "Trigger Thru", SignalHint::Trigger),
            PortDefinition::input("mod_in", "Mod In", SignalHint::Linear, 0),
            PortDefinition::input("mod_sens", "Mod Sens", SignalHint::Gain, crate::dsp::UNITY_GAIN),
            PortDefinition::input(
                "max_pitch",
                "Max Pitch",
                SignalHint::Pitch,
                SCT_A440 + 4 * SCT_PER_OCTAVE as i16,
            ),
            PortDefinition::input(
                "min_pitch",
                "Min Pitch",
                SignalHint::Pitch,
                SCT_A440 - 4 * SCT_PER_OCTAVE as i16,
            ),
        ]);
        for k in 0..outputs as u16 {
            ports.push(PortDefinition::output("output", "Output", SignalHint::Pitch).in_group(k));
            ports.push(PortDefinition::input("shift", "Shift", SignalHint::Pitch, SCT_A440).in_group(k));
        }

        Some(Self {
            ports,
            outputs,
            trigger_in: TriggerDecoder::new(),
            trigger_thru: TriggerEncoder::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    #[test]
    fn test_fold_into_range() {
        assert_eq!(fold_into_range(1000, 0, 5000), 1000);
        assert_eq!(fold_into_range(5001, 0, 5000), 2601);
        assert_eq!(fold_into_range(7400, 0, 5000), 5000);
        assert_eq!(fold_into_range(7401, 0, 5000), 2601);
        assert_eq!(fold_into_range(-1, 0, 5000), 2399);
        assert_eq!(fold_into_range(-2400, 0, 5000), 0);
    }

    #[test]
    fn test_shifted_outputs() {
        let mut harness = Harness::new(Multipitch::create(2).unwrap());
        harness.set(Multipitch::shift(0), SCT_A440 + 700);
        harness.set(Multipitch::shift(1), SCT_A440 - 1200);
        harness.render(16);

        assert_eq!(harness.signal(1).block_constant(), Some(SCT_A440));
        assert_eq!(harness.signal(8).block_constant(), Some(SCT_A440 + 700));
        assert_eq!(harness.signal(10).block_constant(), Some(SCT_A440 - 1200));
    }

    #[test]
    fn test_outputs_fold_by_octaves() {
        let mut harness = Harness::new(Multipitch::create(1).unwrap());
        harness.set(Multipitch::MAX_PITCH, SCT_A440 + 1200);
        harness.set(Multipitch::shift(0), SCT_A440 + 2000);
        harness.render(16);
        assert_eq!(harness.signal(8).block_constant(), Some(SCT_A440 - 400));
    }

    #[test]
    fn test_modulation_full_scale_is_an_octave() {
        let mut harness = Harness::new(Multipitch::create(0).unwrap());
        harness.set(Multipitch::MOD_IN, 32767);
        harness.render(16);
        let thru = harness.signal(1).block_constant().unwrap();
        assert!((thru as i32 - (SCT_A440 as i32 + 2400)).abs() <= 1);
    }

    #[test]
    fn test_trigger_passes_through() {
        let mut harness = Harness::new(Multipitch::create(0).unwrap());
        harness.set(Multipitch::TRIGGER_IN, 500);
        harness.render(16);
        let started = harness.signal(3).block_constant().unwrap();
        assert_eq!(started, 500);

        harness.render(16);
        assert_eq!(harness.signal(3).block_constant(), Some(500));

        harness.set(Multipitch::TRIGGER_IN, -500);
        harness.render(16);
        assert_eq!(harness.signal(3).block_constant(), Some(-500));
    }
}
