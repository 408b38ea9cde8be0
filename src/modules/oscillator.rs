//! Oscillator module.
//!
//! Generates periodic waveforms from a 32-bit phase accumulator. Supports
//! sine, triangle, square, sawtooth and noise, linear FM and hard sync.

use crate::dsp::random::Xorshift32;
use crate::dsp::{
    clip, pitch_to_step, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind,
    OutputPort, PortDefinition, RenderContext, SignalHint, TriggerDecoder, TriggerEvent, SCT_A440,
};

/// Waveform select values at the center of each band.
pub const WAVE_SINE: i16 = -32767;
pub const WAVE_TRIANGLE: i16 = -13107;
pub const WAVE_SQUARE: i16 = 0;
pub const WAVE_SAW: i16 = 13107;
pub const WAVE_NOISE: i16 = 32767;

/// Available waveforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Saw,
    Noise,
}

impl Waveform {
    /// Splits the select range into five equal bands.
    pub fn from_select(select: i16) -> Self {
        match ((select as i32 + 32767) * 5 / 65535).min(4) {
            0 => Waveform::Sine,
            1 => Waveform::Triangle,
            2 => Waveform::Square,
            3 => Waveform::Saw,
            _ => Waveform::Noise,
        }
    }
}

#[inline]
fn triangle(phase: u32) -> i16 {
    let x = (phase >> 16) as i32;
    if x < 32768 {
        clip(x * 2 - 32767)
    } else {
        clip((65535 - x) * 2 - 32767)
    }
}

/// Parabolic sine approximation, shaped from a triangle.
#[inline]
fn sine(phase: u32) -> i16 {
    let t = triangle(phase.wrapping_add(0x4000_0000)) as i32;
    clip((t * (65535 - t.abs())) >> 15)
}

#[inline]
fn square(phase: u32) -> i16 {
    if phase < 0x8000_0000 {
        32767
    } else {
        -32767
    }
}

#[inline]
fn saw(phase: u32) -> i16 {
    clip((phase >> 16) as i32 - 32768)
}

/// Multi-waveform oscillator.
///
/// # Ports
///
/// - **Output** (0)
/// - **Pitch** (1): SCT, A440 by default.
/// - **Waveform** (2): see [`Waveform::from_select`].
/// - **FM** (3): linear FM, full scale doubles (or stops) the frequency.
/// - **Sync In** (4): a trigger start jumps the phase to **Sync In Phase** (5).
/// - **Sync Out** (6): starts at the beginning of every period.
pub struct Oscillator {
    counter: u32,
    pitch: i16,
    step: u32,
    sync_in: TriggerDecoder,
    rng: Xorshift32,
}

impl Oscillator {
    pub const OUT: OutputPort = OutputPort(0);
    pub const PITCH: InputPort = InputPort(1);
    pub const WAVEFORM: InputPort = InputPort(2);
    pub const FM: InputPort = InputPort(3);
    pub const SYNC_IN: InputPort = InputPort(4);
    pub const SYNC_IN_PHASE: InputPort = InputPort(5);
    pub const SYNC_OUT: OutputPort = OutputPort(6);

    const PORTS: [PortDefinition; 7] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("pitch", "Pitch", SignalHint::Pitch, SCT_A440),
        PortDefinition::input("waveform", "Waveform", SignalHint::Linear, WAVE_SINE),
        PortDefinition::input("fm", "FM", SignalHint::Linear, 0),
        PortDefinition::input("sync_input", "Sync In", SignalHint::Trigger, 0),
        PortDefinition::input("sync_input_phase", "Sync In Phase", SignalHint::Linear, 0),
        PortDefinition::output("sync_output", "Sync Out", SignalHint::Trigger),
    ];

    #[inline]
    fn step_for(&mut self, pitch: i16) -> u32 {
        if pitch != self.pitch {
            self.pitch = pitch;
            self.step = pitch_to_step(pitch);
        }
        self.step
    }

    #[inline]
    fn sample(&mut self, waveform: Waveform) -> i16 {
        match waveform {
            Waveform::Sine => sine(self.counter),
            Waveform::Triangle => triangle(self.counter),
            Waveform::Square => square(self.counter),
            Waveform::Saw => saw(self.counter),
            Waveform::Noise => self.rng.next_sample(),
        }
    }

    #[inline]
    fn sync_out_value(&self) -> i16 {
        if self.counter < 0x8000_0000 {
            32767
        } else {
            -32767
        }
    }
}

impl DspModule for Oscillator {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let out_connected = ctx.is_connected(Self::OUT);
        let sync_connected = ctx.is_connected(Self::SYNC_OUT);

        let pitch = ctx.input(Self::PITCH);
        let waveform = ctx.input(Self::WAVEFORM);
        let fm = ctx.input(Self::FM);
        let sync_in = ctx.input(Self::SYNC_IN);
        let sync_phase = ctx.input(Self::SYNC_IN_PHASE);
        let sync_steady = sync_in.constant().is_some();

        for i in 0..ctx.num_samples() {
            if i == 0 || !sync_steady {
                if let TriggerEvent::Start(_) = self.sync_in.decode(sync_in.get(i)) {
                    self.counter = ((sync_phase.get(i) as i32 + 32767) as u32) << 16;
                }
            }

            let step = self.step_for(pitch.get(i));
            let increment = match fm.get(i) {
                0 => step,
                fm => (step as i64 + ((step as i64 * fm as i64) >> 15)) as u32,
            };
            self.counter = self.counter.wrapping_add(increment);

            if out_connected {
                let out = self.sample(Waveform::from_select(waveform.get(i)));
                ctx.set_output(Self::OUT, i, out);
            }
            if sync_connected {
                ctx.set_output(Self::SYNC_OUT, i, self.sync_out_value());
            }
        }
    }
}

impl ModuleKind for Oscillator {
    const INFO: ModuleInfo = ModuleInfo {
        id: 420,
        name: "osc",
        category: ModuleCategory::Source,
        description: "Oscillator with sine, triangle, square, saw and noise waveforms, linear FM and hard sync",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self {
            counter: 0,
            pitch: SCT_A440,
            step: pitch_to_step(SCT_A440),
            sync_in: TriggerDecoder::new(),
            rng: Xorshift32::default(),
        })
    }
}
