//! Mixer module.
//!
//! Sums a configurable number of inputs, each with its own gain, then
//! applies a master gain. A leaky integrator tracks the DC level of the sum
//! and subtracts it when DC blocking is enabled.

use crate::dsp::{
    clip, gain, DspModule, Input, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort,
    PortDefinition, RenderContext, SignalHint, UNITY_GAIN,
};

/// Default number of inputs when the config word is zero.
pub const DEFAULT_INPUTS: u32 = 4;

/// Largest number of inputs.
pub const MAX_INPUTS: u32 = 127;

/// Integrator time constant, as a power of two in samples (1024).
const DC_SHIFT: u32 = 10;

/// N-input mixer.
///
/// # Ports
///
/// - **Output** (0)
/// - **Gain** (1): master gain, unity divided by the input count by default.
/// - **Block DC** (2): nonzero enables DC removal.
/// - then for each input `k`: **Input** (`3 + 2k`) and **Input Gain** (`4 + 2k`).
///
/// # Config
///
/// Number of inputs, 1 to 127; zero selects 4.
pub struct Mixer {
    ports: Vec<PortDefinition>,
    inputs: usize,
    /// DC estimate scaled by 2^12.
    dc_acc: i64,
}

impl Mixer {
    pub const OUT: OutputPort = OutputPort(0);
    pub const GAIN: InputPort = InputPort(1);
    pub const BLOCK_DC: InputPort = InputPort(2);

    /// Signal input `k`.
    pub const fn input(k: usize) -> InputPort {
        InputPort(3 + 2 * k)
    }

    /// Gain of input `k`.
    pub const fn input_gain(k: usize) -> InputPort {
        InputPort(4 + 2 * k)
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }
}

/// One input resolved for the block.
#[derive(Clone, Copy)]
struct Channel<'a> {
    input: Input<'a>,
    gain: Input<'a>,
}

impl Channel<'_> {
    fn is_silent(&self) -> bool {
        self.input.constant() == Some(0) || self.gain.constant() == Some(0)
    }
}

impl DspModule for Mixer {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &self.ports
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        if !ctx.is_connected(Self::OUT) {
            return;
        }

        // At most MAX_INPUTS channels; resolved without allocating.
        let mut active = [None; MAX_INPUTS as usize];
        let mut count = 0;
        for k in 0..self.inputs {
            let channel = Channel {
                input: ctx.input(Self::input(k)),
                gain: ctx.input(Self::input_gain(k)),
            };
            if !channel.is_silent() {
                active[count] = Some(channel);
                count += 1;
            }
        }
        if count == 0 {
            ctx.set_output_const(Self::OUT, 0);
            return;
        }

        let master = ctx.input(Self::GAIN);
        let block_dc = ctx.input(Self::BLOCK_DC).first() != 0;
        for i in 0..ctx.num_samples() {
            let mut sum: i64 = 0;
            for channel in active[..count].iter().flatten() {
                sum += gain(channel.input.get(i), channel.gain.get(i)) as i64;
            }
            if block_dc {
                self.dc_acc += ((sum << 12) - self.dc_acc) >> DC_SHIFT;
                sum -= self.dc_acc >> 12;
            }
            let out = (sum * master.get(i) as i64) >> 12;
            ctx.set_output(Self::OUT, i, clip(out.clamp(i32::MIN as i64, i32::MAX as i64) as i32));
        }
    }
}

impl ModuleKind for Mixer {
    const INFO: ModuleInfo = ModuleInfo {
        id: 21,
        name: "mixer",
        category: ModuleCategory::Utility,
        description: "Sums inputs and applies output gain; config is the number of inputs (1-127, default 4)",
    };

    fn create(config: u32) -> Option<Self> {
        let inputs = match config {
            0 => DEFAULT_INPUTS,
            n => n.min(MAX_INPUTS),
        } as usize;

        let mut ports = Vec::new();
        ports.try_reserve_exact(3 + 2 * inputs).ok()?;
        ports.push(PortDefinition::output("output", "Output", SignalHint::Linear));
        ports.push(PortDefinition::input(
            "gain",
            "Gain",
            SignalHint::Gain,
            UNITY_GAIN / inputs as i16,
        ));
        ports.push(PortDefinition::input("block_dc", "Block DC", SignalHint::Linear, 32767));
        for k in 0..inputs as u16 {
            ports.push(PortDefinition::input("input", "Input", SignalHint::Linear, 0).in_group(k));
            ports.push(
                PortDefinition::input("input_gain", "Input Gain", SignalHint::Gain, UNITY_GAIN)
                    .in_group(k),
            );
        }

        Some(Self {
            ports,
            inputs,
            dc_acc: 0,
        })
    }
}
