//! Range Shifter module.
//!
//! Maps the input range `[input_a, input_b]` linearly onto
//! `[output_a, output_b]` with saturation.

use crate::dsp::{
    clip, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort,
    PortDefinition, RenderContext, SignalHint,
};

/// Saturating linear remap.
///
/// # Ports
///
/// - **Output** (0)
/// - **Input** (1)
/// - **Output A / Output B** (2, 3): values `input_a` and `input_b` map to.
/// - **Input A / Input B** (4, 5): the input range.
///
/// The range ends are read once per block. A zero-width input range
/// outputs the midpoint of the output range.
pub struct RangeShifter;

impl RangeShifter {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const OUTPUT_A: InputPort = InputPort(2);
    pub const OUTPUT_B: InputPort = InputPort(3);
    pub const INPUT_A: InputPort = InputPort(4);
    pub const INPUT_B: InputPort = InputPort(5);

    const PORTS: [PortDefinition; 6] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("output_a", "Output A", SignalHint::Linear, -32767),
        PortDefinition::input("output_b", "Output B", SignalHint::Linear, 32767),
        PortDefinition::input("input_a", "Input A", SignalHint::Linear, -32767),
        PortDefinition::input("input_b", "Input B", SignalHint::Linear, 32767),
    ];
}

/// Precomputed mapping for one block.
#[derive(Clone, Copy, Debug)]
enum Mapping {
    Constant(i16),
    Linear {
        input_a: i32,
        input_b: i32,
        output_a: i32,
        output_b: i32,
        /// Slope in 2.14 fixed point.
        slope: i32,
    },
}

impl Mapping {
    fn new(input_a: i16, input_b: i16, output_a: i16, output_b: i16) -> Self {
        let (input_a, input_b) = (input_a as i32, input_b as i32);
        let (output_a, output_b) = (output_a as i32, output_b as i32);
        let output_span = output_b - output_a;
        let input_span = input_b - input_a;

        if output_span == 0 {
            return Mapping::Constant(output_a as i16);
        }
        if input_span == 0 {
            return Mapping::Constant(((output_a + output_b) / 2) as i16);
        }
        Mapping::Linear {
            input_a,
            input_b,
            output_a,
            output_b,
            slope: (output_span << 14) / input_span,
        }
    }

    #[inline]
    fn apply(&self, input: i16) -> i16 {
        match *self {
            Mapping::Constant(value) => value,
            Mapping::Linear {
                input_a,
                input_b,
                output_a,
                output_b,
                slope,
            } => {
                let input = input as i32;
                if input == input_a {
                    clip(output_a)
                } else if input == input_b {
                    clip(output_b)
                } else {
                    let mapped = (((input - input_a) as i64 * slope as i64) >> 14) + output_a as i64;
                    clip(mapped.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                }
            }
        }
    }
}

impl DspModule for RangeShifter {
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
        let mapping = Mapping::new(
            ctx.input(Self::INPUT_A).first(),
            ctx.input(Self::INPUT_B).first(),
            ctx.input(Self::OUTPUT_A).first(),
            ctx.input(Self::OUTPUT_B).first(),
        );

        let input = ctx.input(Self::INPUT);
        if let Mapping::Constant(value) = mapping {
            ctx.set_output_const(Self::OUT, value);
        } else if let Some(value) = input.constant() {
            ctx.set_output_const(Self::OUT, mapping.apply(value));
        } else {
            for i in 0..ctx.num_samples() {
                ctx.set_output(Self::OUT, i, mapping.apply(input.get(i)));
            }
        }
    }
}

impl ModuleKind for RangeShifter {
    const INFO: ModuleInfo = ModuleInfo {
        id: 68,
        name: "range_shifter",
        category: ModuleCategory::Utility,
        description: "Saturating linear remap",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self)
    }
}
