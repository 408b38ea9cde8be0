//! Distortion module.
//!
//! Waveshaper with a 129-point transfer curve held in table memory. The
//! curve can be rewritten from the control plane through a table write.

use crate::dsp::fixed::try_alloc_table;
use crate::dsp::{
    clip, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort,
    PortDefinition, RenderContext, SignalHint,
};

/// Number of points in the transfer curve.
pub const CURVE_POINTS: usize = 129;

/// Table-driven waveshaper.
///
/// The input range is split into 128 segments of 512 values; the output
/// interpolates linearly between the two curve points around the input.
///
/// # Ports
///
/// - **Output** (0)
/// - **Input** (1)
pub struct Distortion {
    curve: Box<[i16]>,
}

impl Distortion {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);

    const PORTS: [PortDefinition; 2] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
    ];

    /// Mild symmetric saturation, the curve every instance starts with.
    fn fill_default_curve(curve: &mut [i16]) {
        for (i, point) in curve.iter_mut().enumerate() {
            let i = i as i32;
            *point = if i < 64 {
                ((i * i * 32767) >> 12) - 32767
            } else {
                32767 - (((128 - i) * (128 - i) * 32767) >> 12)
            } as i16;
        }
    }

    #[inline]
    fn shape(&self, input: i16) -> i16 {
        let position = input as i32 + 32768;
        let index = (position >> 9) as usize;
        let blend = position & 511;
        let low = self.curve[index] as i32;
        let high = self.curve[index + 1] as i32;
        clip((low * (512 - blend) + high * blend) >> 9)
    }
}

impl DspModule for Distortion {
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
        let input = ctx.input(Self::INPUT);
        if let Some(value) = input.constant() {
            ctx.set_output_const(Self::OUT, self.shape(value));
            return;
        }
        for i in 0..ctx.num_samples() {
            let value = self.shape(input.get(i));
            ctx.set_output(Self::OUT, i, value);
        }
    }

    fn table(&self) -> &[i16] {
        &self.curve
    }

    fn table_mut(&mut self) -> &mut [i16] {
        &mut self.curve
    }
}

impl ModuleKind for Distortion {
    const INFO: ModuleInfo = ModuleInfo {
        id: 9000,
        name: "distortion",
        category: ModuleCategory::Effect,
        description: "Distortion with linear interpolation between 129 table points",
    };

    fn create(_config: u32) -> Option<Self> {
        let mut curve = try_alloc_table(CURVE_POINTS)?;
        Self::fill_default_curve(&mut curve);
        Some(Self { curve })
    }
}
