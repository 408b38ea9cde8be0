//! Ampliverter module.
//!
//! Scales a signal by a signed gain and adds a bias, saturating. A negative
//! gain inverts.

use crate::dsp::{
    add_sat, mult_shift, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind,
    OutputPort, PortDefinition, RenderContext, SignalHint,
};

/// Gain and offset stage.
///
/// # Ports
///
/// - **Output** (0): `input * gain + bias`, saturated.
/// - **Input** (1)
/// - **Gain** (2): 1.15 fraction; 32767 passes the input, zero outputs the
///   bias alone.
/// - **Bias** (3)
pub struct Ampliverter;

impl Ampliverter {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const GAIN: InputPort = InputPort(2);
    pub const BIAS: InputPort = InputPort(3);

    const PORTS: [PortDefinition; 4] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("gain", "Gain", SignalHint::Linear, 32767),
        PortDefinition::input("bias", "Bias", SignalHint::Linear, 0),
    ];

    fn apply(input: i16, gain: i16, bias: i16) -> i16 {
        if gain == 0 {
            return bias;
        }
        add_sat(mult_shift(input, gain), bias)
    }
}

impl DspModule for Ampliverter {
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
        let gain = ctx.input(Self::GAIN);
        let bias = ctx.input(Self::BIAS);

        if let (Some(input), Some(gain), Some(bias)) =
            (input.constant(), gain.constant(), bias.constant())
        {
            ctx.set_output_const(Self::OUT, Self::apply(input, gain, bias));
            return;
        }
        for i in 0..ctx.num_samples() {
            let value = Self::apply(input.get(i), gain.get(i), bias.get(i));
            ctx.set_output(Self::OUT, i, value);
        }
    }
}

impl ModuleKind for Ampliverter {
    const INFO: ModuleInfo = ModuleInfo {
        id: 69,
        name: "ampliverter",
        category: ModuleCategory::Utility,
        description: "Saturating multiplication and addition",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    #[test]
    fn test_default_is_near_identity() {
        let mut harness = Harness::new(Ampliverter);
        harness.feed(Ampliverter::INPUT, &[0, 1000, -1000, 32767]);
        assert_eq!(harness.run(4), vec![0, 999, -1000, 32766]);
    }

    #[test]
    fn test_negative_gain_inverts() {
        let mut harness = Harness::new(Ampliverter);
        harness.set(Ampliverter::GAIN, -16384);
        harness.feed(Ampliverter::INPUT, &[2000, -2000]);
        assert_eq!(harness.run(2), vec![-1000, 1000]);
    }

    #[test]
    fn test_bias_saturates() {
        let mut harness = Harness::new(Ampliverter);
        harness.set(Ampliverter::BIAS, 30000);
        harness.feed(Ampliverter::INPUT, &[10000, -10000]);
        assert_eq!(harness.run(2), vec![32767, 20000]);
    }

    #[test]
    fn test_zero_gain_outputs_bias() {
        let mut harness = Harness::new(Ampliverter);
        harness.set(Ampliverter::GAIN, 0);
        harness.set(Ampliverter::BIAS, -1234);
        harness.set(Ampliverter::INPUT, 32767);
        harness.render(16);
        assert_eq!(harness.signal(0).block_constant(), Some(-1234));
    }
}
