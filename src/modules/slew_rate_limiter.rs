//! Slew Rate Limiter module.
//!
//! Limits how far the output may move per sample. A cheap nonlinear
//! lowpass, also useful as portamento on pitch signals.

use crate::dsp::{
    DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort, PortDefinition,
    RenderContext, SignalHint,
};

/// Per-sample slew limiter.
///
/// # Ports
///
/// - **Output** (0): follows the input, moving at most **Slew Rate** per
///   sample.
/// - **Input** (1)
/// - **Slew Rate** (2): read as an unsigned step size, so negative values
///   are very fast.
pub struct SlewRateLimiter {
    current: i32,
}

impl SlewRateLimiter {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const SLEW_RATE: InputPort = InputPort(2);

    const PORTS: [PortDefinition; 3] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("slew_rate", "Slew Rate", SignalHint::Linear, 1000),
    ];

    fn step(&mut self, input: i16, rate: i16) -> i16 {
        let input = input as i32;
        let rate = rate as u16 as i32;
        self.current = if input - self.current > rate {
            self.current + rate
        } else if self.current - input > rate {
            self.current - rate
        } else {
            input
        };
        self.current as i16
    }
}

impl DspModule for SlewRateLimiter {
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
        let rate = ctx.input(Self::SLEW_RATE);
        for i in 0..ctx.num_samples() {
            let value = self.step(input.get(i), rate.get(i));
            ctx.set_output(Self::OUT, i, value);
        }
    }
}

impl ModuleKind for SlewRateLimiter {
    const INFO: ModuleInfo = ModuleInfo {
        id: 23,
        name: "slew_rate_limiter",
        category: ModuleCategory::Filter,
        description: "Very cheap nonlinear filter",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self { current: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    fn limiter() -> Harness<SlewRateLimiter> {
        Harness::new(SlewRateLimiter::create(0).unwrap())
    }

    #[test]
    fn test_ramps_toward_step() {
        let mut harness = limiter();
        harness.set(SlewRateLimiter::INPUT, 4500);
        assert_eq!(harness.run(6), vec![1000, 2000, 3000, 4000, 4500, 4500]);

        harness.set(SlewRateLimiter::INPUT, -32767);
        harness.set(SlewRateLimiter::SLEW_RATE, 30000);
        assert_eq!(harness.run(3), vec![-25500, -32767, -32767]);
    }

    #[test]
    fn test_state_carries_across_blocks() {
        let mut harness = limiter();
        harness.set(SlewRateLimiter::INPUT, 10000);
        harness.run(2);
        harness.set(SlewRateLimiter::SLEW_RATE, 0);
        assert!(harness.run(8).iter().all(|&s| s == 2000));
    }

    #[test]
    fn test_negative_rate_is_fast() {
        let mut harness = limiter();
        harness.set(SlewRateLimiter::SLEW_RATE, -1);
        harness.feed(SlewRateLimiter::INPUT, &[32767, -32767, 5]);
        assert_eq!(harness.run(3), vec![32767, -32767, 5]);
    }
}
