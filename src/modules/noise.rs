//! Noise module.
//!
//! Uniform white noise at audio rate, or one random value per block.

use crate::dsp::random::Xorshift32;
use crate::dsp::{
    DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort, PortDefinition,
    RenderContext, SignalHint,
};

/// White noise source.
///
/// # Ports
///
/// - **Output** (0): noise samples.
/// - **Speed** (1): negative values hold one random value per block, which
///   makes a cheap stepped modulation source.
pub struct Noise {
    rng: Xorshift32,
}

impl Noise {
    pub const OUT: OutputPort = OutputPort(0);
    pub const SPEED: InputPort = InputPort(1);

    const PORTS: [PortDefinition; 2] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("speed", "Speed", SignalHint::Linear, 32767),
    ];
}

impl DspModule for Noise {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        if ctx.input(Self::SPEED).first() < 0 {
            let value = self.rng.next_sample();
            ctx.set_output_const(Self::OUT, value);
            return;
        }
        for i in 0..ctx.num_samples() {
            let value = self.rng.next_sample();
            ctx.set_output(Self::OUT, i, value);
        }
    }
}

impl ModuleKind for Noise {
    const INFO: ModuleInfo = ModuleInfo {
        id: 0,
        name: "noise",
        category: ModuleCategory::Source,
        description: "Random data",
    };

    /// The config word seeds the generator.
    fn create(config: u32) -> Option<Self> {
        Some(Self {
            rng: Xorshift32::new(0x2545_f491 ^ config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    #[test]
    fn test_noise_audio_rate() {
        let mut harness = Harness::new(Noise::create(0).unwrap());
        let block = harness.run(64);
        assert!(harness.signal(0).block_constant().is_none());
        assert!(block.windows(2).any(|pair| pair[0] != pair[1]));
        assert!(block.iter().all(|&s| s != i16::MIN));
    }

    #[test]
    fn test_noise_block_rate() {
        let mut harness = Harness::new(Noise::create(0).unwrap());
        harness.set(Noise::SPEED, -1);
        harness.render(64);
        let first = harness.signal(0).block_constant();
        assert!(first.is_some());
        harness.render(64);
        assert_ne!(harness.signal(0).block_constant(), first);
    }

    #[test]
    fn test_noise_seeds_differ() {
        let a = Harness::new(Noise::create(1).unwrap()).run(16);
        let b = Harness::new(Noise::create(2).unwrap()).run(16);
        assert_ne!(a, b);
    }
}
