//! Modules module
//!
//! The built-in module catalog: sound sources, envelopes, filters, delays,
//! mixers, slew limiting, gain, pitch and sequencing utilities.

use std::sync::OnceLock;

use crate::dsp::{ModuleRegistry, RegistryError};

pub mod ampliverter;
pub mod delay;
pub mod distortion;
pub mod envelope;
pub mod filter;
pub mod flanger;
pub mod mixer;
pub mod multipitch;
pub mod noise;
pub mod noise_burst;
pub mod oscillator;
pub mod range_shifter;
pub mod sampler;
pub mod sequencer;
pub mod slew_rate_limiter;

pub use ampliverter::Ampliverter;
pub use delay::StaticDelay;
pub use distortion::Distortion;
pub use envelope::AdsrEnvelope;
pub use filter::Filter;
pub use flanger::Flanger;
pub use mixer::Mixer;
pub use multipitch::Multipitch;
pub use noise::Noise;
pub use noise_burst::NoiseBurst;
pub use oscillator::Oscillator;
pub use range_shifter::RangeShifter;
pub use sampler::Sampler;
pub use sequencer::Sequencer;
pub use slew_rate_limiter::SlewRateLimiter;

/// Creates a registry holding every built-in module kind.
pub fn create_module_registry() -> Result<ModuleRegistry, RegistryError> {
    let mut registry = ModuleRegistry::new();
    registry.register::<Oscillator>()?;
    registry.register::<Filter>()?;
    registry.register::<Sequencer>()?;
    registry.register::<Sampler>()?;
    registry.register::<Multipitch>()?;
    registry.register::<Distortion>()?;
    registry.register::<Mixer>()?;
    registry.register::<Flanger>()?;
    registry.register::<Noise>()?;
    registry.register::<NoiseBurst>()?;
    registry.register::<AdsrEnvelope>()?;
    registry.register::<StaticDelay>()?;
    registry.register::<RangeShifter>()?;
    registry.register::<SlewRateLimiter>()?;
    registry.register::<Ampliverter>()?;
    Ok(registry)
}

/// Process-wide registry of the built-in kinds, built on first use.
///
/// # Panics
///
/// Panics if the built-in catalog does not fit the registry. That is a
/// build-time resource limit, not a runtime condition.
pub fn standard_registry() -> &'static ModuleRegistry {
    static REGISTRY: OnceLock<ModuleRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        create_module_registry()
            .unwrap_or_else(|err| panic!("built-in modules do not fit the registry: {err}"))
    })
}

/// Drives a single module outside a graph.
#[cfg(test)]
pub(crate) mod testing {
    use crate::dsp::{
        DspModule, InputPort, OutputPort, PortDirection, RenderContext, Signal, UpstreamSignals,
    };

    struct Feeds<'a>(&'a [Option<Signal>]);

    impl UpstreamSignals for Feeds<'_> {
        fn upstream(&self, port: usize) -> Option<&Signal> {
            self.0.get(port)?.as_ref()
        }
    }

    pub struct Harness<M: DspModule> {
        pub module: M,
        signals: Vec<Signal>,
        feeds: Vec<Option<Signal>>,
        pass: u64,
    }

    impl<M: DspModule> Harness<M> {
        /// Wraps a module with every output attached.
        pub fn new(module: M) -> Self {
            let signals: Vec<Signal> = module
                .ports()
                .iter()
                .map(|port| match port.direction {
                    PortDirection::Input => Signal::input(port.default_value),
                    PortDirection::Output => {
                        let mut signal = Signal::output().unwrap();
                        signal.set_attached(true);
                        signal
                    }
                })
                .collect();
            let feeds = (0..signals.len()).map(|_| None).collect();
            Self {
                module,
                signals,
                feeds,
                pass: 0,
            }
        }

        pub fn set(&mut self, port: InputPort, value: i16) {
            self.signals[port.index()].set_value(value);
        }

        /// Streams `samples` into an input for the following renders.
        pub fn feed(&mut self, port: InputPort, samples: &[i16]) {
            let mut signal = Signal::output().unwrap();
            for (i, &sample) in samples.iter().enumerate() {
                signal.write(i, sample);
            }
            self.feeds[port.index()] = Some(signal);
        }

        pub fn unfeed(&mut self, port: InputPort) {
            self.feeds[port.index()] = None;
        }

        pub fn detach(&mut self, port: OutputPort) {
            self.signals[port.index()].set_attached(false);
        }

        pub fn render(&mut self, num_samples: usize) {
            self.pass += 1;
            let feeds = Feeds(&self.feeds);
            let mut ctx = RenderContext::new(num_samples, self.pass, &mut self.signals, &feeds);
            self.module.render(&mut ctx);
        }

        /// Output block of the last render.
        pub fn output(&mut self, port: OutputPort, num_samples: usize) -> Vec<i16> {
            self.signals[port.index()].block(num_samples).to_vec()
        }

        /// Renders and returns output port 0.
        pub fn run(&mut self, num_samples: usize) -> Vec<i16> {
            self.render(num_samples);
            self.output(OutputPort(0), num_samples)
        }

        pub fn signal(&self, port: usize) -> &Signal {
            &self.signals[port]
        }
    }
}
