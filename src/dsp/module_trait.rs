//! The core DspModule trait and supporting types.
//!
//! This module defines the interface every module kind implements so that its
//! instances can be created by the registry and rendered by the patch graph.

use super::context::RenderContext;
use super::port::PortDefinition;

/// Category of a module kind, used for organization in listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleCategory {
    /// Sound sources (oscillators, noise generators, samplers).
    Source,
    /// Frequency-shaping modules.
    Filter,
    /// Modulation sources (envelopes).
    Modulation,
    /// Audio effects (delay, flanger, distortion).
    Effect,
    /// Utility modules (mixers, range shifters, pitch helpers).
    Utility,
    /// Clocked pattern generators.
    Sequencing,
}

impl ModuleCategory {
    /// Returns a human-readable name for the category.
    pub fn name(&self) -> &'static str {
        match self {
            ModuleCategory::Source => "Source",
            ModuleCategory::Filter => "Filter",
            ModuleCategory::Modulation => "Modulation",
            ModuleCategory::Effect => "Effect",
            ModuleCategory::Utility => "Utility",
            ModuleCategory::Sequencing => "Sequencing",
        }
    }
}

/// Static information about a module kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Numeric identifier, stable across releases and stored in patches.
    pub id: u32,
    /// Short name (e.g. "osc", "env_adsr").
    pub name: &'static str,
    /// The category this module belongs to.
    pub category: ModuleCategory,
    /// A brief description of what the module does.
    pub description: &'static str,
}

/// The core trait that all module instances implement.
///
/// `DspModule` requires `Send + 'static` because instances are built on the
/// control thread and then moved to the audio thread.
///
/// # Real-time Constraints
///
/// `render` runs on the audio thread and must not allocate, lock, block or
/// perform I/O. Everything an instance needs is allocated when it is created.
pub trait DspModule: Send + 'static {
    /// Returns static information about this module's kind.
    fn info(&self) -> &ModuleInfo;

    /// Returns the port definitions for this instance.
    ///
    /// The list is fixed for the lifetime of the instance; indices into it
    /// are the port indices used for linking and rendering.
    fn ports(&self) -> &[PortDefinition];

    /// Renders `ctx.num_samples()` samples.
    ///
    /// Upstream instances have already been rendered for this pass when this
    /// is called, so every linked input holds current data.
    fn render(&mut self, ctx: &mut RenderContext<'_>);

    /// Kinds that change state visible outside their outputs (recording,
    /// clocks) return true and are rendered every pass even when nothing
    /// consumes their outputs.
    fn has_side_effects(&self) -> bool {
        false
    }

    /// Table memory shared with the control plane (patterns, PCM, curves).
    fn table(&self) -> &[i16] {
        &[]
    }

    fn table_mut(&mut self) -> &mut [i16] {
        &mut []
    }
}

/// A module kind that the registry can instantiate.
pub trait ModuleKind: DspModule + Sized {
    /// Static information about the kind.
    const INFO: ModuleInfo;

    /// Creates an instance from a configuration word.
    ///
    /// Out-of-range configuration is clamped. Returns `None` only when memory
    /// for the instance cannot be allocated.
    fn create(config: u32) -> Option<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::context::Unlinked;
    use crate::dsp::port::OutputPort;
    use crate::dsp::signal::{Signal, SignalHint};

    /// A module that outputs a fixed value.
    struct ConstantSource {
        value: i16,
    }

    const OUTPUT: OutputPort = OutputPort(0);

    impl DspModule for ConstantSource {
        fn info(&self) -> &ModuleInfo {
            &Self::INFO
        }

        fn ports(&self) -> &[PortDefinition] {
            static PORTS: [PortDefinition; 1] =
                [PortDefinition::output("output", "Output", SignalHint::Linear)];
            &PORTS
        }

        fn render(&mut self, ctx: &mut RenderContext<'_>) {
            ctx.set_output_const(OUTPUT, self.value);
        }
    }

    impl ModuleKind for ConstantSource {
        const INFO: ModuleInfo = ModuleInfo {
            id: 9999,
            name: "constant",
            category: ModuleCategory::Source,
            description: "Fixed value",
        };

        fn create(config: u32) -> Option<Self> {
            Some(Self {
                value: config.min(32767) as i16,
            })
        }
    }

    #[test]
    fn test_category_names() {
        assert_eq!(ModuleCategory::Source.name(), "Source");
        assert_eq!(ModuleCategory::Sequencing.name(), "Sequencing");
    }

    #[test]
    fn test_module_defaults() {
        let mut module = ConstantSource::create(12).unwrap();
        assert!(!module.has_side_effects());
        assert!(module.table().is_empty());
        assert!(module.table_mut().is_empty());
        assert_eq!(module.info().id, 9999);
    }

    #[test]
    fn test_render_writes_output() {
        let mut module = ConstantSource::create(100_000).unwrap();
        let mut signals = vec![Signal::output().unwrap()];
        signals[0].set_attached(true);
        let mut ctx = RenderContext::new(8, 1, &mut signals, &Unlinked);
        module.render(&mut ctx);
        assert_eq!(signals[0].block_constant(), Some(32767));
    }

    #[test]
    fn test_module_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn DspModule>>();
    }
}
