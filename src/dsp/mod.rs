//! DSP module
//!
//! Core DSP traits and types.
//! Defines the DspModule trait, ports, signals, fixed-point arithmetic,
//! pitch conversion and trigger encoding.

pub mod context;
pub mod fixed;
pub mod module_trait;
pub mod pitch;
pub mod port;
pub mod random;
pub mod registry;
pub mod signal;
pub mod trigger;

pub use context::{Input, RenderContext, Unlinked, UpstreamSignals};
pub use fixed::{
    add_sat, clip, gain, mult_shift, Sample, SAMPLE_MAX, SAMPLE_MIN, SAMPLE_RATE, UNITY_GAIN,
};
pub use module_trait::{DspModule, ModuleCategory, ModuleInfo, ModuleKind};
pub use pitch::{pitch_to_step, SCT_A440, SCT_PER_OCTAVE};
pub use port::{InputPort, OutputPort, PortDefinition, PortDirection};
pub use registry::{ModuleDescriptor, ModuleRegistry, RegistryError, REGISTRY_CAPACITY};
pub use signal::{Signal, SignalHint, MAX_BLOCK_SIZE};
pub use trigger::{TriggerDecoder, TriggerEncoder, TriggerEvent};
