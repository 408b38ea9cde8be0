//! Engine module
//!
//! Patch graph, the control/audio command protocol and the optional cpal
//! host. The control side owns a [`PatchController`]; the audio side owns
//! an [`AudioProcessor`], and the two only talk through lock-free queues.

#[cfg(feature = "audio-host")]
pub mod audio_engine;
pub mod audio_processor;
pub mod channels;
pub mod commands;
pub mod controller;
pub mod instance;
pub mod layout;
pub mod patch_graph;

#[cfg(feature = "audio-host")]
pub use audio_engine::{AudioEngine, AudioError, DeviceInfo};
pub use audio_processor::AudioProcessor;
pub use channels::{
    ControlHandle, EngineChannels, EngineHandle, DEFAULT_COMMAND_BUFFER_SIZE,
    DEFAULT_EVENT_BUFFER_SIZE,
};
pub use commands::{EngineCommand, EngineEvent, Garbage, GraphEntry};
pub use controller::{ControlError, NodeRecord, PatchController, TableWrite};
pub use instance::Instance;
pub use layout::{GraphError, InstanceHandle, PortRef, MAX_INSTANCES};
pub use patch_graph::PatchGraph;
