//! Engine Commands and Events
//!
//! Defines the messages that flow between the control thread and the audio
//! thread. Everything the audio thread stops using travels back inside an
//! event so that it is freed on the control thread.

use super::instance::Instance;
use super::layout::{Entry, GraphError, InstanceHandle, PortRef};

/// A slot entry as the audio-side graph stores it.
///
/// The payload is `None` only while the instance is being rendered.
pub type GraphEntry = Entry<Option<Box<Instance>>>;

/// Commands sent from the control thread to the audio thread.
///
/// They are applied between render passes, never during one.
#[derive(Debug)]
pub enum EngineCommand {
    /// Place a freshly built instance at a handle minted by the control plane.
    Insert {
        handle: InstanceHandle,
        entry: GraphEntry,
    },

    /// Detach and remove an instance.
    Remove { handle: InstanceHandle },

    /// Link an output port to an input port.
    Connect { source: PortRef, sink: PortRef },

    /// Remove the source of an input port.
    Disconnect { sink: PortRef },

    /// Set the constant of an input port.
    SetValue { port: PortRef, value: i16 },

    /// Copy samples into an instance's table.
    WriteTable {
        handle: InstanceHandle,
        offset: usize,
        data: Box<[i16]>,
    },

    /// Choose the output port the host reads, or none for silence.
    SetRoot(Option<PortRef>),

    /// Remove every instance.
    Clear,
}

/// Memory the audio thread no longer needs.
#[derive(Debug)]
pub enum Garbage {
    Entry(GraphEntry),
    Table(Box<[i16]>),
}

/// Events sent from the audio thread to the control thread.
#[derive(Debug)]
pub enum EngineEvent {
    /// Memory to be dropped off the audio thread.
    Retired(Garbage),

    /// A command failed validation on the audio side.
    Rejected(GraphError),
}
