//! Control/audio queues
//!
//! Patch edits travel from the control plane to the audio thread as
//! [`EngineCommand`]s. What the audio thread lets go of (removed instances,
//! spent table payloads) and the edits it refused travel back as
//! [`EngineEvent`]s, so nothing is freed on the audio thread.
//!
//! Both directions are rtrb SPSC rings. A group of commands can be
//! published in one commit, so the audio thread sees either none or all of
//! them at a block boundary.

use rtrb::{Consumer, Producer, RingBuffer};

use super::commands::{EngineCommand, EngineEvent};

/// Default capacity of the edit queue (control -> audio).
///
/// A whole patch load is committed at once, so this bounds the size of a
/// loadable patch in commands.
pub const DEFAULT_COMMAND_BUFFER_SIZE: usize = 4096;

/// Default capacity of the return queue (audio -> control).
///
/// Every removal sends its instance back. Overflow waits in the
/// processor's backlog until the control plane collects.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

/// Both queues before they are handed to their threads.
pub struct EngineChannels {
    edits_tx: Producer<EngineCommand>,
    edits_rx: Consumer<EngineCommand>,
    returns_tx: Producer<EngineEvent>,
    returns_rx: Consumer<EngineEvent>,
}

impl EngineChannels {
    pub fn new(command_capacity: usize, event_capacity: usize) -> Self {
        let (edits_tx, edits_rx) = RingBuffer::new(command_capacity);
        let (returns_tx, returns_rx) = RingBuffer::new(event_capacity);

        Self {
            edits_tx,
            edits_rx,
            returns_tx,
            returns_rx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_COMMAND_BUFFER_SIZE, DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Splits into the control-plane end and the audio-thread end.
    pub fn split(self) -> (ControlHandle, EngineHandle) {
        let control = ControlHandle {
            edits: self.edits_tx,
            returns: self.returns_rx,
        };
        let engine = EngineHandle {
            edits: self.edits_rx,
            returns: self.returns_tx,
        };
        (control, engine)
    }
}

/// Control-plane end: queues edits, collects what the audio thread returns.
pub struct ControlHandle {
    edits: Producer<EngineCommand>,
    returns: Consumer<EngineEvent>,
}

impl ControlHandle {
    /// Queues one edit. Gives the command back if the queue is full.
    pub fn send_command(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.edits
            .push(cmd)
            .map_err(|rtrb::PushError::Full(cmd)| cmd)
    }

    /// Publishes `commands` in one commit.
    ///
    /// Either every command is queued or none is; on a full queue the batch
    /// is given back untouched.
    pub fn send_batch(&mut self, commands: Vec<EngineCommand>) -> Result<(), Vec<EngineCommand>> {
        if commands.is_empty() {
            return Ok(());
        }
        match self.edits.write_chunk_uninit(commands.len()) {
            Ok(chunk) => {
                chunk.fill_from_iter(commands);
                Ok(())
            }
            Err(_) => Err(commands),
        }
    }

    pub fn recv_event(&mut self) -> Option<EngineEvent> {
        self.returns.pop().ok()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        std::iter::from_fn(|| self.recv_event())
    }

    /// Edits that fit before the audio thread catches up.
    pub fn command_slots_available(&self) -> usize {
        self.edits.slots()
    }
}

/// Audio-thread end. Nothing here blocks or allocates.
pub struct EngineHandle {
    edits: Consumer<EngineCommand>,
    returns: Producer<EngineEvent>,
}

impl EngineHandle {
    pub fn recv_command(&mut self) -> Option<EngineCommand> {
        self.edits.pop().ok()
    }

    /// Returns an event to the control plane, or gives it back if the queue
    /// is full.
    pub fn send_event(&mut self, event: EngineEvent) -> Result<(), EngineEvent> {
        self.returns
            .push(event)
            .map_err(|rtrb::PushError::Full(event)| event)
    }

    pub fn event_slots_available(&self) -> usize {
        self.returns.slots()
    }

    pub fn commands_pending(&self) -> usize {
        self.edits.slots()
    }
}
