//! Patch layout: instance slots and the links between their ports.
//!
//! The layout is generic over what each slot carries so the same structure
//! (and the same validation) serves both the control-thread mirror and the
//! audio-thread graph. Slots are addressed through generation-checked
//! handles, so a handle kept after its instance was removed is detected
//! instead of silently reaching a newer instance.
//!
//! Each input port has at most one source; an output may feed any number of
//! inputs and keeps a count of its consumers. Links that would close a cycle
//! are rejected, which keeps pull-based rendering free of re-entry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::PortDirection;

/// Maximum number of instances in one patch.
pub const MAX_INSTANCES: usize = 1024;

/// Generation-checked reference to an instance slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceHandle {
    index: u32,
    generation: u32,
}

impl InstanceHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the handle into a single integer.
    pub fn to_bits(self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// One port of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub handle: InstanceHandle,
    pub port: usize,
}

impl PortRef {
    pub fn new(handle: InstanceHandle, port: usize) -> Self {
        Self { handle, port }
    }
}

/// Errors from structural edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("instance {0:?} does not exist")]
    StaleHandle(InstanceHandle),
    #[error("port {port} is out of range (instance has {len} ports)")]
    PortOutOfRange { port: usize, len: usize },
    #[error("port {port} is not an {expected} port")]
    WrongDirection { port: usize, expected: &'static str },
    #[error("an instance cannot feed its own input")]
    SelfLink,
    #[error("link would create a zero-delay cycle")]
    Cycle,
    #[error("patch is full ({0} instances)")]
    CapacityExhausted(usize),
    #[error("slot {0} is already occupied")]
    SlotOccupied(usize),
}

/// Link state of one port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSlot {
    pub direction: PortDirection,
    /// Source feeding this input.
    pub source: Option<PortRef>,
    /// Number of inputs (or the root) reading this output.
    pub consumers: u32,
}

impl PortSlot {
    pub fn new(direction: PortDirection) -> Self {
        Self {
            direction,
            source: None,
            consumers: 0,
        }
    }
}

/// An occupied slot.
#[derive(Clone, Debug)]
pub struct Entry<T> {
    ports: Box<[PortSlot]>,
    mark: u64,
    pub payload: T,
}

impl<T> Entry<T> {
    pub fn new(ports: Box<[PortSlot]>, payload: T) -> Self {
        Self {
            ports,
            mark: 0,
            payload,
        }
    }

    pub fn ports(&self) -> &[PortSlot] {
        &self.ports
    }

    fn port(&self, port: usize) -> Result<&PortSlot, GraphError> {
        self.ports.get(port).ok_or(GraphError::PortOutOfRange {
            port,
            len: self.ports.len(),
        })
    }
}

#[derive(Clone, Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Instance slots and port links.
///
/// The control-side mirror is cloned to roll back a failed multi-step edit.
#[derive(Clone, Debug)]
pub struct PatchLayout<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: usize,
    len: usize,
    epoch: u64,
}

impl<T> PatchLayout<T> {
    /// Creates a layout with room for [`MAX_INSTANCES`] instances.
    pub fn new() -> Self {
        Self::with_capacity(MAX_INSTANCES)
    }

    /// Creates a layout with every slot preallocated, so occupying and
    /// vacating never allocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            capacity,
            len: 0,
            epoch: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ========================================================================
    // Slot Management
    // ========================================================================

    /// Reserves a fresh handle without occupying it.
    pub fn allocate(&mut self) -> Result<InstanceHandle, GraphError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            return Ok(InstanceHandle {
                index,
                generation: slot.generation,
            });
        }
        if self.slots.len() >= self.capacity {
            return Err(GraphError::CapacityExhausted(self.capacity));
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: None,
        });
        // Reserved but not occupied: hold it out of the free list.
        Ok(InstanceHandle {
            index,
            generation: 0,
        })
    }

    /// Places an entry at a previously allocated handle.
    ///
    /// The audio-side layout never calls [`allocate`](Self::allocate); it
    /// occupies exactly the handles minted by the control-side layout.
    pub fn occupy(&mut self, handle: InstanceHandle, entry: Entry<T>) -> Result<(), GraphError> {
        self.can_occupy(handle)?;
        let index = handle.index();
        while self.slots.len() <= index {
            let filler = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
            if (filler as usize) < index {
                self.free.push(filler);
            }
        }
        // Slot reuse on this side: take it back out of the free list.
        if let Some(position) = self.free.iter().position(|&i| i as usize == index) {
            self.free.swap_remove(position);
        }

        let slot = &mut self.slots[index];
        slot.generation = handle.generation;
        slot.entry = Some(entry);
        self.len += 1;
        Ok(())
    }

    /// Checks that `handle` can be occupied without touching the layout.
    pub fn can_occupy(&self, handle: InstanceHandle) -> Result<(), GraphError> {
        let index = handle.index();
        if index >= self.capacity {
            return Err(GraphError::CapacityExhausted(self.capacity));
        }
        if self.slots.get(index).is_some_and(|slot| slot.entry.is_some()) {
            return Err(GraphError::SlotOccupied(index));
        }
        Ok(())
    }

    /// Removes an entry. Links to and from it must already be detached.
    pub fn vacate(&mut self, handle: InstanceHandle) -> Result<Entry<T>, GraphError> {
        self.get(handle)?;
        let slot = &mut self.slots[handle.index()];
        let entry = slot.entry.take().ok_or(GraphError::StaleHandle(handle))?;
        self.free.push(handle.index);
        self.len -= 1;
        Ok(entry)
    }

    /// Removes every entry, handing each to `retire`.
    pub fn drain(&mut self, mut retire: impl FnMut(InstanceHandle, Entry<T>)) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if let Some(entry) = slot.entry.take() {
                let handle = InstanceHandle {
                    index: index as u32,
                    generation: slot.generation,
                };
                self.free.push(index as u32);
                retire(handle, entry);
            }
        }
        self.len = 0;
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, handle: InstanceHandle) -> Result<&Entry<T>, GraphError> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(GraphError::StaleHandle(handle))
    }

    pub fn get_mut(&mut self, handle: InstanceHandle) -> Result<&mut Entry<T>, GraphError> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(GraphError::StaleHandle(handle))
    }

    pub fn contains(&self, handle: InstanceHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Iterates over live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = InstanceHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|_| InstanceHandle {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Source feeding an input port.
    pub fn source(&self, sink: PortRef) -> Option<PortRef> {
        self.get(sink.handle).ok()?.ports.get(sink.port)?.source
    }

    /// Number of consumers of an output port.
    pub fn consumers(&self, output: PortRef) -> u32 {
        self.get(output.handle)
            .ok()
            .and_then(|entry| entry.ports.get(output.port))
            .map_or(0, |slot| slot.consumers)
    }

    fn check_port(
        &self,
        port: PortRef,
        direction: PortDirection,
    ) -> Result<(), GraphError> {
        let slot = self.get(port.handle)?.port(port.port)?;
        if slot.direction != direction {
            return Err(GraphError::WrongDirection {
                port: port.port,
                expected: match direction {
                    PortDirection::Input => "input",
                    PortDirection::Output => "output",
                },
            });
        }
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Links an output to an input.
    ///
    /// An input that already has a source is relinked; the previous source is
    /// returned so the caller can refresh it.
    pub fn connect(&mut self, source: PortRef, sink: PortRef) -> Result<Option<PortRef>, GraphError> {
        self.check_port(source, PortDirection::Output)?;
        self.check_port(sink, PortDirection::Input)?;
        if source.handle == sink.handle {
            return Err(GraphError::SelfLink);
        }
        if self.source(sink) == Some(source) {
            return Ok(None);
        }
        if self.depends_on(source.handle, sink.handle) {
            return Err(GraphError::Cycle);
        }

        let previous = self.disconnect(sink)?;
        self.port_mut(sink)?.source = Some(source);
        self.port_mut(source)?.consumers += 1;
        Ok(previous)
    }

    /// Removes the source of an input and returns it.
    pub fn disconnect(&mut self, sink: PortRef) -> Result<Option<PortRef>, GraphError> {
        self.check_port(sink, PortDirection::Input)?;
        let previous = self.port_mut(sink)?.source.take();
        if let Some(source) = previous {
            if let Ok(entry) = self.get_mut(source.handle) {
                if let Some(slot) = entry.ports.get_mut(source.port) {
                    slot.consumers = slot.consumers.saturating_sub(1);
                }
            }
        }
        Ok(previous)
    }

    /// Adds a consumer that is not an input port (the patch root).
    pub fn attach(&mut self, output: PortRef) -> Result<(), GraphError> {
        self.check_port(output, PortDirection::Output)?;
        self.port_mut(output)?.consumers += 1;
        Ok(())
    }

    /// Removes a consumer added with [`attach`](Self::attach).
    pub fn detach(&mut self, output: PortRef) -> Result<(), GraphError> {
        self.check_port(output, PortDirection::Output)?;
        let slot = self.port_mut(output)?;
        slot.consumers = slot.consumers.saturating_sub(1);
        Ok(())
    }

    /// Drops every link to and from an instance.
    ///
    /// `released` is called for each upstream output that lost a consumer.
    pub fn detach_all(
        &mut self,
        handle: InstanceHandle,
        mut released: impl FnMut(PortRef),
    ) -> Result<(), GraphError> {
        let port_count = self.get(handle)?.ports.len();
        for port in 0..port_count {
            let sink = PortRef::new(handle, port);
            if self.port_mut(sink)?.direction == PortDirection::Input {
                if let Some(source) = self.disconnect(sink)? {
                    released(source);
                }
            }
        }

        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                for port in entry.ports.iter_mut() {
                    if port.source.is_some_and(|s| s.handle == handle) {
                        port.source = None;
                    }
                }
            }
        }
        for port in self.get_mut(handle)?.ports.iter_mut() {
            port.consumers = 0;
        }
        Ok(())
    }

    fn port_mut(&mut self, port: PortRef) -> Result<&mut PortSlot, GraphError> {
        let entry = self.get_mut(port.handle)?;
        let len = entry.ports.len();
        entry.ports.get_mut(port.port).ok_or(GraphError::PortOutOfRange {
            port: port.port,
            len,
        })
    }

    // ========================================================================
    // Cycle Detection
    // ========================================================================

    /// Returns true if `from` reads (transitively) from `target`.
    fn depends_on(&mut self, from: InstanceHandle, target: InstanceHandle) -> bool {
        self.epoch += 1;
        let epoch = self.epoch;
        self.search_upstream(from.index(), target.index(), epoch)
    }

    fn search_upstream(&mut self, index: usize, target: usize, epoch: u64) -> bool {
        if index == target {
            return true;
        }
        let port_count = match self.slots[index].entry.as_mut() {
            Some(entry) if entry.mark != epoch => {
                entry.mark = epoch;
                entry.ports.len()
            }
            _ => return false,
        };
        for port in 0..port_count {
            let source = self.slots[index]
                .entry
                .as_ref()
                .and_then(|entry| entry.ports[port].source);
            if let Some(source) = source {
                if self.search_upstream(source.handle.index(), target, epoch) {
                    return true;
                }
            }
        }
        false
    }
}

impl<T> Default for PatchLayout<T> {
    fn default() -> Self {
        Self::new()
    }
}
