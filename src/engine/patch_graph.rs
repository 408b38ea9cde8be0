//! Patch graph for holding and rendering module instances.
//!
//! Rendering is pull-based and memoized. Asking an instance for a block first
//! pulls every instance feeding it, then runs its own render loop, and stamps
//! it with the pass id so an instance shared by several consumers runs once
//! per pass. Instances whose outputs nobody reads are skipped unless their
//! kind has side effects; those are rendered every pass after the root.

use crate::dsp::{RenderContext, Signal, UpstreamSignals, MAX_BLOCK_SIZE};

use super::commands::{EngineCommand, Garbage, GraphEntry};
use super::instance::Instance;
use super::layout::{Entry, GraphError, InstanceHandle, PatchLayout, PortRef, MAX_INSTANCES};
use crate::dsp::PortDirection;

/// Upstream lookup for one instance during its render.
struct Upstream<'g> {
    layout: &'g PatchLayout<Option<Box<Instance>>>,
    handle: InstanceHandle,
}

impl UpstreamSignals for Upstream<'_> {
    fn upstream(&self, port: usize) -> Option<&Signal> {
        let source = self.layout.source(PortRef::new(self.handle, port))?;
        self.layout
            .get(source.handle)
            .ok()?
            .payload
            .as_ref()?
            .signal(source.port)
    }
}

/// Module instances, their links and the render evaluator.
pub struct PatchGraph {
    layout: PatchLayout<Option<Box<Instance>>>,
    root: Option<PortRef>,
    /// Instances rendered every pass regardless of consumers.
    side_effects: Vec<InstanceHandle>,
    pass_id: u64,
    silence: Box<[i16]>,
}

impl PatchGraph {
    /// Creates a graph with room for [`MAX_INSTANCES`] instances.
    pub fn new() -> Self {
        Self::with_capacity(MAX_INSTANCES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            layout: PatchLayout::with_capacity(capacity),
            root: None,
            side_effects: Vec::with_capacity(capacity),
            pass_id: 0,
            silence: vec![0; MAX_BLOCK_SIZE].into_boxed_slice(),
        }
    }

    /// Returns the number of instances in the graph.
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn contains(&self, handle: InstanceHandle) -> bool {
        self.layout.contains(handle)
    }

    pub fn root(&self) -> Option<PortRef> {
        self.root
    }

    /// Id of the most recent pass started by [`process_block`](Self::process_block).
    pub fn pass_id(&self) -> u64 {
        self.pass_id
    }

    pub fn layout(&self) -> &PatchLayout<Option<Box<Instance>>> {
        &self.layout
    }

    pub fn instance(&self, handle: InstanceHandle) -> Option<&Instance> {
        self.layout.get(handle).ok()?.payload.as_deref()
    }

    /// Output signal of a port, as left by the last render.
    pub fn output(&self, port: PortRef) -> Option<&Signal> {
        self.instance(port.handle)?
            .signal(port.port)
            .filter(|signal| signal.direction() == PortDirection::Output)
    }

    // ========================================================================
    // Graph Modification Methods
    // ========================================================================

    /// Adds an instance, minting a handle for it.
    ///
    /// For single-threaded use; the threaded engine mints handles on the
    /// control plane and delivers instances with [`insert`](Self::insert).
    pub fn add(&mut self, instance: Instance) -> Result<InstanceHandle, GraphError> {
        let handle = self.layout.allocate()?;
        let entry = Entry::new(instance.port_slots(), Some(Box::new(instance)));
        self.insert(handle, entry).map_err(|(err, _)| err)?;
        Ok(handle)
    }

    /// Places an entry at `handle`. On failure the entry is handed back.
    pub fn insert(
        &mut self,
        handle: InstanceHandle,
        entry: GraphEntry,
    ) -> Result<(), (GraphError, GraphEntry)> {
        if let Err(err) = self.layout.can_occupy(handle) {
            return Err((err, entry));
        }
        let side_effects = entry
            .payload
            .as_ref()
            .is_some_and(|instance| instance.has_side_effects());
        if side_effects && self.side_effects.len() >= self.side_effects.capacity() {
            return Err((GraphError::CapacityExhausted(self.layout.capacity()), entry));
        }
        self.layout
            .occupy(handle, entry)
            .map_err(|err| (err, Entry::new(Box::default(), None)))?;
        if side_effects {
            self.side_effects.push(handle);
        }
        Ok(())
    }

    /// Detaches and removes an instance, returning it.
    pub fn remove(&mut self, handle: InstanceHandle) -> Result<GraphEntry, GraphError> {
        self.layout.detach_all(handle, |_| {})?;
        if self.root.is_some_and(|root| root.handle == handle) {
            self.root = None;
        }
        self.side_effects.retain(|&h| h != handle);
        self.layout.vacate(handle)
    }

    /// Links an output port to an input port.
    pub fn connect(&mut self, source: PortRef, sink: PortRef) -> Result<(), GraphError> {
        self.layout.connect(source, sink).map(|_| ())
    }

    /// Removes the source of an input port.
    pub fn disconnect(&mut self, sink: PortRef) -> Result<(), GraphError> {
        self.layout.disconnect(sink).map(|_| ())
    }

    /// Sets the constant of an input port.
    pub fn set_value(&mut self, port: PortRef, value: i16) -> Result<(), GraphError> {
        let len = self.layout.get(port.handle)?.ports().len();
        let signal = self
            .layout
            .get_mut(port.handle)?
            .payload
            .as_mut()
            .and_then(|instance| instance.signal_mut(port.port))
            .ok_or(GraphError::PortOutOfRange {
                port: port.port,
                len,
            })?;
        if signal.direction() != PortDirection::Input {
            return Err(GraphError::WrongDirection {
                port: port.port,
                expected: "input",
            });
        }
        signal.set_value(value);
        Ok(())
    }

    /// Copies samples into an instance's table. Returns the count written.
    pub fn write_table(
        &mut self,
        handle: InstanceHandle,
        offset: usize,
        data: &[i16],
    ) -> Result<usize, GraphError> {
        let instance = self
            .layout
            .get_mut(handle)?
            .payload
            .as_mut()
            .ok_or(GraphError::StaleHandle(handle))?;
        Ok(instance.write_table(offset, data))
    }

    /// Chooses the output port returned by [`process_block`](Self::process_block).
    ///
    /// The root counts as a consumer of that port.
    pub fn set_root(&mut self, root: Option<PortRef>) -> Result<(), GraphError> {
        if let Some(new_root) = root {
            self.layout.attach(new_root)?;
        }
        if let Some(old_root) = self.root.take() {
            // The old root may have been removed along with its instance.
            let _ = self.layout.detach(old_root);
        }
        self.root = root;
        Ok(())
    }

    /// Removes every instance, handing each entry to `retire`.
    pub fn clear(&mut self, mut retire: impl FnMut(GraphEntry)) {
        self.root = None;
        self.side_effects.clear();
        self.layout.drain(|_, entry| retire(entry));
    }

    // ========================================================================
    // Command Handling
    // ========================================================================

    /// Applies a command from the control plane.
    ///
    /// Memory released by the command is passed to `retire`.
    pub fn handle_command(
        &mut self,
        command: EngineCommand,
        mut retire: impl FnMut(Garbage),
    ) -> Result<(), GraphError> {
        match command {
            EngineCommand::Insert { handle, entry } => {
                self.insert(handle, entry).map_err(|(err, entry)| {
                    retire(Garbage::Entry(entry));
                    err
                })
            }
            EngineCommand::Remove { handle } => {
                let entry = self.remove(handle)?;
                retire(Garbage::Entry(entry));
                Ok(())
            }
            EngineCommand::Connect { source, sink } => self.connect(source, sink),
            EngineCommand::Disconnect { sink } => self.disconnect(sink),
            EngineCommand::SetValue { port, value } => self.set_value(port, value),
            EngineCommand::WriteTable {
                handle,
                offset,
                data,
            } => {
                let result = self.write_table(handle, offset, &data).map(|_| ());
                retire(Garbage::Table(data));
                result
            }
            EngineCommand::SetRoot(root) => self.set_root(root),
            EngineCommand::Clear => {
                self.clear(|entry| retire(Garbage::Entry(entry)));
                Ok(())
            }
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Renders one instance for `pass_id`, pulling its sources first.
    ///
    /// Does nothing if the instance already ran (or was skipped) in this
    /// pass. `num_samples` is clamped to [`MAX_BLOCK_SIZE`].
    pub fn render(&mut self, handle: InstanceHandle, num_samples: usize, pass_id: u64) {
        let num_samples = num_samples.min(MAX_BLOCK_SIZE);

        let Ok(entry) = self.layout.get_mut(handle) else {
            return;
        };
        let consumed = entry
            .ports()
            .iter()
            .any(|port| port.direction == PortDirection::Output && port.consumers > 0);
        let port_count = entry.ports().len();
        // A missing payload means the instance is mid-render further up the stack.
        let Some(instance) = entry.payload.as_mut() else {
            return;
        };
        if instance.last_pass() == Some(pass_id) {
            return;
        }
        if !consumed && !instance.has_side_effects() {
            instance.mark_pass(pass_id);
            return;
        }

        for port in 0..port_count {
            if let Some(source) = self.layout.source(PortRef::new(handle, port)) {
                self.render(source.handle, num_samples, pass_id);
            }
        }

        let Some(mut instance) = self
            .layout
            .get_mut(handle)
            .ok()
            .and_then(|entry| entry.payload.take())
        else {
            return;
        };

        if let Ok(entry) = self.layout.get(handle) {
            for (port, slot) in entry.ports().iter().enumerate() {
                if let Some(signal) = instance.signal_mut(port) {
                    signal.set_attached(
                        slot.direction == PortDirection::Output && slot.consumers > 0,
                    );
                }
            }
        }

        {
            let upstream = Upstream {
                layout: &self.layout,
                handle,
            };
            let (module, signals) = instance.render_parts();
            let mut ctx = RenderContext::new(num_samples, pass_id, signals, &upstream);
            module.render(&mut ctx);
        }
        instance.mark_pass(pass_id);

        if let Ok(entry) = self.layout.get_mut(handle) {
            entry.payload = Some(instance);
        }
    }

    /// Starts a new pass and renders the root and every side-effect instance.
    ///
    /// Returns exactly `num_samples` samples (clamped to [`MAX_BLOCK_SIZE`])
    /// of the root output, or silence when there is no root.
    pub fn process_block(&mut self, num_samples: usize) -> &[i16] {
        let num_samples = num_samples.min(MAX_BLOCK_SIZE);
        self.pass_id += 1;
        let pass_id = self.pass_id;

        if let Some(root) = self.root {
            self.render(root.handle, num_samples, pass_id);
        }
        for i in 0..self.side_effects.len() {
            let handle = self.side_effects[i];
            self.render(handle, num_samples, pass_id);
        }

        let Some(root) = self.root else {
            return &self.silence[..num_samples];
        };
        match self
            .layout
            .get_mut(root.handle)
            .ok()
            .and_then(|entry| entry.payload.as_mut())
            .and_then(|instance| instance.signal_mut(root.port))
        {
            Some(signal) => signal.block(num_samples),
            None => &self.silence[..num_samples],
        }
    }
}

impl Default for PatchGraph {
    fn default() -> Self {
        Self::new()
    }
}
