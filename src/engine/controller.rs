//! Patch Controller
//!
//! Control-plane side of the engine. The controller keeps a mirror of the
//! patch layout, validates every edit against it and only then queues the
//! matching command for the audio thread. Failures are reported to the
//! caller right away and never reach the audio side.
//!
//! Multi-step edits can run inside [`PatchController::transaction`]: their
//! commands are held back and published in one commit, and a failure puts
//! the mirror back the way it was.
//!
//! The mirror also remembers what was set on each instance (config word,
//! input constants, table writes) so a patch can be saved without asking the
//! audio thread.

use log::{debug, warn};
use thiserror::Error;

use crate::dsp::{
    DspModule, InputPort, ModuleRegistry, OutputPort, PortDefinition, PortDirection,
    TriggerEncoder,
};

use super::audio_processor::AudioProcessor;
use super::channels::{ControlHandle, EngineChannels};
use super::commands::{EngineCommand, EngineEvent};
use super::instance::Instance;
use super::layout::{Entry, GraphError, InstanceHandle, PatchLayout, PortRef};
use super::patch_graph::PatchGraph;

/// Errors from control-plane edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown module id {0}")]
    UnknownModule(u32),
    #[error("module {0} could not be created")]
    CreateFailed(u32),
    #[error("command queue is full")]
    QueueFull,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// One table write, kept so it can be saved and replayed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableWrite {
    pub offset: usize,
    pub data: Vec<i16>,
}

/// Control-side record of an instance.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    module_id: u32,
    config: u32,
    ports: Vec<PortDefinition>,
    values: Vec<i16>,
    triggers: Vec<TriggerEncoder>,
    tables: Vec<TableWrite>,
}

impl NodeRecord {
    fn new(module_id: u32, config: u32, module: &dyn DspModule) -> Self {
        let ports = module.ports().to_vec();
        let values = ports.iter().map(|port| port.default_value).collect();
        let triggers = vec![TriggerEncoder::new(); ports.len()];
        Self {
            module_id,
            config,
            ports,
            values,
            triggers,
            tables: Vec::new(),
        }
    }

    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    pub fn config(&self) -> u32 {
        self.config
    }

    pub fn ports(&self) -> &[PortDefinition] {
        &self.ports
    }

    /// Last constant set on a port (its default until changed).
    pub fn value(&self, port: usize) -> Option<i16> {
        self.values.get(port).copied()
    }

    pub fn tables(&self) -> &[TableWrite] {
        &self.tables
    }
}

/// Control-plane facade over the audio-side graph.
pub struct PatchController<'r> {
    registry: &'r ModuleRegistry,
    layout: PatchLayout<NodeRecord>,
    handle: ControlHandle,
    root: Option<PortRef>,
    /// Commands held back by an open transaction.
    batch: Option<Vec<EngineCommand>>,
}

impl<'r> PatchController<'r> {
    pub fn new(registry: &'r ModuleRegistry, handle: ControlHandle) -> Self {
        Self {
            registry,
            layout: PatchLayout::new(),
            handle,
            root: None,
            batch: None,
        }
    }

    /// Creates a controller together with the processor it drives.
    pub fn with_processor(registry: &'r ModuleRegistry) -> (Self, AudioProcessor) {
        let (control, engine) = EngineChannels::with_defaults().split();
        let processor = AudioProcessor::new(PatchGraph::new(), engine);
        (Self::new(registry, control), processor)
    }

    pub fn registry(&self) -> &'r ModuleRegistry {
        self.registry
    }

    pub fn root(&self) -> Option<PortRef> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn node(&self, handle: InstanceHandle) -> Option<&NodeRecord> {
        self.layout.get(handle).ok().map(|entry| &entry.payload)
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = InstanceHandle> + '_ {
        self.layout.handles()
    }

    /// Source feeding an input port.
    pub fn source(&self, sink: PortRef) -> Option<PortRef> {
        self.layout.source(sink)
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Creates an instance of `module_id` and adds it to the patch.
    ///
    /// The instance, its port storage and its table are all allocated here,
    /// off the audio thread.
    pub fn create(&mut self, module_id: u32, config: u32) -> Result<InstanceHandle, ControlError> {
        let descriptor = self
            .registry
            .get(module_id)
            .ok_or(ControlError::UnknownModule(module_id))?;
        self.reserve()?;

        let module = descriptor
            .create(config)
            .ok_or(ControlError::CreateFailed(module_id))?;
        let record = NodeRecord::new(module_id, config, module.as_ref());
        let instance = Instance::new(module).ok_or(ControlError::CreateFailed(module_id))?;
        let ports = instance.port_slots();

        let handle = self.layout.allocate()?;
        self.layout.occupy(handle, Entry::new(ports.clone(), record))?;
        self.send(EngineCommand::Insert {
            handle,
            entry: Entry::new(ports, Some(Box::new(instance))),
        })?;

        debug!(
            "created {} (config {config}) as {handle:?}",
            descriptor.info.name
        );
        Ok(handle)
    }

    /// Removes an instance and every link to and from it.
    pub fn destroy(&mut self, handle: InstanceHandle) -> Result<(), ControlError> {
        self.layout.get(handle)?;
        self.reserve()?;

        self.layout.detach_all(handle, |_| {})?;
        if self.root.is_some_and(|root| root.handle == handle) {
            self.root = None;
        }
        self.layout.vacate(handle)?;
        self.send(EngineCommand::Remove { handle })?;

        debug!("destroyed {handle:?}");
        Ok(())
    }

    /// Links an output to an input, replacing the input's previous source.
    pub fn connect(
        &mut self,
        source: InstanceHandle,
        output: OutputPort,
        sink: InstanceHandle,
        input: InputPort,
    ) -> Result<(), ControlError> {
        self.reserve()?;
        let source = PortRef::new(source, output.index());
        let sink = PortRef::new(sink, input.index());
        if let Err(err) = self.layout.connect(source, sink) {
            warn!("rejected link {source:?} -> {sink:?}: {err}");
            return Err(err.into());
        }
        self.send(EngineCommand::Connect { source, sink })?;

        debug!("linked {source:?} -> {sink:?}");
        Ok(())
    }

    /// Removes the source of an input. The input reads its constant again.
    pub fn disconnect(&mut self, sink: InstanceHandle, input: InputPort) -> Result<(), ControlError> {
        self.reserve()?;
        let sink = PortRef::new(sink, input.index());
        self.layout.disconnect(sink)?;
        self.send(EngineCommand::Disconnect { sink })
    }

    /// Sets the constant an input reads while it has no source.
    pub fn set_value(
        &mut self,
        handle: InstanceHandle,
        input: InputPort,
        value: i16,
    ) -> Result<(), ControlError> {
        self.reserve()?;
        let port = input.index();
        let record = self.input_record(handle, port)?;
        record.values[port] = value;
        self.send(EngineCommand::SetValue {
            port: PortRef::new(handle, port),
            value,
        })
    }

    /// Emits a trigger start on an input constant.
    ///
    /// The value always changes, so two starts in a row are two edges.
    pub fn trigger_start(
        &mut self,
        handle: InstanceHandle,
        input: InputPort,
        velocity: i16,
    ) -> Result<(), ControlError> {
        let record = self.input_record(handle, input.index())?;
        let value = record.triggers[input.index()].start(velocity);
        self.set_value(handle, input, value)
    }

    /// Emits a trigger stop on an input constant.
    pub fn trigger_stop(&mut self, handle: InstanceHandle, input: InputPort) -> Result<(), ControlError> {
        let record = self.input_record(handle, input.index())?;
        let value = record.triggers[input.index()].stop();
        self.set_value(handle, input, value)
    }

    /// Copies samples into an instance's table at `offset`.
    ///
    /// Writes past the end of the table are truncated on the audio side.
    pub fn write_table(
        &mut self,
        handle: InstanceHandle,
        offset: usize,
        data: &[i16],
    ) -> Result<(), ControlError> {
        self.layout.get(handle)?;
        self.reserve()?;
        self.layout.get_mut(handle)?.payload.tables.push(TableWrite {
            offset,
            data: data.to_vec(),
        });
        self.send(EngineCommand::WriteTable {
            handle,
            offset,
            data: data.into(),
        })
    }

    /// Chooses the output the host plays, or none for silence.
    pub fn set_root(&mut self, root: Option<PortRef>) -> Result<(), ControlError> {
        self.reserve()?;
        if let Some(new_root) = root {
            self.layout.attach(new_root)?;
        }
        if let Some(old_root) = self.root.take() {
            let _ = self.layout.detach(old_root);
        }
        self.root = root;
        self.send(EngineCommand::SetRoot(root))?;

        debug!("root set to {root:?}");
        Ok(())
    }

    /// Removes every instance.
    pub fn clear(&mut self) -> Result<(), ControlError> {
        self.reserve()?;
        self.layout.drain(|_, _| {});
        self.root = None;
        self.send(EngineCommand::Clear)?;

        debug!("patch cleared");
        Ok(())
    }

    /// Runs `edit` as one unit.
    ///
    /// Commands are held back until `edit` returns `Ok` and then published
    /// in a single commit, so the audio thread applies all of them at one
    /// block boundary or none. On error (or if the commit does not fit the
    /// queue) the mirror and root are restored and the held commands are
    /// dropped here, off the audio thread. Nested calls join the outer one.
    pub fn transaction<T, E>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<ControlError>,
    {
        if self.batch.is_some() {
            return edit(self);
        }

        let layout = self.layout.clone();
        let root = self.root;
        self.batch = Some(Vec::new());
        let result = edit(self);
        let batch = self.batch.take().unwrap_or_default();

        let result = match result {
            Ok(value) => {
                let count = batch.len();
                match self.handle.send_batch(batch) {
                    Ok(()) => {
                        debug!("committed {count} commands");
                        return Ok(value);
                    }
                    Err(_) => Err(ControlError::QueueFull.into()),
                }
            }
            Err(err) => Err(err),
        };

        self.layout = layout;
        self.root = root;
        warn!("edit rolled back");
        result
    }

    /// Drops everything the audio thread has released.
    ///
    /// Returns the number of events handled. Call this regularly; the event
    /// queue is bounded.
    pub fn collect_garbage(&mut self) -> usize {
        let mut count = 0;
        for event in self.handle.drain_events() {
            if let EngineEvent::Rejected(err) = &event {
                warn!("audio thread rejected a command: {err}");
            }
            count += 1;
        }
        count
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Checks there is room for one more command.
    ///
    /// Returned events are collected first so the audio thread always has
    /// somewhere to put what an edit retires.
    fn reserve(&mut self) -> Result<(), ControlError> {
        self.collect_garbage();
        let held = self.batch.as_ref().map_or(0, Vec::len);
        if self.handle.command_slots_available() <= held {
            return Err(ControlError::QueueFull);
        }
        Ok(())
    }

    fn send(&mut self, command: EngineCommand) -> Result<(), ControlError> {
        if let Some(batch) = &mut self.batch {
            batch.push(command);
            return Ok(());
        }
        self.handle
            .send_command(command)
            .map_err(|_| ControlError::QueueFull)
    }

    fn input_record(&mut self, handle: InstanceHandle, port: usize) -> Result<&mut NodeRecord, ControlError> {
        let record = &mut self.layout.get_mut(handle)?.payload;
        let definition = record.ports.get(port).ok_or(GraphError::PortOutOfRange {
            port,
            len: record.ports.len(),
        })?;
        if definition.direction != PortDirection::Input {
            return Err(GraphError::WrongDirection {
                port,
                expected: "input",
            }
            .into());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{ModuleKind, SCT_A440};
    use crate::engine::channels::EngineChannels;
    use crate::modules::{standard_registry, AdsrEnvelope, Mixer, Noise, Oscillator, RangeShifter};

    fn peak(block: &[i16]) -> i32 {
        block.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
    }

    #[test]
    fn test_unknown_module_rejected() {
        let (mut controller, _processor) = PatchController::with_processor(standard_registry());
        assert_eq!(
            controller.create(31337, 0),
            Err(ControlError::UnknownModule(31337))
        );
        assert!(controller.is_empty());
    }

    #[test]
    fn test_invalid_edits_are_rejected_before_queueing() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let osc = controller.create(Oscillator::INFO.id, 0).unwrap();

        assert!(matches!(
            controller.connect(osc, Oscillator::OUT, osc, Oscillator::FM),
            Err(ControlError::Graph(GraphError::SelfLink))
        ));
        assert!(matches!(
            controller.set_value(osc, InputPort(Oscillator::OUT.index()), 1),
            Err(ControlError::Graph(GraphError::WrongDirection { .. }))
        ));

        processor.process_commands();
        assert_eq!(processor.graph().len(), 1);
        assert_eq!(controller.collect_garbage(), 0);
    }

    #[test]
    fn test_stale_handle_after_destroy() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let noise = controller.create(Noise::INFO.id, 0).unwrap();
        controller.destroy(noise).unwrap();

        assert!(matches!(
            controller.destroy(noise),
            Err(ControlError::Graph(GraphError::StaleHandle(_)))
        ));
        let replacement = controller.create(Noise::INFO.id, 0).unwrap();
        assert_eq!(replacement.index(), noise.index());
        assert_ne!(replacement, noise);

        processor.process_commands();
        assert_eq!(processor.graph().len(), 1);
        assert!(processor.graph().contains(replacement));
        assert_eq!(controller.collect_garbage(), 1);
    }

    #[test]
    fn test_queue_full_is_reported() {
        let registry = standard_registry();
        let (control, _engine) = EngineChannels::new(2, 2).split();
        let mut controller = PatchController::new(registry, control);

        let noise = controller.create(Noise::INFO.id, 0).unwrap();
        controller.set_root(Some(PortRef::new(noise, 0))).unwrap();
        assert_eq!(
            controller.create(Noise::INFO.id, 0),
            Err(ControlError::QueueFull)
        );
        assert_eq!(controller.len(), 1);
    }

    #[test]
    fn test_shared_source_renders_once() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let noise = controller.create(Noise::INFO.id, 0).unwrap();
        let low = controller.create(RangeShifter::INFO.id, 0).unwrap();
        let high = controller.create(RangeShifter::INFO.id, 0).unwrap();
        let mixer = controller.create(Mixer::INFO.id, 2).unwrap();

        controller.connect(noise, Noise::OUT, low, RangeShifter::INPUT).unwrap();
        controller.connect(noise, Noise::OUT, high, RangeShifter::INPUT).unwrap();
        controller.connect(low, RangeShifter::OUT, mixer, Mixer::input(0)).unwrap();
        controller.connect(high, RangeShifter::OUT, mixer, Mixer::input(1)).unwrap();
        controller
            .set_root(Some(PortRef::new(mixer, Mixer::OUT.index())))
            .unwrap();

        processor.render_block(128);
        let graph = processor.graph();
        assert_eq!(graph.instance(noise).unwrap().render_count(), 1);

        let low_out = graph.output(PortRef::new(low, 0)).unwrap().samples();
        let high_out = graph.output(PortRef::new(high, 0)).unwrap().samples();
        assert_eq!(&low_out[..128], &high_out[..128]);

        processor.render_block(128);
        assert_eq!(processor.graph().instance(noise).unwrap().render_count(), 2);
    }

    #[test]
    fn test_unconsumed_instance_keeps_state() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let osc = controller.create(Oscillator::INFO.id, 0).unwrap();

        processor.render_block(64);
        processor.render_block(64);
        let instance = processor.graph().instance(osc).unwrap();
        assert_eq!(instance.render_count(), 0);
        assert!(instance.signal(0).unwrap().samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_oscillator_into_envelope() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let osc = controller.create(Oscillator::INFO.id, 0).unwrap();
        let env = controller.create(AdsrEnvelope::INFO.id, 0).unwrap();
        controller.set_value(osc, Oscillator::PITCH, SCT_A440).unwrap();
        controller.connect(osc, Oscillator::OUT, env, AdsrEnvelope::INPUT).unwrap();
        controller
            .set_root(Some(PortRef::new(env, AdsrEnvelope::OUT.index())))
            .unwrap();

        // Idle envelope is silent.
        assert_eq!(peak(processor.render_block(256)), 0);

        controller.trigger_start(env, AdsrEnvelope::TRIGGER, 32767).unwrap();
        // Attack is 100 ms, decay 250 ms: 4800 and 12000 samples.
        let attack: Vec<i32> = (0..18).map(|_| peak(processor.render_block(256))).collect();
        for pair in attack.windows(2) {
            assert!(pair[1] > pair[0], "attack not rising: {attack:?}");
        }

        for _ in 0..60 {
            processor.render_block(256);
        }
        let sustain: Vec<i32> = (0..20).map(|_| peak(processor.render_block(256))).collect();
        for pair in sustain.windows(2) {
            assert!(pair[1] <= pair[0] + 16, "sustain rising: {sustain:?}");
        }
        assert!(sustain[0] > 14000 && sustain[0] < 18000);

        controller.trigger_stop(env, AdsrEnvelope::TRIGGER).unwrap();
        // Release is 50 ms: 2400 samples, under ten blocks.
        let release: Vec<i32> = (0..12).map(|_| peak(processor.render_block(256))).collect();
        assert!(release[0] < sustain[0]);
        assert_eq!(release[10], 0);
        assert_eq!(release[11], 0);
    }

    #[test]
    fn test_clear_retires_everything() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let noise = controller.create(Noise::INFO.id, 0).unwrap();
        controller.create(Noise::INFO.id, 0).unwrap();
        controller.set_root(Some(PortRef::new(noise, 0))).unwrap();
        controller.clear().unwrap();

        assert!(controller.is_empty());
        assert_eq!(controller.root(), None);
        assert_eq!(processor.render_block(32), &[0; 32][..]);
        assert_eq!(controller.collect_garbage(), 2);
    }

    #[test]
    fn test_records_track_values_and_tables() {
        let (mut controller, _processor) = PatchController::with_processor(standard_registry());
        let env = controller.create(AdsrEnvelope::INFO.id, 0).unwrap();
        controller.set_value(env, AdsrEnvelope::ATTACK, 5).unwrap();
        controller.trigger_start(env, AdsrEnvelope::TRIGGER, 100).unwrap();
        controller.trigger_start(env, AdsrEnvelope::TRIGGER, 100).unwrap();
        controller.write_table(env, 0, &[1, 2]).unwrap();

        let record = controller.node(env).unwrap();
        assert_eq!(record.module_id(), AdsrEnvelope::INFO.id);
        assert_eq!(record.value(AdsrEnvelope::ATTACK.index()), Some(5));
        assert_ne!(record.value(AdsrEnvelope::TRIGGER.index()), Some(100));
        assert_eq!(record.tables().len(), 1);
    }

    #[test]
    fn test_failed_transaction_leaves_patch_running() {
        let (mut controller, mut processor) = PatchController::with_processor(standard_registry());
        let noise = controller.create(Noise::INFO.id, 0).unwrap();
        controller.set_root(Some(PortRef::new(noise, 0))).unwrap();
        processor.process_commands();

        let result = controller.transaction(|c| {
            c.clear()?;
            c.create(Noise::INFO.id, 0)?;
            c.create(31337, 0)?;
            Ok::<_, ControlError>(())
        });
        assert_eq!(result, Err(ControlError::UnknownModule(31337)));

        assert_eq!(controller.len(), 1);
        assert!(controller.node(noise).is_some());
        assert_eq!(controller.root(), Some(PortRef::new(noise, 0)));
        assert!(peak(processor.render_block(64)) > 0);
        assert_eq!(processor.graph().len(), 1);
        assert_eq!(controller.collect_garbage(), 0);
    }

    #[test]
    fn test_transaction_commits_in_one_piece() {
        let registry = standard_registry();
        let (control, engine) = EngineChannels::new(4, 4).split();
        let mut processor = AudioProcessor::new(PatchGraph::new(), engine);
        let mut controller = PatchController::new(registry, control);

        let noise = controller
            .transaction(|c| {
                let noise = c.create(Noise::INFO.id, 0)?;
                c.set_root(Some(PortRef::new(noise, 0)))?;
                Ok::<_, ControlError>(noise)
            })
            .unwrap();

        processor.process_commands();
        assert!(processor.graph().contains(noise));
        assert_eq!(processor.graph().root(), Some(PortRef::new(noise, 0)));
    }

    #[test]
    fn test_transaction_larger_than_queue_rolls_back() {
        let registry = standard_registry();
        let (control, engine) = EngineChannels::new(2, 2).split();
        let mut processor = AudioProcessor::new(PatchGraph::new(), engine);
        let mut controller = PatchController::new(registry, control);

        let result = controller.transaction(|c| {
            for _ in 0..3 {
                c.create(Noise::INFO.id, 0)?;
            }
            Ok::<_, ControlError>(())
        });
        assert_eq!(result, Err(ControlError::QueueFull));
        assert!(controller.is_empty());

        processor.process_commands();
        assert!(processor.graph().is_empty());
        // The queue is untouched, so plain edits still go through.
        controller.create(Noise::INFO.id, 0).unwrap();
        controller.create(Noise::INFO.id, 0).unwrap();
    }

    #[test]
    fn test_reserve_collects_returned_events() {
        let registry = standard_registry();
        let (control, engine) = EngineChannels::new(8, 1).split();
        let mut processor = AudioProcessor::new(PatchGraph::new(), engine);
        let mut controller = PatchController::new(registry, control);

        let first = controller.create(Noise::INFO.id, 0).unwrap();
        let second = controller.create(Noise::INFO.id, 0).unwrap();
        controller.destroy(first).unwrap();
        controller.destroy(second).unwrap();
        processor.process_commands();
        assert_eq!(processor.backlog_len(), 1);

        // Creating drains the queue, which lets the backlog through.
        controller.create(Noise::INFO.id, 0).unwrap();
        processor.process_commands();
        assert_eq!(processor.backlog_len(), 0);
        assert_eq!(controller.collect_garbage(), 1);
        assert_eq!(processor.graph().len(), 1);
    }
}
