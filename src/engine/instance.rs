//! A module instance as the patch graph holds it.

use std::fmt;

use crate::dsp::{DspModule, PortDirection, Signal};

use super::layout::PortSlot;

/// A module together with its port storage and render bookkeeping.
pub struct Instance {
    module: Box<dyn DspModule>,
    signals: Box<[Signal]>,
    last_pass: Option<u64>,
    render_count: u64,
}

impl Instance {
    /// Wraps a module, allocating storage for every port.
    ///
    /// Inputs start at their declared defaults. Returns `None` if an output
    /// buffer cannot be allocated.
    pub fn new(module: Box<dyn DspModule>) -> Option<Self> {
        let mut signals = Vec::new();
        signals.try_reserve_exact(module.ports().len()).ok()?;
        for port in module.ports() {
            signals.push(match port.direction {
                PortDirection::Input => Signal::input(port.default_value),
                PortDirection::Output => Signal::output()?,
            });
        }

        Some(Self {
            module,
            signals: signals.into_boxed_slice(),
            last_pass: None,
            render_count: 0,
        })
    }

    /// Builds the link table for this instance's ports.
    pub fn port_slots(&self) -> Box<[PortSlot]> {
        self.signals
            .iter()
            .map(|signal| PortSlot::new(signal.direction()))
            .collect()
    }

    pub fn module(&self) -> &dyn DspModule {
        self.module.as_ref()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, port: usize) -> Option<&Signal> {
        self.signals.get(port)
    }

    pub fn signal_mut(&mut self, port: usize) -> Option<&mut Signal> {
        self.signals.get_mut(port)
    }

    /// Number of times this instance has run its render loop.
    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Pass id of the most recent render (or skip), `None` before the first.
    pub fn last_pass(&self) -> Option<u64> {
        self.last_pass
    }

    pub(crate) fn mark_pass(&mut self, pass_id: u64) {
        self.last_pass = Some(pass_id);
    }

    pub(crate) fn has_side_effects(&self) -> bool {
        self.module.has_side_effects()
    }

    /// Splits into the parts the evaluator needs at the same time.
    pub(crate) fn render_parts(&mut self) -> (&mut dyn DspModule, &mut [Signal]) {
        self.render_count += 1;
        (self.module.as_mut(), &mut self.signals)
    }

    /// Copies `data` into the module's table at `offset`, truncating at the end.
    ///
    /// Returns the number of samples written.
    pub fn write_table(&mut self, offset: usize, data: &[i16]) -> usize {
        let table = self.module.table_mut();
        if offset >= table.len() {
            return 0;
        }
        let count = data.len().min(table.len() - offset);
        table[offset..offset + count].copy_from_slice(&data[..count]);
        count
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("module", &self.module.info().name)
            .field("ports", &self.signals.len())
            .field("last_pass", &self.last_pass)
            .field("render_count", &self.render_count)
            .finish()
    }
}
