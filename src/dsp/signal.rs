//! Signal hints and per-port runtime storage.

use super::fixed::try_alloc_table;
use super::port::PortDirection;

/// Largest number of samples rendered in one pass.
pub const MAX_BLOCK_SIZE: usize = 256;

/// How a port's 16-bit value is meant to be read.
///
/// Hints are advisory: any output may feed any input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalHint {
    /// Plain audio or control value.
    Linear,
    /// Semitone-cent pitch.
    Pitch,
    /// Gain where `UNITY_GAIN` is identity.
    Gain,
    /// Edge-encoded note events.
    Trigger,
}

impl SignalHint {
    /// Returns a human-readable name for the hint.
    pub fn name(&self) -> &'static str {
        match self {
            SignalHint::Linear => "Linear",
            SignalHint::Pitch => "Pitch",
            SignalHint::Gain => "Gain",
            SignalHint::Trigger => "Trigger",
        }
    }
}

/// Runtime state of one port.
///
/// An input holds the constant used while it has no source. An output owns
/// its block buffer, which is written only while something consumes it; a
/// module may instead declare the whole block constant, in which case only
/// `buffer[0]` is meaningful.
#[derive(Debug)]
pub struct Signal {
    direction: PortDirection,
    value: i16,
    buffer: Box<[i16]>,
    constant: bool,
    attached: bool,
}

impl Signal {
    /// Creates input storage holding `value`.
    pub fn input(value: i16) -> Self {
        Self {
            direction: PortDirection::Input,
            value,
            buffer: Box::default(),
            constant: true,
            attached: false,
        }
    }

    /// Creates output storage. Returns `None` if the buffer cannot be allocated.
    pub fn output() -> Option<Self> {
        Some(Self {
            direction: PortDirection::Output,
            value: 0,
            buffer: try_alloc_table(MAX_BLOCK_SIZE)?,
            constant: true,
            attached: false,
        })
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Constant of an input, or the most recent sample written to an output.
    pub fn value(&self) -> i16 {
        self.value
    }

    pub fn set_value(&mut self, value: i16) {
        self.value = value;
    }

    /// True while at least one consumer reads this output.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn set_attached(&mut self, attached: bool) {
        self.attached = attached;
    }

    /// Reads sample `index` of the last rendered block.
    #[inline]
    pub fn read(&self, index: usize) -> i16 {
        if self.constant {
            self.buffer.first().copied().unwrap_or(self.value)
        } else {
            self.buffer[index]
        }
    }

    /// Returns the block value if the last rendered block was constant.
    #[inline]
    pub fn block_constant(&self) -> Option<i16> {
        self.constant.then(|| self.read(0))
    }

    #[inline]
    pub(crate) fn write(&mut self, index: usize, value: i16) {
        if self.constant && index > 0 {
            let held = self.buffer[0];
            self.buffer[..index].fill(held);
        }
        self.constant = false;
        self.buffer[index] = value;
        self.value = value;
    }

    #[inline]
    pub(crate) fn write_constant(&mut self, value: i16) {
        if let Some(first) = self.buffer.first_mut() {
            *first = value;
        }
        self.constant = true;
        self.value = value;
    }

    /// Raw block buffer. Only meaningful when the block is not constant.
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.buffer
    }

    /// Returns the first `len` samples, expanding a constant block in place.
    pub fn block(&mut self, len: usize) -> &[i16] {
        let len = len.min(self.buffer.len());
        if self.constant {
            let held = self.read(0);
            self.buffer[..len].fill(held);
            self.constant = false;
        }
        &self.buffer[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_names() {
        assert_eq!(SignalHint::Pitch.name(), "Pitch");
        assert_eq!(SignalHint::Trigger.name(), "Trigger");
    }

    #[test]
    fn test_input_holds_constant() {
        let mut signal = Signal::input(100);
        assert_eq!(signal.direction(), PortDirection::Input);
        assert_eq!(signal.value(), 100);
        signal.set_value(-4);
        assert_eq!(signal.value(), -4);
    }

    #[test]
    fn test_output_constant_and_stream() {
        let mut signal = Signal::output().unwrap();
        signal.write_constant(42);
        assert_eq!(signal.block_constant(), Some(42));
        assert_eq!(signal.read(17), 42);

        signal.write(3, 7);
        assert_eq!(signal.block_constant(), None);
        assert_eq!(signal.read(0), 42);
        assert_eq!(signal.read(2), 42);
        assert_eq!(signal.read(3), 7);
        assert_eq!(signal.value(), 7);
    }

    #[test]
    fn test_block_expands_constant() {
        let mut signal = Signal::output().unwrap();
        signal.write_constant(-9);
        let block = signal.block(8);
        assert_eq!(block, &[-9; 8]);
    }
}
