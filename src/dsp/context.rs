//! Render context handed to a module for one block.
//!
//! The context hides where an input comes from. A port with a source reads
//! the upstream output buffer; a port without one reads its own constant.
//! Modules resolve each input once per block into an [`Input`] and index it
//! per sample.

use super::port::{InputPort, OutputPort};
use super::signal::Signal;

/// Lookup of the upstream output feeding an input port.
///
/// Implemented by the graph evaluator.
pub trait UpstreamSignals {
    /// Returns the output signal linked to input `port`, if any.
    fn upstream(&self, port: usize) -> Option<&Signal>;
}

/// Upstream lookup for an instance with no links.
pub struct Unlinked;

impl UpstreamSignals for Unlinked {
    fn upstream(&self, _port: usize) -> Option<&Signal> {
        None
    }
}

/// A resolved input for the current block.
#[derive(Clone, Copy, Debug)]
pub enum Input<'a> {
    /// Same value for every sample.
    Constant(i16),
    /// Upstream block buffer.
    Stream(&'a [i16]),
}

impl Input<'_> {
    #[inline]
    pub fn get(&self, index: usize) -> i16 {
        match self {
            Input::Constant(value) => *value,
            Input::Stream(buffer) => buffer[index],
        }
    }

    /// Value at the start of the block.
    #[inline]
    pub fn first(&self) -> i16 {
        self.get(0)
    }

    #[inline]
    pub fn constant(&self) -> Option<i16> {
        match self {
            Input::Constant(value) => Some(*value),
            Input::Stream(_) => None,
        }
    }
}

/// Per-block view of a module instance's ports.
pub struct RenderContext<'a> {
    num_samples: usize,
    pass_id: u64,
    signals: &'a mut [Signal],
    upstream: &'a dyn UpstreamSignals,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        num_samples: usize,
        pass_id: u64,
        signals: &'a mut [Signal],
        upstream: &'a dyn UpstreamSignals,
    ) -> Self {
        Self {
            num_samples,
            pass_id,
            signals,
            upstream,
        }
    }

    /// Number of samples to produce in this block.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn pass_id(&self) -> u64 {
        self.pass_id
    }

    /// Resolves an input port for this block.
    pub fn input(&self, port: InputPort) -> Input<'a> {
        let upstream: &'a dyn UpstreamSignals = self.upstream;
        match upstream.upstream(port.index()) {
            Some(signal) => match signal.block_constant() {
                Some(value) => Input::Constant(value),
                None => Input::Stream(signal.samples()),
            },
            None => Input::Constant(self.signals[port.index()].value()),
        }
    }

    /// Returns true if something consumes this output.
    #[inline]
    pub fn is_connected(&self, port: OutputPort) -> bool {
        self.signals[port.index()].is_attached()
    }

    /// Writes one output sample.
    ///
    /// Unconsumed outputs keep their buffer untouched but still record the
    /// value, so the last value stays observable.
    #[inline]
    pub fn set_output(&mut self, port: OutputPort, index: usize, value: i16) {
        let signal = &mut self.signals[port.index()];
        if signal.is_attached() {
            signal.write(index, value);
        } else {
            signal.set_value(value);
        }
    }

    /// Declares an output constant for the whole block.
    #[inline]
    pub fn set_output_const(&mut self, port: OutputPort, value: i16) {
        let signal = &mut self.signals[port.index()];
        if signal.is_attached() {
            signal.write_constant(value);
        } else {
            signal.set_value(value);
        }
    }

    /// Most recent value written to an output.
    pub fn output_value(&self, port: OutputPort) -> i16 {
        self.signals[port.index()].value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneLink<'a> {
        port: usize,
        signal: &'a Signal,
    }

    impl UpstreamSignals for OneLink<'_> {
        fn upstream(&self, port: usize) -> Option<&Signal> {
            (port == self.port).then_some(self.signal)
        }
    }

    #[test]
    fn test_unlinked_input_reads_constant() {
        let mut signals = vec![Signal::output().unwrap(), Signal::input(1234)];
        let ctx = RenderContext::new(16, 1, &mut signals, &Unlinked);
        let input = ctx.input(InputPort(1));
        assert_eq!(input.constant(), Some(1234));
        assert_eq!(input.get(15), 1234);
    }

    #[test]
    fn test_linked_input_reads_upstream() {
        let mut upstream = Signal::output().unwrap();
        upstream.set_attached(true);
        for i in 0..4 {
            upstream.write(i, i as i16 * 10);
        }
        let link = OneLink {
            port: 1,
            signal: &upstream,
        };
        let mut signals = vec![Signal::output().unwrap(), Signal::input(99)];
        let ctx = RenderContext::new(4, 1, &mut signals, &link);
        let input = ctx.input(InputPort(1));
        assert_eq!(input.constant(), None);
        assert_eq!(input.get(3), 30);
    }

    #[test]
    fn test_unconsumed_output_records_last_value() {
        let mut signals = vec![Signal::output().unwrap()];
        let mut ctx = RenderContext::new(4, 1, &mut signals, &Unlinked);
        assert!(!ctx.is_connected(OutputPort(0)));
        ctx.set_output(OutputPort(0), 0, 500);
        ctx.set_output(OutputPort(0), 3, -7);
        assert_eq!(ctx.output_value(OutputPort(0)), -7);

        assert_eq!(signals[0].value(), -7);
        assert!(signals[0].samples().iter().all(|&s| s == 0));
    }
}
