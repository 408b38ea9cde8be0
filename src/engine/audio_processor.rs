//! Audio Processor
//!
//! Runs in the audio callback. Applies pending commands from the control
//! thread, renders the patch graph and converts the root output for the host.

use std::collections::VecDeque;

use crate::dsp::fixed::to_f32;
use crate::dsp::MAX_BLOCK_SIZE;

use super::channels::EngineHandle;
use super::commands::{EngineEvent, Garbage};
use super::patch_graph::PatchGraph;

/// Audio processor that runs in the audio callback.
///
/// Owns the audio-side graph. Everything the graph releases is sent back to
/// the control thread instead of being dropped here. Events that do not fit
/// the return queue wait in a backlog allocated up front.
pub struct AudioProcessor {
    graph: PatchGraph,
    engine_handle: EngineHandle,
    backlog: VecDeque<EngineEvent>,
}

impl AudioProcessor {
    pub fn new(graph: PatchGraph, engine_handle: EngineHandle) -> Self {
        // One command retires at most every instance plus one rejection.
        let backlog = VecDeque::with_capacity(2 * (graph.layout().capacity() + 1));
        Self {
            graph,
            engine_handle,
            backlog,
        }
    }

    pub fn graph(&self) -> &PatchGraph {
        &self.graph
    }

    /// Events waiting for room in the return queue.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Applies pending commands.
    ///
    /// A command is only taken while the backlog can absorb everything it
    /// might release; otherwise it stays queued for a later block. Nothing
    /// is dropped or freed here.
    pub fn process_commands(&mut self) {
        let worst_case = self.graph.layout().capacity() + 1;
        self.flush_backlog();

        while self.backlog.capacity() - self.backlog.len() >= worst_case {
            let Some(cmd) = self.engine_handle.recv_command() else {
                break;
            };
            let backlog = &mut self.backlog;
            let result = self.graph.handle_command(cmd, |garbage: Garbage| {
                backlog.push_back(EngineEvent::Retired(garbage));
            });
            if let Err(err) = result {
                self.backlog.push_back(EngineEvent::Rejected(err));
            }
            self.flush_backlog();
        }
    }

    fn flush_backlog(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            if let Err(event) = self.engine_handle.send_event(event) {
                self.backlog.push_front(event);
                break;
            }
        }
    }

    /// Applies pending commands and renders one block of at most
    /// [`MAX_BLOCK_SIZE`] samples.
    pub fn render_block(&mut self, num_samples: usize) -> &[i16] {
        self.process_commands();
        self.graph.process_block(num_samples)
    }

    /// Fills an interleaved f32 host buffer, duplicating the mono output to
    /// every channel.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.process_with(output, channels, to_f32);
    }

    /// Fills an interleaved host buffer of any sample type, converting each
    /// rendered sample with `convert`.
    pub fn process_with<T: Copy>(
        &mut self,
        output: &mut [T],
        channels: usize,
        convert: impl Fn(i16) -> T,
    ) {
        let channels = channels.max(1);
        self.process_commands();

        for chunk in output.chunks_mut(MAX_BLOCK_SIZE * channels) {
            let frames = chunk.len() / channels;
            let block = self.graph.process_block(frames);
            for (frame, &sample) in chunk.chunks_mut(channels).zip(block) {
                frame.fill(convert(sample));
            }
        }
    }
}
