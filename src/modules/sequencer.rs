//! Step Sequencer module.
//!
//! A multi-track step sequencer with its own clock. Each track is a row of
//! step values in table memory and plays either as a trigger channel or as
//! a direct control value.

use crate::dsp::fixed::try_alloc_table;
use crate::dsp::{
    DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort, PortDefinition,
    RenderContext, SignalHint, TriggerDecoder, TriggerEncoder, TriggerEvent, SAMPLE_RATE,
};

/// Track type word: steps are trigger edges.
pub const TRACK_TRIGGER: i16 = -32767;

/// Track type word: steps are output directly.
pub const TRACK_DIRECT: i16 = 32767;

/// Track and step counts when the config word is zero.
pub const DEFAULT_TRACKS: u32 = 4;
pub const DEFAULT_STEPS: u32 = 16;

/// Samples per step, or `None` when the clock is stopped.
///
/// A beat division of 4 steps once per beat.
pub fn step_length(bpm: i16, beat_div: i16) -> Option<u32> {
    if bpm <= 0 || beat_div <= 0 {
        return None;
    }
    let length = SAMPLE_RATE * 60 * 4 / (bpm as u32 * beat_div as u32);
    Some(length.max(1))
}

#[derive(Clone, Copy, Debug, Default)]
struct Track {
    trigger: TriggerEncoder,
    direct: i16,
}

/// Step sequencer.
///
/// Renders every pass so the clock keeps running whether or not anything
/// listens.
///
/// # Ports
///
/// - **Step** (0): index of the current step.
/// - **Sync Out** (1): starts whenever the sequence wraps or is restarted.
/// - **Sync In** (2): a start restarts from **Step Start**, a stop halts.
/// - **Step Start / Step End** (3, 4): the looped step range.
/// - **BPM** (5): zero stops the clock.
/// - **Beat Div** (6): steps per whole note.
/// - then one **Track** output per track.
///
/// # Config
///
/// Low byte is the track count, the next byte the step count; zero selects
/// 4 tracks of 16 steps. Each count is at least 1.
///
/// # Table
///
/// For each track, a type word ([`TRACK_TRIGGER`] or [`TRACK_DIRECT`])
/// followed by one word per step. Any type word other than [`TRACK_DIRECT`]
/// plays as a trigger track. On a trigger track a positive step starts a
/// note with that velocity, a negative step stops it and zero holds.
pub struct Sequencer {
    ports: Vec<PortDefinition>,
    table: Box<[i16]>,
    tracks: Vec<Track>,
    steps: usize,
    step: i32,
    counter: u32,
    length: Option<u32>,
    tempo: (i16, i16),
    stopped: bool,
    sync_in: TriggerDecoder,
    sync_out: TriggerEncoder,
}

impl Sequencer {
    pub const STEP: OutputPort = OutputPort(0);
    pub const SYNC_OUT: OutputPort = OutputPort(1);
    pub const SYNC_IN: InputPort = InputPort(2);
    pub const STEP_START: InputPort = InputPort(3);
    pub const STEP_END: InputPort = InputPort(4);
    pub const BPM: InputPort = InputPort(5);
    pub const BEAT_DIV: InputPort = InputPort(6);

    /// Output of track `k`.
    pub const fn track(k: usize) -> OutputPort {
        OutputPort(7 + k)
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn num_steps(&self) -> usize {
        self.steps
    }

    /// Table index of the type word of track `k`.
    pub fn track_offset(&self, k: usize) -> usize {
        k * (self.steps + 1)
    }

    /// Rewinds so the next clock tick lands on `start`.
    fn restart(&mut self, start: i32) {
        self.step = start - 1;
        self.counter = self.length.map_or(0, |length| length - 1);
        self.stopped = self.length.is_none();
    }

    fn fire_step(&mut self) {
        let step = self.step as usize;
        for k in 0..self.tracks.len() {
            let offset = self.track_offset(k);
            let kind = self.table[offset];
            let value = self.table[offset + 1 + step];
            let track = &mut self.tracks[k];
            match kind {
                TRACK_DIRECT => track.direct = value,
                _ if value > 0 => {
                    track.trigger.start(value);
                }
                _ if value < 0 => {
                    track.trigger.stop();
                }
                _ => {}
            }
        }
    }

    fn track_value(&self, k: usize) -> i16 {
        let track = &self.tracks[k];
        match self.table[self.track_offset(k)] {
            TRACK_DIRECT => track.direct,
            _ => track.trigger.value(),
        }
    }
}

impl DspModule for Sequencer {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &self.ports
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let last = self.steps as i32 - 1;
        let start = (ctx.input(Self::STEP_START).first() as i32).clamp(0, last);
        let end = (ctx.input(Self::STEP_END).first() as i32).clamp(start, last);

        let tempo = (ctx.input(Self::BPM).first(), ctx.input(Self::BEAT_DIV).first());
        if tempo != self.tempo {
            self.tempo = tempo;
            self.length = step_length(tempo.0, tempo.1);
            match self.length {
                Some(length) => {
                    self.counter = self.counter.min(length - 1);
                    self.stopped = false;
                }
                None => self.stopped = true,
            }
        }

        let sync_in = ctx.input(Self::SYNC_IN);
        let sync_steady = sync_in.constant().is_some();
        for i in 0..ctx.num_samples() {
            if i == 0 || !sync_steady {
                match self.sync_in.decode(sync_in.get(i)) {
                    TriggerEvent::Start(_) => {
                        self.restart(start);
                        self.sync_out.start(32767);
                    }
                    TriggerEvent::Stop(_) => {
                        self.stopped = true;
                        self.sync_out.stop();
                    }
                    _ => {}
                }
            }

            if let (false, Some(length)) = (self.stopped, self.length) {
                self.counter += 1;
                if self.counter >= length {
                    self.counter = 0;
                    self.step += 1;
                    if self.step > end || self.step < start {
                        self.step = start;
                        self.sync_out.start(32767);
                    }
                    self.fire_step();
                }
            }

            ctx.set_output(Self::STEP, i, self.step.max(0) as i16);
            ctx.set_output(Self::SYNC_OUT, i, self.sync_out.value());
            for k in 0..self.tracks.len() {
                let value = self.track_value(k);
                ctx.set_output(Self::track(k), i, value);
            }
        }
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn table(&self) -> &[i16] {
        &self.table
    }

    fn table_mut(&mut self) -> &mut [i16] {
        &mut self.table
    }
}

impl ModuleKind for Sequencer {
    const INFO: ModuleInfo = ModuleInfo {
        id: 56709,
        name: "sequencer",
        category: ModuleCategory::Sequencing,
        description: "Sequencer with trigger or direct value tracks; config low byte is the track count, next byte the step count",
    };

    fn create(config: u32) -> Option<Self> {
        let (tracks, steps) = match config {
            0 => (DEFAULT_TRACKS, DEFAULT_STEPS),
            c => ((c & 0xff).max(1), ((c >> 8) & 0xff).max(1)),
        };
        let (tracks, steps) = (tracks as usize, steps as usize);

        let mut table = try_alloc_table(tracks * (steps + 1))?;
        for k in 0..tracks {
            table[k * (steps + 1)] = TRACK_TRIGGER;
        }

        let mut ports = Vec::new();
        ports.try_reserve_exact(7 + tracks).ok()?;
        ports.extend([
            PortDefinition::output("step", "Step", SignalHint::Linear),
            PortDefinition::output("sync_out", "Sync Out", SignalHint::Trigger),
            PortDefinition::input("sync_in", "Sync In", SignalHint::Trigger, 0),
            PortDefinition::input("step_start", "Step Start", SignalHint::Linear, 0),
            PortDefinition::input("step_end", "Step End", SignalHint::Linear, steps as i16 - 1),
            PortDefinition::input("bpm", "BPM", SignalHint::Linear, 120),
            PortDefinition::input("beat_div", "Beat Div", SignalHint::Linear, 16),
        ]);
        for k in 0..tracks as u16 {
            ports.push(PortDefinition::output("track", "Track", SignalHint::Trigger).in_group(k));
        }

        let mut track_state = Vec::new();
        track_state.try_reserve_exact(tracks).ok()?;
        track_state.resize(tracks, Track::default());

        let mut sequencer = Self {
            ports,
            table,
            tracks: track_state,
            steps,
            step: 0,
            counter: 0,
            length: step_length(120, 16),
            tempo: (120, 16),
            stopped: false,
            sync_in: TriggerDecoder::new(),
            sync_out: TriggerEncoder::new(),
        };
        sequencer.restart(0);
        Some(sequencer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    /// Forty samples per step.
    fn fast(config: u32) -> Harness<Sequencer> {
        let mut harness = Harness::new(Sequencer::create(config).unwrap());
        harness.set(Sequencer::BPM, 3000);
        harness.set(Sequencer::BEAT_DIV, 96);
        harness
    }

    fn write_track(harness: &mut Harness<Sequencer>, k: usize, kind: i16, steps: &[i16]) {
        let offset = harness.module.track_offset(k);
        let table = harness.module.table_mut();
        table[offset] = kind;
        table[offset + 1..offset + 1 + steps.len()].copy_from_slice(steps);
    }

    #[test]
    fn test_config_layout() {
        let default = Sequencer::create(0).unwrap();
        assert_eq!((default.num_tracks(), default.num_steps()), (4, 16));
        assert_eq!(default.ports().len(), 11);
        assert_eq!(default.table().len(), 4 * 17);
        assert_eq!(default.table()[17], TRACK_TRIGGER);
        assert_eq!(default.ports()[8].label(), "track_1");
        assert!(default.has_side_effects());

        let custom = Sequencer::create(0x0802).unwrap();
        assert_eq!((custom.num_tracks(), custom.num_steps()), (2, 8));
        let clamped = Sequencer::create(0x0003).unwrap();
        assert_eq!((clamped.num_tracks(), clamped.num_steps()), (3, 1));
    }

    #[test]
    fn test_step_length() {
        assert_eq!(step_length(120, 16), Some(6000));
        assert_eq!(step_length(3000, 96), Some(40));
        assert_eq!(step_length(0, 16), None);
        assert_eq!(step_length(120, 0), None);
    }

    #[test]
    fn test_first_step_fires_immediately() {
        let mut harness = fast(0x0401);
        write_track(&mut harness, 0, TRACK_TRIGGER, &[1000, 0, -1, 0]);
        harness.render(40);
        assert_eq!(harness.output(Sequencer::track(0), 40)[0], 1000);
        assert_eq!(harness.output(Sequencer::STEP, 40)[0], 0);
    }

    #[test]
    fn test_steps_advance_and_wrap() {
        let mut harness = fast(0x0401);
        harness.render(200);
        let steps = harness.output(Sequencer::STEP, 200);
        assert_eq!(steps[39], 0);
        assert_eq!(steps[40], 1);
        assert_eq!(steps[120], 3);
        assert_eq!(steps[160], 0);
    }

    #[test]
    fn test_trigger_track_edges() {
        let mut harness = fast(0x0401);
        write_track(&mut harness, 0, TRACK_TRIGGER, &[1000, 0, -1, 0]);
        harness.render(160);
        let track = harness.output(Sequencer::track(0), 160);
        let mut decoder = TriggerDecoder::new();
        let events: Vec<_> = track
            .iter()
            .map(|&v| decoder.decode(v))
            .filter(TriggerEvent::is_edge)
            .collect();
        assert_eq!(events, vec![TriggerEvent::Start(1000), TriggerEvent::Stop(1000)]);
        assert_eq!(track[79], 1000);
        assert_eq!(track[80], -1000);
    }

    #[test]
    fn test_unknown_type_word_plays_as_triggers() {
        let mut harness = fast(0x0401);
        write_track(&mut harness, 0, 0, &[700, 0, -1, 0]);
        harness.render(160);
        let track = harness.output(Sequencer::track(0), 160);
        assert_eq!(track[0], 700);
        assert_eq!(track[79], 700);
        assert_eq!(track[80], -700);
    }

    #[test]
    fn test_direct_track_values() {
        let mut harness = fast(0x0401);
        write_track(&mut harness, 0, TRACK_DIRECT, &[100, 200, 300, 400]);
        harness.render(160);
        let track = harness.output(Sequencer::track(0), 160);
        assert_eq!([track[0], track[40], track[80], track[159]], [100, 200, 300, 400]);
    }

    #[test]
    fn test_step_range_and_sync_out() {
        let mut harness = fast(0x0401);
        harness.set(Sequencer::STEP_END, 1);
        harness.render(200);
        let steps = harness.output(Sequencer::STEP, 200);
        assert_eq!([steps[0], steps[40], steps[80], steps[120]], [0, 1, 0, 1]);

        let sync = harness.output(Sequencer::SYNC_OUT, 200);
        let mut decoder = TriggerDecoder::new();
        let starts = sync
            .iter()
            .filter(|&&v| matches!(decoder.decode(v), TriggerEvent::Start(_)))
            .count();
        // Sample 80 and sample 160.
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_zero_bpm_stops_clock() {
        let mut harness = fast(0x0401);
        harness.render(50);
        harness.set(Sequencer::BPM, 0);
        harness.render(200);
        let steps = harness.output(Sequencer::STEP, 200);
        assert!(steps.iter().all(|&s| s == 1));
    }

    #[test]
    fn test_sync_in_restarts_and_stops() {
        let mut harness = fast(0x0801);
        harness.set(Sequencer::STEP_START, 2);
        harness.render(100);

        harness.set(Sequencer::SYNC_IN, 500);
        harness.render(40);
        assert_eq!(harness.output(Sequencer::STEP, 40)[0], 2);
        assert!(harness.output(Sequencer::SYNC_OUT, 40)[0] > 0);

        harness.set(Sequencer::SYNC_IN, -500);
        harness.render(200);
        let steps = harness.output(Sequencer::STEP, 200);
        assert!(steps.iter().all(|&s| s == steps[0]));
        assert!(harness.output(Sequencer::SYNC_OUT, 200)[0] < 0);
    }
}
