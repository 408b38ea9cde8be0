//! Sampler module.
//!
//! Keeps a PCM recording in table memory. One head records from an input,
//! another plays back with pitch-controlled speed and linear interpolation.
//!
//! Table layout:
//!
//! | index | content |
//! |---|---|
//! | 0 | sample length, low 16 bits |
//! | 1 | sample length, high 16 bits |
//! | 2 | status bits, see [`STATUS_PLAYBACK`] and [`STATUS_RECORD`] |
//! | 3.. | PCM data |
//!
//! A host can load a sample by writing PCM data and the length through table
//! writes. The status word is rewritten after every block.

use crate::dsp::fixed::try_alloc_table;
use crate::dsp::{
    mult_shift, pitch_to_step, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind,
    OutputPort, PortDefinition, RenderContext, SignalHint, TriggerDecoder, TriggerEvent, SCT_A440,
};

/// Number of header words ahead of the PCM data.
pub const HEADER_LEN: usize = 3;

/// Status bit set while playback is running.
pub const STATUS_PLAYBACK: i16 = 1 << 0;

/// Status bit set while recording is running.
pub const STATUS_RECORD: i16 = 1 << 1;

/// Frame capacity when the config word is zero (one second).
pub const DEFAULT_FRAMES: u32 = 48_000;

/// Largest frame capacity (five minutes).
pub const MAX_FRAMES: u32 = 48_000 * 300;

/// Read head fraction bits.
const FRACTION_BITS: u32 = 16;

/// Playback speed limit, as a read head increment.
const MAX_SPEED: u64 = 4 << FRACTION_BITS;

const LEN_LO: usize = 0;
const LEN_HI: usize = 1;
const STATUS: usize = 2;

/// Record and playback sampler.
///
/// Renders every pass, since recording must not depend on the output being
/// consumed.
///
/// # Ports
///
/// - **Playback Output** (0)
/// - **Playback Trigger** (1): a start plays from the beginning with the
///   start's velocity as volume, a stop halts.
/// - **Playback Speed** (2): SCT, A440 plays at the recorded speed, an octave
///   up at twice the speed. Capped at four times.
/// - **Record Trigger** (3): a start records from the beginning, a stop ends
///   the recording.
/// - **Record Input** (4)
/// - **Loop** (5): nonzero wraps playback at the end of the sample.
///
/// # Config
///
/// Capacity in frames, 1 to 14 400 000; zero selects 48000.
pub struct Sampler {
    table: Box<[i16]>,
    playback: TriggerDecoder,
    record: TriggerDecoder,
    playing: bool,
    recording: bool,
    volume: i16,
    /// 48.16 fixed-point position in frames.
    read_head: u64,
    write_head: usize,
    speed_pitch: i16,
    speed: u64,
}

impl Sampler {
    pub const OUT: OutputPort = OutputPort(0);
    pub const PLAYBACK_TRIGGER: InputPort = InputPort(1);
    pub const PLAYBACK_SPEED: InputPort = InputPort(2);
    pub const RECORD_TRIGGER: InputPort = InputPort(3);
    pub const RECORD_INPUT: InputPort = InputPort(4);
    pub const LOOP: InputPort = InputPort(5);

    const PORTS: [PortDefinition; 6] = [
        PortDefinition::output("playback_output", "Playback Output", SignalHint::Linear),
        PortDefinition::input("playback_trigger", "Playback Trigger", SignalHint::Trigger, 0),
        PortDefinition::input("playback_speed", "Playback Speed", SignalHint::Pitch, SCT_A440),
        PortDefinition::input("record_trigger", "Record Trigger", SignalHint::Trigger, 0),
        PortDefinition::input("record_input", "Record Input", SignalHint::Linear, 0),
        PortDefinition::input("loop", "Loop", SignalHint::Linear, 0),
    ];

    /// Number of PCM frames the table holds.
    pub fn capacity(&self) -> usize {
        self.table.len() - HEADER_LEN
    }

    /// Sample length from the header, limited to the capacity.
    pub fn sample_len(&self) -> usize {
        let lo = self.table[LEN_LO] as u16 as usize;
        let hi = self.table[LEN_HI] as u16 as usize;
        (lo | hi << 16).min(self.capacity())
    }

    fn set_sample_len(&mut self, len: usize) {
        self.table[LEN_LO] = len as u16 as i16;
        self.table[LEN_HI] = (len >> 16) as u16 as i16;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn speed_for(&mut self, pitch: i16) -> u64 {
        if pitch != self.speed_pitch {
            let step = pitch_to_step(pitch) as u64;
            self.speed = ((step << FRACTION_BITS) / pitch_to_step(SCT_A440) as u64).min(MAX_SPEED);
            self.speed_pitch = pitch;
        }
        self.speed
    }

    fn record(&mut self, value: i16) {
        let capacity = self.capacity();
        if self.write_head >= capacity {
            self.recording = false;
            return;
        }
        self.table[HEADER_LEN + self.write_head] = value;
        self.write_head += 1;
        self.set_sample_len(self.write_head);
        if self.write_head == capacity {
            self.recording = false;
        }
    }

    /// Produces the next playback sample and advances the read head.
    fn play(&mut self, len: usize, looping: bool, speed: u64) -> i16 {
        let mut index = (self.read_head >> FRACTION_BITS) as usize;
        if index >= len {
            if looping && len > 0 {
                self.read_head %= (len as u64) << FRACTION_BITS;
                index = (self.read_head >> FRACTION_BITS) as usize;
            } else {
                self.playing = false;
                return 0;
            }
        }

        let pcm = &self.table[HEADER_LEN..HEADER_LEN + len];
        let current = pcm[index] as i32;
        let next = match pcm.get(index + 1) {
            Some(&next) => next as i32,
            None if looping => pcm[0] as i32,
            None => current,
        };
        let fraction = (self.read_head & ((1 << FRACTION_BITS) - 1)) as i64;
        // Neighbours up to full scale apart times a 16-bit fraction exceed i32.
        let value = current + (((next - current) as i64 * fraction) >> FRACTION_BITS) as i32;

        self.read_head += speed;
        mult_shift(value as i16, self.volume)
    }

    fn publish_status(&mut self) {
        let mut status = 0;
        if self.playing {
            status |= STATUS_PLAYBACK;
        }
        if self.recording {
            status |= STATUS_RECORD;
        }
        self.table[STATUS] = status;
    }
}

impl DspModule for Sampler {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let playback_trigger = ctx.input(Self::PLAYBACK_TRIGGER);
        let record_trigger = ctx.input(Self::RECORD_TRIGGER);

        // Idle with steady triggers: only edges at the first sample can
        // wake the sampler up.
        if !self.playing && !self.recording {
            if let (Some(play), Some(rec)) = (playback_trigger.constant(), record_trigger.constant()) {
                let (mut play_ahead, mut rec_ahead) = (self.playback, self.record);
                let wakes = matches!(play_ahead.decode(play), TriggerEvent::Start(_))
                    || matches!(rec_ahead.decode(rec), TriggerEvent::Start(_));
                if !wakes {
                    self.playback = play_ahead;
                    self.record = rec_ahead;
                    ctx.set_output_const(Self::OUT, 0);
                    self.publish_status();
                    return;
                }
            }
        }

        let speed_input = ctx.input(Self::PLAYBACK_SPEED);
        let record_input = ctx.input(Self::RECORD_INPUT);
        let looping = ctx.input(Self::LOOP).first() != 0;
        let play_steady = playback_trigger.constant().is_some();
        let rec_steady = record_trigger.constant().is_some();

        for i in 0..ctx.num_samples() {
            if i == 0 || !rec_steady {
                match self.record.decode(record_trigger.get(i)) {
                    TriggerEvent::Start(_) => {
                        self.recording = true;
                        self.write_head = 0;
                        self.set_sample_len(0);
                    }
                    TriggerEvent::Stop(_) => self.recording = false,
                    _ => {}
                }
            }
            if self.recording {
                self.record(record_input.get(i));
            }

            if i == 0 || !play_steady {
                match self.playback.decode(playback_trigger.get(i)) {
                    TriggerEvent::Start(velocity) => {
                        self.playing = true;
                        self.read_head = 0;
                        self.volume = velocity;
                    }
                    TriggerEvent::Stop(_) => self.playing = false,
                    _ => {}
                }
            }
            let out = if self.playing {
                let speed = self.speed_for(speed_input.get(i));
                self.play(self.sample_len(), looping, speed)
            } else {
                0
            };
            ctx.set_output(Self::OUT, i, out);
        }
        self.publish_status();
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

impl ModuleKind for Sampler {
    const INFO: ModuleInfo = ModuleInfo {
        id: 696969,
        name: "sampler",
        category: ModuleCategory::Source,
        description: "Simple sampler with recording; config is the sample memory length in frames",
    };

    fn create(config: u32) -> Option<Self> {
        let frames = match config {
            0 => DEFAULT_FRAMES,
            frames => frames.min(MAX_FRAMES),
        } as usize;
        Some(Self {
            table: try_alloc_table(HEADER_LEN + frames)?,
            playback: TriggerDecoder::new(),
            record: TriggerDecoder::new(),
            playing: false,
            recording: false,
            volume: 0,
            read_head: 0,
            write_head: 0,
            speed_pitch: SCT_A440,
            speed: 1 << FRACTION_BITS,
        })
    }
}
