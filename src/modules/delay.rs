//! Static Delay effect module.
//!
//! A single delay line held in table memory, with feedback, separate dry and
//! wet levels and a record volume that freezes the line when set to zero.

use crate::dsp::fixed::{ms_to_samples, try_alloc_table};
use crate::dsp::{
    add_sat, mult_shift, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind,
    OutputPort, PortDefinition, RenderContext, SignalHint,
};

/// Line length in milliseconds when the config word is zero.
pub const DEFAULT_MAX_TIME_MS: u32 = 500;

/// Longest line in milliseconds.
pub const MAX_TIME_MS: u32 = 10_000;

/// Delay line with feedback.
///
/// # Ports
///
/// - **Output** (0): dry plus wet signal.
/// - **Input** (1)
/// - **Time** (2): delay in milliseconds, magnitude clamped to the line length.
/// - **Feedback** (3): share of the wet signal written back into the line.
/// - **Level** (4): wet volume.
/// - **Dry Vol** (5)
/// - **Rec Vol** (6): input volume into the line; zero freezes the line.
///
/// # Config
///
/// Line length in milliseconds, 1 to 10000; zero selects 500.
pub struct StaticDelay {
    line: Box<[i16]>,
    max_time_ms: u32,
    write_head: usize,
    read_head: usize,
    /// Delay in samples the read head was placed for.
    delay: Option<usize>,
}

impl StaticDelay {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const TIME: InputPort = InputPort(2);
    pub const FEEDBACK: InputPort = InputPort(3);
    pub const LEVEL: InputPort = InputPort(4);
    pub const DRY_VOL: InputPort = InputPort(5);
    pub const REC_VOL: InputPort = InputPort(6);

    const PORTS: [PortDefinition; 7] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 0),
        PortDefinition::input("time", "Time (ms)", SignalHint::Linear, 200),
        PortDefinition::input("feedback", "Feedback", SignalHint::Linear, 16000),
        PortDefinition::input("level", "Level", SignalHint::Linear, 16000),
        PortDefinition::input("dry_vol", "Dry Vol", SignalHint::Linear, 32767),
        PortDefinition::input("rec_vol", "Rec Vol", SignalHint::Linear, 32767),
    ];

    pub fn max_time_ms(&self) -> u32 {
        self.max_time_ms
    }

    /// Moves the read head behind the write head when the delay changes.
    ///
    /// The delay is at least one sample so the line never reads the value
    /// it is about to overwrite.
    fn place_read_head(&mut self, time_ms: i16) {
        let len = self.line.len();
        let ms = (time_ms as i32).abs().min(self.max_time_ms as i32);
        let delay = (ms_to_samples(ms) as usize).clamp(1, len);
        if self.delay != Some(delay) {
            self.read_head = (self.write_head + len - delay) % len;
            self.delay = Some(delay);
        }
    }
}

impl DspModule for StaticDelay {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        self.place_read_head(ctx.input(Self::TIME).first());

        let feedback = ctx.input(Self::FEEDBACK).first();
        let level = ctx.input(Self::LEVEL).first();
        let dry_vol = ctx.input(Self::DRY_VOL).first();
        let rec_vol = ctx.input(Self::REC_VOL).first();
        let input = ctx.input(Self::INPUT);

        let len = self.line.len();
        for i in 0..ctx.num_samples() {
            self.write_head = (self.write_head + 1) % len;
            self.read_head = (self.read_head + 1) % len;

            let dry = input.get(i);
            let wet = self.line[self.read_head];
            if rec_vol != 0 {
                self.line[self.write_head] =
                    add_sat(mult_shift(rec_vol, dry), mult_shift(wet, feedback));
            }
            let out = add_sat(mult_shift(dry_vol, dry), mult_shift(wet, level));
            ctx.set_output(Self::OUT, i, out);
        }
    }

    fn table(&self) -> &[i16] {
        &self.line
    }

    fn table_mut(&mut self) -> &mut [i16] {
        &mut self.line
    }
}

impl ModuleKind for StaticDelay {
    const INFO: ModuleInfo = ModuleInfo {
        id: 42069,
        name: "delay_static",
        category: ModuleCategory::Effect,
        description: "Simple delay with ms input and feedback; config is the line length in ms (default 500)",
    };

    fn create(config: u32) -> Option<Self> {
        let max_time_ms = match config {
            0 => DEFAULT_MAX_TIME_MS,
            ms => ms.min(MAX_TIME_MS),
        };
        let line = try_alloc_table(ms_to_samples(max_time_ms as i32) as usize)?;
        Some(Self {
            line,
            max_time_ms,
            write_head: 0,
            read_head: 0,
            delay: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    /// Delay with only the wet path audible and no feedback.
    fn wet_only(config: u32, time_ms: i16) -> Harness<StaticDelay> {
        let mut harness = Harness::new(StaticDelay::create(config).unwrap());
        harness.set(StaticDelay::TIME, time_ms);
        harness.set(StaticDelay::FEEDBACK, 0);
        harness.set(StaticDelay::LEVEL, 32767);
        harness.set(StaticDelay::DRY_VOL, 0);
        harness
    }

    /// Feeds an impulse in the first block, then renders silence.
    fn impulse_response(harness: &mut Harness<StaticDelay>, blocks: usize) -> Vec<i16> {
        let mut impulse = [0i16; 256];
        impulse[0] = 32767;
        harness.feed(StaticDelay::INPUT, &impulse);
        let mut samples = harness.run(256);
        harness.unfeed(StaticDelay::INPUT);
        harness.set(StaticDelay::INPUT, 0);
        for _ in 1..blocks {
            samples.extend(harness.run(256));
        }
        samples
    }

    #[test]
    fn test_config_clamped() {
        assert_eq!(StaticDelay::create(0).unwrap().max_time_ms(), 500);
        assert_eq!(StaticDelay::create(0).unwrap().table().len(), 24_000);
        assert_eq!(StaticDelay::create(99_999).unwrap().max_time_ms(), 10_000);
        assert_eq!(StaticDelay::create(1).unwrap().table().len(), 48);
    }

    #[test]
    fn test_impulse_round_trip() {
        for time_ms in [1, 10, 37] {
            let mut harness = wet_only(100, time_ms);
            let samples = impulse_response(&mut harness, 10);

            let expected = time_ms as usize * 48;
            assert_eq!(samples[expected], 32765, "{time_ms} ms");
            let stray = samples
                .iter()
                .enumerate()
                .filter(|&(i, &s)| i != expected && s != 0)
                .count();
            assert_eq!(stray, 0, "{time_ms} ms");
        }
    }

    #[test]
    fn test_time_clamped_to_line() {
        let mut harness = wet_only(5, 1000);
        let samples = impulse_response(&mut harness, 2);
        assert_eq!(samples[240], 32765);
        assert_eq!(harness.signal(2).value(), 1000);
    }

    #[test]
    fn test_feedback_repeats_decay() {
        let mut harness = wet_only(50, 2);
        harness.set(StaticDelay::FEEDBACK, 16384);
        let samples = impulse_response(&mut harness, 2);
        let first = samples[96];
        let second = samples[192];
        assert_eq!(first, 32765);
        assert!((second as i32 - first as i32 / 2).abs() <= 2, "{second}");
        assert!(samples[288] < second);
    }

    #[test]
    fn test_dry_path() {
        let mut harness = Harness::new(StaticDelay::create(10).unwrap());
        harness.set(StaticDelay::LEVEL, 0);
        harness.feed(StaticDelay::INPUT, &[1000, -1000]);
        assert_eq!(harness.run(2), vec![999, -1000]);
    }

    #[test]
    fn test_zero_rec_vol_freezes_line() {
        let mut harness = wet_only(10, 10);
        impulse_response(&mut harness, 1);
        let frozen = harness.module.table().to_vec();
        harness.set(StaticDelay::REC_VOL, 0);
        harness.set(StaticDelay::INPUT, 20000);
        harness.render(256);
        assert_eq!(harness.module.table(), &frozen[..]);
    }

    #[test]
    fn test_delay_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<StaticDelay>();
    }
}
