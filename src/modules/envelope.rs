//! ADSR Envelope module.
//!
//! Shapes an input with an Attack-Decay-Sustain-Release envelope driven by
//! trigger edges. Fundamental for shaping the amplitude of a voice.

use crate::dsp::fixed::SAMPLES_PER_MS;
use crate::dsp::{
    clip, mult_shift, DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort,
    PortDefinition, RenderContext, SignalHint, TriggerDecoder, TriggerEvent, UNITY_GAIN,
};

/// The envelope advances once every `1 << UNDERSAMPLE` samples.
const UNDERSAMPLE: u32 = 5;

/// Envelope phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopePhase {
    /// Idle, output is zero. Left only by a trigger start.
    Off,
    /// Rising from the current level to full scale.
    Attack,
    /// Falling from full scale to the sustain level.
    Decay,
    /// Holding the sustain level. Left only by a trigger edge.
    Sustain,
    /// Falling from the level at the stop edge to zero.
    Release,
}

/// Ramp increment per envelope tick for covering `span` in `time_ms`.
///
/// A zero time is an immediate jump.
fn ramp_rate(time_ms: i16, span: u32) -> u32 {
    if time_ms == 0 {
        return u32::MAX;
    }
    let samples = (time_ms as i32).unsigned_abs() * SAMPLES_PER_MS;
    (span / samples).saturating_mul(1 << UNDERSAMPLE).max(1)
}

/// The envelope state machine, independent of ports.
///
/// The level is a full-range `u32`; the audible level is its top 15 bits.
#[derive(Clone, Debug)]
pub struct AdsrCore {
    phase: EnvelopePhase,
    counter: u32,
    velocity: i16,
    sustain: u32,
    release_from: u32,
    times: [i16; 3],
    attack_rate: u32,
    decay_rate: u32,
    release_rate: u32,
}

impl AdsrCore {
    pub fn new() -> Self {
        Self {
            phase: EnvelopePhase::Off,
            counter: 0,
            velocity: 0,
            sustain: 0,
            release_from: 0,
            // Impossible times force the first update to compute rates.
            times: [i16::MIN; 3],
            attack_rate: 0,
            decay_rate: 0,
            release_rate: 0,
        }
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    /// Current level, 0 to 32767.
    pub fn level(&self) -> i16 {
        (self.counter >> 17) as i16
    }

    pub fn velocity(&self) -> i16 {
        self.velocity
    }

    /// Updates times and sustain level. Rates are only recomputed when a
    /// value actually changes.
    pub fn configure(&mut self, attack_ms: i16, decay_ms: i16, sustain: i16, release_ms: i16) {
        let sustain = (sustain.max(0) as u32) << 17;
        if self.times[0] != attack_ms {
            self.attack_rate = ramp_rate(attack_ms, u32::MAX);
        }
        if self.times[1] != decay_ms || self.sustain != sustain {
            self.decay_rate = ramp_rate(decay_ms, u32::MAX - sustain);
        }
        if self.times[2] != release_ms {
            self.release_rate = ramp_rate(release_ms, self.release_from);
        }
        self.times = [attack_ms, decay_ms, release_ms];
        self.sustain = sustain;
    }

    /// Starts (or restarts) the attack from the current level.
    pub fn start(&mut self, velocity: i16) {
        self.phase = EnvelopePhase::Attack;
        self.velocity = velocity;
    }

    /// Moves to release unless already off.
    pub fn stop(&mut self) {
        if self.phase != EnvelopePhase::Off {
            self.phase = EnvelopePhase::Release;
            self.release_from = self.counter;
            self.release_rate = ramp_rate(self.times[2], self.release_from);
        }
    }

    /// Advances the envelope by one tick.
    pub fn tick(&mut self) {
        match self.phase {
            EnvelopePhase::Off => self.counter = 0,
            EnvelopePhase::Attack => {
                self.counter = self.counter.saturating_add(self.attack_rate);
                if self.counter == u32::MAX {
                    self.phase = EnvelopePhase::Decay;
                }
            }
            EnvelopePhase::Decay => {
                let next = self.counter.saturating_sub(self.decay_rate);
                if next <= self.sustain {
                    self.counter = self.sustain;
                    self.phase = EnvelopePhase::Sustain;
                } else {
                    self.counter = next;
                }
            }
            EnvelopePhase::Sustain => {
                self.counter = self.sustain;
                if self.sustain == 0 {
                    self.phase = EnvelopePhase::Off;
                }
            }
            EnvelopePhase::Release => match self.counter.checked_sub(self.release_rate) {
                Some(next) if next > 0 => self.counter = next,
                _ => {
                    self.counter = 0;
                    self.phase = EnvelopePhase::Off;
                }
            },
        }
    }
}

impl Default for AdsrCore {
    fn default() -> Self {
        Self::new()
    }
}

/// ADSR envelope generator.
///
/// # Ports
///
/// - **Output** (0): input scaled by the envelope.
/// - **Input** (1): signal to shape. Full scale by default, so an unlinked
///   envelope outputs the envelope itself.
/// - **Trigger** (2): a start enters attack with the start's velocity, a
///   stop enters release.
/// - **Attack / Decay** (3, 4): milliseconds.
/// - **Sustain** (5): level, 0 to 32767.
/// - **Release** (6): milliseconds.
/// - **Gain** (7): output gain.
pub struct AdsrEnvelope {
    core: AdsrCore,
    trigger: TriggerDecoder,
}

impl AdsrEnvelope {
    pub const OUT: OutputPort = OutputPort(0);
    pub const INPUT: InputPort = InputPort(1);
    pub const TRIGGER: InputPort = InputPort(2);
    pub const ATTACK: InputPort = InputPort(3);
    pub const DECAY: InputPort = InputPort(4);
    pub const SUSTAIN: InputPort = InputPort(5);
    pub const RELEASE: InputPort = InputPort(6);
    pub const GAIN: InputPort = InputPort(7);

    const PORTS: [PortDefinition; 8] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("input", "Input", SignalHint::Linear, 32767),
        PortDefinition::input("trigger", "Trigger", SignalHint::Trigger, 0),
        PortDefinition::input("attack", "Attack (ms)", SignalHint::Linear, 100),
        PortDefinition::input("decay", "Decay (ms)", SignalHint::Linear, 250),
        PortDefinition::input("sustain", "Sustain", SignalHint::Linear, 16000),
        PortDefinition::input("release", "Release (ms)", SignalHint::Linear, 50),
        PortDefinition::input("gain", "Gain", SignalHint::Gain, UNITY_GAIN),
    ];

    pub fn phase(&self) -> EnvelopePhase {
        self.core.phase()
    }

    /// Envelope amplitude applied to the input.
    fn amplitude(&self, gain: i16) -> i16 {
        let level = clip((self.core.level() as i32 * gain as i32) >> 12);
        mult_shift(level, self.core.velocity())
    }
}

impl DspModule for AdsrEnvelope {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let trigger = ctx.input(Self::TRIGGER);

        // Off with a steady trigger: nothing to do this block.
        if let Some(value) = trigger.constant() {
            if self.core.phase() == EnvelopePhase::Off {
                let mut lookahead = self.trigger;
                if !matches!(lookahead.decode(value), TriggerEvent::Start(_)) {
                    self.trigger = lookahead;
                    ctx.set_output_const(Self::OUT, 0);
                    return;
                }
            }
        }

        self.core.configure(
            ctx.input(Self::ATTACK).first(),
            ctx.input(Self::DECAY).first(),
            ctx.input(Self::SUSTAIN).first(),
            ctx.input(Self::RELEASE).first(),
        );
        let gain = ctx.input(Self::GAIN).first();
        let input = ctx.input(Self::INPUT);
        let steady = trigger.constant().is_some();

        let mut amplitude = self.amplitude(gain);
        for i in 0..ctx.num_samples() {
            if i == 0 || !steady {
                match self.trigger.decode(trigger.get(i)) {
                    TriggerEvent::Start(velocity) => self.core.start(velocity),
                    TriggerEvent::Stop(_) => self.core.stop(),
                    _ => {}
                }
            }
            if i % (1 << UNDERSAMPLE) == 0 {
                self.core.tick();
                amplitude = self.amplitude(gain);
            }
            let out = if amplitude == 0 {
                0
            } else {
                mult_shift(amplitude, input.get(i))
            };
            ctx.set_output(Self::OUT, i, out);
        }
    }
}

impl ModuleKind for AdsrEnvelope {
    const INFO: ModuleInfo = ModuleInfo {
        id: 42,
        name: "env_adsr",
        category: ModuleCategory::Modulation,
        description: "Simple ADSR envelope",
    };

    fn create(_config: u32) -> Option<Self> {
        Some(Self {
            core: AdsrCore::new(),
            trigger: TriggerDecoder::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::Harness;

    fn core(attack: i16, decay: i16, sustain: i16, release: i16) -> AdsrCore {
        let mut core = AdsrCore::new();
        core.configure(attack, decay, sustain, release);
        core
    }

    /// Ticks until the phase changes, returning the number of ticks.
    fn ticks_until_change(core: &mut AdsrCore) -> usize {
        let phase = core.phase();
        let mut ticks = 0;
        while core.phase() == phase {
            core.tick();
            ticks += 1;
            assert!(ticks < 1_000_000, "stuck in {phase:?}");
        }
        ticks
    }

    #[test]
    fn test_adsr_info() {
        let env = AdsrEnvelope::create(0).unwrap();
        assert_eq!(env.info().id, 42);
        assert_eq!(env.ports().len(), 8);
        assert_eq!(env.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_full_cycle() {
        let mut core = core(10, 10, 16000, 10);
        core.start(32767);
        assert_eq!(core.phase(), EnvelopePhase::Attack);

        // 10 ms is 480 samples, 15 ticks.
        let attack = ticks_until_change(&mut core);
        assert!((15..=17).contains(&attack), "attack took {attack} ticks");
        assert_eq!(core.phase(), EnvelopePhase::Decay);
        assert_eq!(core.level(), 32767);

        ticks_until_change(&mut core);
        assert_eq!(core.phase(), EnvelopePhase::Sustain);
        assert_eq!(core.level(), 16000);

        for _ in 0..1000 {
            core.tick();
        }
        assert_eq!(core.phase(), EnvelopePhase::Sustain);

        core.stop();
        assert_eq!(core.phase(), EnvelopePhase::Release);
        let release = ticks_until_change(&mut core);
        assert!((15..=17).contains(&release), "release took {release} ticks");
        assert_eq!(core.phase(), EnvelopePhase::Off);
        assert_eq!(core.level(), 0);
    }

    #[test]
    fn test_stop_during_attack_goes_to_release() {
        let mut core = core(100, 100, 16000, 100);
        core.start(100);
        for _ in 0..10 {
            core.tick();
        }
        let level = core.level();
        assert!(level > 0);
        core.stop();
        assert_eq!(core.phase(), EnvelopePhase::Release);
        core.tick();
        assert!(core.level() < level);
    }

    #[test]
    fn test_stop_during_decay_goes_to_release() {
        let mut core = core(0, 1000, 0, 100);
        core.start(100);
        core.tick();
        assert_eq!(core.phase(), EnvelopePhase::Decay);
        core.tick();
        core.stop();
        assert_eq!(core.phase(), EnvelopePhase::Release);
    }

    #[test]
    fn test_stop_while_off_is_ignored() {
        let mut core = core(10, 10, 10, 10);
        core.stop();
        assert_eq!(core.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_zero_sustain_ends_after_decay() {
        let mut core = core(0, 0, 0, 10);
        core.start(100);
        core.tick();
        core.tick();
        assert_eq!(core.phase(), EnvelopePhase::Sustain);
        core.tick();
        assert_eq!(core.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_idle_output_is_constant_zero() {
        let mut harness = Harness::new(AdsrEnvelope::create(0).unwrap());
        harness.render(64);
        assert_eq!(harness.signal(0).block_constant(), Some(0));
        assert_eq!(harness.module.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_trigger_shapes_input() {
        let mut harness = Harness::new(AdsrEnvelope::create(0).unwrap());
        harness.set(AdsrEnvelope::ATTACK, 1);
        harness.set(AdsrEnvelope::DECAY, 1);
        harness.set(AdsrEnvelope::TRIGGER, 32767);

        let attack = harness.run(64);
        assert!(attack[40] > attack[0]);
        for _ in 0..4 {
            harness.render(64);
        }
        assert_eq!(harness.module.phase(), EnvelopePhase::Sustain);
        let sustain = harness.run(64);
        assert!(sustain.iter().all(|&s| (15900..=16000).contains(&s)));

        harness.set(AdsrEnvelope::INPUT, -32767);
        let inverted = harness.run(64);
        assert!(inverted.iter().all(|&s| s < -15000));
    }

    #[test]
    fn test_streamed_trigger_edges() {
        let mut harness = Harness::new(AdsrEnvelope::create(0).unwrap());
        harness.set(AdsrEnvelope::ATTACK, 0);
        harness.set(AdsrEnvelope::RELEASE, 0);
        let mut trigger = vec![0i16; 128];
        trigger[0..64].fill(1000);
        trigger[64..128].fill(-1000);
        harness.feed(AdsrEnvelope::TRIGGER, &trigger);

        let block = harness.run(128);
        assert!(block[10] > 0);
        assert_eq!(block[127], 0);
        assert_eq!(harness.module.phase(), EnvelopePhase::Off);
    }
}
