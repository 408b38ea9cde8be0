//! Noise Burst module.
//!
//! Emits white noise for a fixed time after each trigger start.

use crate::dsp::fixed::ms_to_samples;
use crate::dsp::random::Xorshift32;
use crate::dsp::{
    DspModule, InputPort, ModuleCategory, ModuleInfo, ModuleKind, OutputPort, PortDefinition,
    RenderContext, SignalHint, TriggerDecoder, TriggerEvent,
};

/// Trigger-gated noise.
///
/// # Ports
///
/// - **Output** (0)
/// - **Trigger** (1): a start begins a burst, a stop cuts it short.
/// - **Length** (2): burst length in milliseconds. A negative length bursts
///   for its magnitude and then holds the last noise value instead of
///   returning to zero.
pub struct NoiseBurst {
    rng: Xorshift32,
    trigger: TriggerDecoder,
    counter: u32,
    limit: u32,
    hold: bool,
    last_out: i16,
}

impl NoiseBurst {
    pub const OUT: OutputPort = OutputPort(0);
    pub const TRIGGER: InputPort = InputPort(1);
    pub const LENGTH: InputPort = InputPort(2);

    const PORTS: [PortDefinition; 3] = [
        PortDefinition::output("output", "Output", SignalHint::Linear),
        PortDefinition::input("trigger", "Trigger", SignalHint::Trigger, 0),
        PortDefinition::input("length", "Length (ms)", SignalHint::Linear, 100),
    ];

    fn running(&self) -> bool {
        self.counter < self.limit
    }

    fn start(&mut self, length_ms: i16) {
        self.counter = 0;
        self.hold = length_ms <= 0;
        self.limit = match length_ms {
            0 => 1,
            ms => ms_to_samples((ms as i32).abs()),
        };
    }
}

impl DspModule for NoiseBurst {
    fn info(&self) -> &ModuleInfo {
        &Self::INFO
    }

    fn ports(&self) -> &[PortDefinition] {
        &Self::PORTS
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let trigger = ctx.input(Self::TRIGGER);
        let length = ctx.input(Self::LENGTH);

        // Idle block with no edge: one constant.
        if let Some(value) = trigger.constant() {
            let mut lookahead = self.trigger;
            let event = lookahead.decode(value);
            if matches!(event, TriggerEvent::Stop(_))
                || (!event.is_edge() && !self.running())
            {
                self.trigger = lookahead;
                self.counter = self.limit;
                if !self.hold {
                    self.last_out = 0;
                }
                ctx.set_output_const(Self::OUT, self.last_out);
                return;
            }
        }

        let mut out = self.last_out;
        for i in 0..ctx.num_samples() {
            match self.trigger.decode(trigger.get(i)) {
                TriggerEvent::Start(_) => self.start(length.get(i)),
                TriggerEvent::Stop(_) => self.counter = self.limit,
                _ => {}
            }
            if self.running() {
                out = self.rng.next_sample();
                self.counter += 1;
            } else if !self.hold {
                out = 0;
            }
            ctx.set_output(Self::OUT, i, out);
        }
        self.last_out = out;
    }
}

impl ModuleKind for NoiseBurst {
    const INFO: ModuleInfo = ModuleInfo {
        id: 7,
        name: "noise_burst",
        category: ModuleCategory::Source,
        description: "Outputs flat noise upon trigger input for an amount of milliseconds",
    };

    fn create(config: u32) -> Option<Self> {
        Some(Self {
            rng: Xorshift32::new(0x9e37_79b9 ^ config),
            trigger: TriggerDecoder::new(),
            counter: 0,
            limit: 0,
            hold: false,
            last_out: 0,
        })
    }
}
