//! Trigger signal encoding.
//!
//! A trigger channel is an ordinary 16-bit signal whose edges carry note
//! events. Zero means rest, a jump to a positive value starts a note with that
//! velocity, a jump to a negative value stops it. A value that repeats the
//! previous sample is a held note and carries no event.

/// Event decoded from one sample of a trigger channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    /// Channel is at zero.
    Rest,
    /// A note starts with the given velocity (1..=32767).
    Start(i16),
    /// The previous nonzero value is unchanged.
    Held,
    /// The note stops; carries the magnitude of the stop edge.
    Stop(i16),
}

impl TriggerEvent {
    /// Returns true for `Start` and `Stop`.
    pub fn is_edge(&self) -> bool {
        matches!(self, TriggerEvent::Start(_) | TriggerEvent::Stop(_))
    }
}

/// Per-port edge detector.
///
/// Cheap to copy, which lets a module look ahead with a scratch decoder
/// without disturbing its own state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerDecoder {
    previous: i16,
}

impl TriggerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one sample and remembers it.
    #[inline]
    pub fn decode(&mut self, value: i16) -> TriggerEvent {
        let previous = self.previous;
        self.previous = value;

        if value == 0 {
            TriggerEvent::Rest
        } else if value == previous {
            TriggerEvent::Held
        } else if value > 0 {
            TriggerEvent::Start(value)
        } else {
            TriggerEvent::Stop(value.checked_neg().unwrap_or(i16::MAX))
        }
    }

    /// Returns the last decoded value.
    pub fn previous(&self) -> i16 {
        self.previous
    }
}

/// Produces trigger edges for an output port or a control-plane value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerEncoder {
    value: i16,
}

impl TriggerEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value that starts a note with `velocity`.
    ///
    /// The magnitude is forced into `1..=32767`. If the result would equal the
    /// current value (a retrigger at the same velocity) it is nudged by one so
    /// downstream decoders still see an edge.
    pub fn start(&mut self, velocity: i16) -> i16 {
        let mut value = velocity.checked_abs().unwrap_or(i16::MAX).max(1);
        if value == self.value {
            value = if value == i16::MAX { value - 1 } else { value + 1 };
        }
        self.value = value;
        value
    }

    /// Returns the value that stops the current note.
    ///
    /// Stopping twice yields the same value, which decodes as held rather than
    /// a second stop.
    pub fn stop(&mut self) -> i16 {
        if self.value > 0 {
            self.value = -self.value;
        } else if self.value == 0 {
            self.value = -1;
        }
        self.value
    }

    /// Returns the channel to rest.
    pub fn rest(&mut self) -> i16 {
        self.value = 0;
        0
    }

    /// Current value of the channel.
    pub fn value(&self) -> i16 {
        self.value
    }
}
