//! Xorshift noise source shared by the generators.

/// 32-bit xorshift generator. Never yields a zero state.
#[derive(Clone, Copy, Debug)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    pub fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Returns a uniformly distributed sample in `[-32767, 32767]`.
    #[inline]
    pub fn next_sample(&mut self) -> i16 {
        loop {
            let value = (self.next_u32() >> 16) as u16 as i16;
            if value != i16::MIN {
                return value;
            }
        }
    }
}

impl Default for Xorshift32 {
    fn default() -> Self {
        Self::new(0x2545_f491)
    }
}
