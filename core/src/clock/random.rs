//! Randomness for statclock jitter.
//!
//! The statclock period is randomized so that code running in lock step
//! with the hardclock cannot hide from the profiler. Statistical quality is
//! all that matters here; this is not an entropy source.

/// Source of 32-bit values for statclock jitter
pub trait StatRandom {
    /// Next value
    fn next_u32(&mut self) -> u32;
}

/// Marsaglia xorshift generator
#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    /// Generator from `seed`; zero (a fixed point) is replaced
    pub const fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9e37_79b9 } else { seed },
        }
    }

    /// Seed from a counter reading
    pub const fn from_counter(counter: u64) -> Self {
        Self::new((counter ^ (counter >> 32)) as u32)
    }
}

impl StatRandom for XorShift32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

impl<F: FnMut() -> u32> StatRandom for F {
    fn next_u32(&mut self) -> u32 {
        self()
    }
}
