const PROGRESS_EVERY: u64 = 100;

/// Picks every Nth frame for submission.
///
/// The counter only moves forward; a frame is selected when the count
/// after incrementing is a multiple of the interval.
pub struct FrameSampler {
    interval: u64,
    counter: u64,
}

impl FrameSampler {
    /// `interval` is clamped to at least 1 (every frame).
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
        }
    }

    /// Record one read frame. Returns `Some(count)` if it should be submitted.
    pub fn tick(&mut self) -> Option<u64> {
        self.counter += 1;
        (self.counter % self.interval == 0).then_some(self.counter)
    }

    pub fn frames_seen(&self) -> u64 {
        self.counter
    }

    /// True on every 100th frame, sampled or not.
    pub fn at_progress_mark(&self) -> bool {
        self.counter > 0 && self.counter % PROGRESS_EVERY == 0
    }
}
