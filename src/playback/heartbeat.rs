/// Decides when a playing session is due for a durable checkpoint.
///
/// Tracks the playback position of the last checkpoint (the baseline) and
/// fires once the position has moved `interval_millis` past it.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    baseline: u64,
    interval_millis: u64,
}

impl Heartbeat {
    pub fn new(interval_millis: u64) -> Self {
        Self {
            baseline: 0,
            interval_millis,
        }
    }

    /// Move the baseline, e.g. to the start position of a newly loaded episode
    pub fn reset(&mut self, position_millis: u64) {
        self.baseline = position_millis;
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    /// Returns `true` when a checkpoint is due at `position_millis`.
    ///
    /// The baseline advances to `position_millis` whenever it fires.
    pub fn observe(&mut self, position_millis: u64) -> bool {
        if position_millis.saturating_sub(self.baseline) >= self.interval_millis {
            self.baseline = position_millis;
            true
        } else {
            false
        }
    }
}
