/// Application time source, advanced once per frame by the driver.
///
/// Layers and scene nodes receive the clock's reading as their `time`
/// argument; the clock itself never reads the wall clock.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    pub time_seconds: f64,
    frames: u64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
        self.frames = 0;
    }

    /// Moves the clock forward by `delta` seconds and counts one frame.
    /// Negative steps never take the clock below zero.
    pub fn advance(&mut self, delta: f64) -> f64 {
        self.time_seconds = (self.time_seconds + delta).max(0.0);
        self.frames += 1;
        self.time_seconds
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
