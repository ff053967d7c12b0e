use tokio::time::Instant;

/// Frames-per-second over fixed-size windows of frames. The figure only
/// changes once a window closes, which keeps it steady enough to display.
pub struct FrameRateMeter {
    window: u32,
    count: u32,
    window_start: Instant,
    current: Option<f64>,
}

impl FrameRateMeter {
    pub fn new(window: u32, now: Instant) -> Self {
        Self {
            window: window.max(1),
            count: 0,
            window_start: now,
            current: None,
        }
    }

    /// Counts one frame. Returns the fresh rate when this frame closes a
    /// window.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        if self.count < self.window {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        let rate = if elapsed > 0.0 {
            f64::from(self.count) / elapsed
        } else {
            f64::INFINITY
        };
        self.count = 0;
        self.window_start = now;
        self.current = Some(rate);
        self.current
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }
}
