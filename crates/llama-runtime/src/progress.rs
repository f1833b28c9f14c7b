//! Integer-percent throttle for load progress fan-out.

/// Drops intermediate progress updates that do not advance the integer percent.
///
/// Values strictly inside `(0, 1)` pass only when `floor(p * 100)` moves past the
/// last broadcast percent. Everything else (0.0, 1.0, out-of-range values) always
/// passes.
#[derive(Debug, Clone, Default)]
pub struct ProgressThrottle {
    last_percent: i32,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `progress` should be broadcast.
    pub fn admit(&mut self, progress: f32) -> bool {
        if progress > 0.0 && progress < 1.0 {
            let percent = (progress * 100.0).floor() as i32;
            if percent < self.last_percent + 1 {
                return false;
            }
            self.last_percent = percent;
        }
        true
    }

    /// Last integer percent that passed.
    pub fn last_percent(&self) -> i32 {
        self.last_percent
    }
}
