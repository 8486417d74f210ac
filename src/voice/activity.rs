/// Barge-in detector.
///
/// Raw comparison of the input level against a threshold, gated on playback
/// being active. No hysteresis.
#[derive(Debug, Clone)]
pub struct VoiceActivityMonitor {
    threshold: f32,
    last_level: f32,
}

impl VoiceActivityMonitor {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_level: 0.0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn last_level(&self) -> f32 {
        self.last_level
    }

    /// Record one sampling tick. True when the caller must cut playback and
    /// send an interrupt.
    pub fn observe(&mut self, level: f32, playback_active: bool) -> bool {
        self.last_level = level;
        playback_active && level > self.threshold
    }
}

impl Default for VoiceActivityMonitor {
    fn default() -> Self {
        Self::new(10.0)
    }
}
