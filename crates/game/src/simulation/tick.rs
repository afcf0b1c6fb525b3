/// Splits variable frame deltas into fixed simulation steps.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    /// Longest frame delta accepted in one call. Anything beyond is dropped
    /// instead of replayed.
    pub const MAX_FRAME: f32 = 0.25;

    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.clamp(0.0, Self::MAX_FRAME);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// Monotonic game time in seconds, advanced only by simulation ticks.
/// Connection deadlines and peer timeouts compare against it.
#[derive(Debug, Clone, Default)]
pub struct GameClock {
    now: f64,
    tick: u64,
    frame_time: f32,
}

impl GameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, dt: f32) {
        self.now += dt as f64;
        self.frame_time = dt;
        self.tick += 1;
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Length of the last tick.
    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(60);

        ts.accumulate(1.0 / 30.0);
        assert!(ts.should_tick());
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());
    }

    #[test]
    fn long_frames_are_capped() {
        let mut ts = FixedTimestep::new(10);
        ts.accumulate(5.0);
        let mut ticks = 0;
        while ts.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 2);
    }

    #[test]
    fn clock_follows_consumed_ticks() {
        let mut ts = FixedTimestep::new(60);
        let mut clock = GameClock::new();

        ts.accumulate(1.0 / 30.0);
        while ts.consume_tick() {
            clock.advance(ts.dt());
        }

        assert_eq!(clock.tick(), 2);
        assert!((clock.now() - 2.0 / 60.0).abs() < 1e-6);
        assert!((clock.frame_time() - 1.0 / 60.0).abs() < 1e-6);
    }
}
