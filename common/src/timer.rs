/// Source of a free-running tick counter (typically milliseconds since boot)
/// that wraps back to zero after reaching its maximum value.
pub trait TickSource {
    fn now_ticks(&self) -> u32;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now_ticks(&self) -> u32 {
        (**self).now_ticks()
    }
}

/// Ticks elapsed between `start` and `now` on a counter that wraps after `max`.
///
/// A `now` smaller than `start` means the counter rolled over exactly once
/// since `start` was sampled.
pub fn elapsed_ticks(start: u32, now: u32, max: u32) -> u64 {
    if now >= start {
        u64::from(now - start)
    } else {
        u64::from(max.saturating_sub(start)) + u64::from(now) + 1
    }
}

#[derive(Debug, Clone)]
pub struct MonotonicTimer<S> {
    source: S,
    max: u32,
}

impl<S: TickSource> MonotonicTimer<S> {
    pub fn new(source: S) -> Self {
        Self::with_max(source, u32::MAX)
    }

    pub fn with_max(source: S, max: u32) -> Self {
        Self { source, max }
    }

    pub fn now(&self) -> u32 {
        self.source.now_ticks()
    }

    pub fn elapsed_since(&self, start: u32) -> u64 {
        elapsed_ticks(start, self.now(), self.max)
    }

    pub fn has_elapsed(&self, start: u32, duration: u32) -> bool {
        self.elapsed_since(start) >= u64::from(duration)
    }

    /// Polls `done` until it returns true or `timeout` ticks pass, calling
    /// `idle` between polls. Returns whether `done` flipped in time.
    pub fn wait_until(
        &self,
        timeout: u32,
        mut done: impl FnMut() -> bool,
        mut idle: impl FnMut(),
    ) -> bool {
        let start = self.now();
        loop {
            if done() {
                return true;
            }
            if self.has_elapsed(start, timeout) {
                return false;
            }
            idle();
        }
    }

    /// Measures how long `pressed` stays true, giving up once `limit` ticks
    /// are reached.
    pub fn hold_duration(
        &self,
        limit: u32,
        mut pressed: impl FnMut() -> bool,
        mut idle: impl FnMut(),
    ) -> u64 {
        let start = self.now();
        while pressed() {
            let elapsed = self.elapsed_since(start);
            if elapsed >= u64::from(limit) {
                return elapsed;
            }
            idle();
        }
        self.elapsed_since(start)
    }
}

/// Hand-driven tick source for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTicks {
    now: std::cell::Cell<u32>,
}

impl ManualTicks {
    pub fn starting_at(tick: u32) -> Self {
        Self {
            now: std::cell::Cell::new(tick),
        }
    }

    pub fn set(&self, tick: u32) {
        self.now.set(tick);
    }

    pub fn advance(&self, ticks: u32) {
        self.now.set(self.now.get().wrapping_add(ticks));
    }
}

impl TickSource for ManualTicks {
    fn now_ticks(&self) -> u32 {
        self.now.get()
    }
}
