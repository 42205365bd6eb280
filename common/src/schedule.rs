use std::fmt;

use log::{info, warn};
use thiserror::Error;

use crate::{
    clock::{UtcTime, WallClock},
    settings::{ConfigStore, NvMedium},
    types::ConnectivityMode,
};

/// Clock time encoded as `hour * 100 + minute` (0..=2359).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockTimeError {
    #[error("expected HH:MM, got `{0}`")]
    Format(String),
    #[error("{hour:02}:{minute:02} is not a valid time of day")]
    OutOfRange { hour: u32, minute: u32 },
}

impl ClockTime {
    pub const MIDNIGHT: Self = Self(0);

    /// Compile-time constructor; panics on an invalid encoding.
    pub const fn fixed(encoded: u16) -> Self {
        assert!(encoded / 100 < 24 && encoded % 100 < 60, "invalid clock time");
        Self(encoded)
    }

    pub fn from_encoded(encoded: u16) -> Option<Self> {
        (encoded / 100 < 24 && encoded % 100 < 60).then_some(Self(encoded))
    }

    pub fn from_hm(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self(u16::from(hour) * 100 + u16::from(minute)))
    }

    /// Parses the `HH:MM` value submitted by an HTML time input.
    pub fn parse(value: &str) -> Result<Self, ClockTimeError> {
        let format_err = || ClockTimeError::Format(value.to_string());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(format_err)?;
        let hour: u32 = hour.parse().map_err(|_| format_err())?;
        let minute: u32 = minute.parse().map_err(|_| format_err())?;

        if hour >= 24 || minute >= 60 {
            return Err(ClockTimeError::OutOfRange { hour, minute });
        }
        Ok(Self((hour * 100 + minute) as u16))
    }

    pub fn encoded(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 100) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 100) as u8
    }

    pub fn to_12h_string(self) -> String {
        let (hour, suffix) = match self.hour() {
            0 => (12, "AM"),
            h @ 1..=11 => (h, "AM"),
            12 => (12, "PM"),
            h => (h - 12, "PM"),
        };
        format!("{hour}:{:02} {suffix}", self.minute())
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Whether `now` falls inside the daily window that opens at `on` and
/// closes at `off`. The opening minute is inside the window, the closing
/// minute is not, and a window with `on == off` is empty.
pub fn in_on_zone(now: ClockTime, on: ClockTime, off: ClockTime) -> bool {
    if on < off {
        now >= on && now < off
    } else if on > off {
        now >= on || now < off
    } else {
        false
    }
}

/// Shifts a UTC time into local time using a whole-hour offset plus one
/// hour when DST is in effect.
pub fn localize(utc: UtcTime, tz_offset: i32, dst: bool) -> ClockTime {
    let hour = (i32::from(utc.hour()) + tz_offset + i32::from(dst)).rem_euclid(24);
    ClockTime(hour as u16 * 100 + u16::from(utc.minute()))
}

/// Remembers the last evaluated time so the output is only switched when
/// zone membership actually changes.
#[derive(Debug, Clone, Default)]
pub struct ScheduleEvaluator {
    last_evaluated: Option<ClockTime>,
}

impl ScheduleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_evaluated(&self) -> Option<ClockTime> {
        self.last_evaluated
    }

    pub fn reset(&mut self) {
        self.last_evaluated = None;
    }

    /// Returns `Some(energize)` on the first evaluation and whenever `now`
    /// lands in a different zone than the previous evaluation.
    pub fn evaluate(&mut self, now: ClockTime, on: ClockTime, off: ClockTime) -> Option<bool> {
        let current = in_on_zone(now, on, off);
        let previous = self.last_evaluated.replace(now);

        match previous {
            Some(previous) if in_on_zone(previous, on, off) == current => None,
            _ => Some(current),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Timer disabled, not on a network, or time unknown.
    Idle,
    Unchanged,
    Switched { on: bool, persisted: bool },
}

/// One scheduling step of the main loop.
#[derive(Debug, Clone, Default)]
pub struct TimerTask {
    evaluator: ScheduleEvaluator,
}

impl TimerTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluator(&self) -> &ScheduleEvaluator {
        &self.evaluator
    }

    pub fn tick<M: NvMedium>(
        &mut self,
        store: &mut ConfigStore<M>,
        mode: ConnectivityMode,
        clock: &impl WallClock,
    ) -> TimerOutcome {
        if !store.is_timer_on() {
            self.evaluator.reset();
            return TimerOutcome::Idle;
        }
        if mode != ConnectivityMode::Station {
            return TimerOutcome::Idle;
        }
        let Some(utc) = clock.utc_now() else {
            return TimerOutcome::Idle;
        };

        let now = localize(utc, store.tz_offset(), store.is_dst());
        let Some(on) = self.evaluator.evaluate(now, store.on_time(), store.off_time()) else {
            return TimerOutcome::Unchanged;
        };

        store.set_lights_on(on);
        let persisted = store.save();
        if persisted {
            info!("schedule switched lights {} at {now}", if on { "on" } else { "off" });
        } else {
            warn!("schedule switched lights at {now} but the new state was not persisted");
        }
        TimerOutcome::Switched { on, persisted }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::settings::MemoryMedium;

    fn t(encoded: u16) -> ClockTime {
        ClockTime::from_encoded(encoded).unwrap()
    }

    struct FixedClock(Cell<Option<UtcTime>>);

    impl FixedClock {
        fn at(hour: u8, minute: u8) -> Self {
            Self(Cell::new(UtcTime::new(hour, minute)))
        }

        fn set(&self, hour: u8, minute: u8) {
            self.0.set(UtcTime::new(hour, minute));
        }
    }

    impl WallClock for FixedClock {
        fn utc_now(&self) -> Option<UtcTime> {
            self.0.get()
        }
    }

    fn timer_store(on: u16, off: u16) -> ConfigStore<MemoryMedium> {
        let mut store = ConfigStore::new(MemoryMedium::default());
        store.set_timer_on(true);
        store.set_on_time(t(on));
        store.set_off_time(t(off));
        assert!(store.save());
        store
    }

    #[test]
    fn plain_window_includes_on_and_excludes_off() {
        let (on, off) = (t(900), t(1700));
        assert!(in_on_zone(t(1000), on, off));
        assert!(!in_on_zone(t(800), on, off));
        assert!(!in_on_zone(t(1700), on, off));
        assert!(in_on_zone(t(900), on, off));
    }

    #[test]
    fn window_across_midnight_uses_same_boundaries() {
        let (on, off) = (t(2200), t(600));
        assert!(in_on_zone(t(2300), on, off));
        assert!(in_on_zone(t(500), on, off));
        assert!(!in_on_zone(t(700), on, off));
        assert!(in_on_zone(t(2200), on, off));
        assert!(!in_on_zone(t(600), on, off));
        assert!(in_on_zone(t(0), on, off));
    }

    #[test]
    fn equal_on_and_off_is_never_on() {
        for now in [0, 1200, 1230, 2359] {
            assert!(!in_on_zone(t(now), t(1230), t(1230)));
        }
    }

    #[test]
    fn localize_applies_offset_and_dst() {
        let utc = UtcTime::new(23, 10).unwrap();
        assert_eq!(localize(utc, -6, false), t(1710));
        assert_eq!(localize(utc, -6, true), t(1810));
        assert_eq!(localize(utc, 2, false), t(110));

        let early = UtcTime::new(1, 5).unwrap();
        assert_eq!(localize(early, -12, false), t(1305));
        assert_eq!(localize(early, 14, true), t(1605));
    }

    #[test]
    fn localized_times_are_always_valid_clock_times() {
        for (hour, minute) in [(0, 0), (0, 59), (12, 30), (23, 59)] {
            let utc = UtcTime::new(hour, minute).unwrap();
            for offset in [-12, -1, 0, 5, 14] {
                let local = localize(utc, offset, true);
                assert_eq!(ClockTime::from_encoded(local.encoded()), Some(local));
                assert_eq!(local.minute(), minute);
            }
        }
    }

    #[test]
    fn parses_and_formats_clock_times() {
        assert_eq!(ClockTime::parse("07:05"), Ok(t(705)));
        assert_eq!(ClockTime::parse("23:59"), Ok(t(2359)));
        assert_eq!(
            ClockTime::parse("24:00"),
            Err(ClockTimeError::OutOfRange {
                hour: 24,
                minute: 0
            })
        );
        assert!(matches!(
            ClockTime::parse("1700"),
            Err(ClockTimeError::Format(_))
        ));
        assert_eq!(ClockTime::from_encoded(1260), None);

        assert_eq!(t(5).to_string(), "00:05");
        assert_eq!(t(1700).to_string(), "17:00");
    }

    #[test]
    fn twelve_hour_format_handles_noon_and_midnight() {
        assert_eq!(t(1700).to_12h_string(), "5:00 PM");
        assert_eq!(t(1205).to_12h_string(), "12:05 PM");
        assert_eq!(t(7).to_12h_string(), "12:07 AM");
        assert_eq!(t(930).to_12h_string(), "9:30 AM");
    }

    #[test]
    fn evaluator_reports_only_transitions() {
        let mut evaluator = ScheduleEvaluator::new();
        let (on, off) = (t(2200), t(600));

        assert_eq!(evaluator.evaluate(t(2100), on, off), Some(false));
        assert_eq!(evaluator.evaluate(t(2130), on, off), None);
        assert_eq!(evaluator.evaluate(t(2200), on, off), Some(true));
        assert_eq!(evaluator.evaluate(t(0), on, off), None);
        assert_eq!(evaluator.evaluate(t(559), on, off), None);
        assert_eq!(evaluator.evaluate(t(600), on, off), Some(false));
        assert_eq!(evaluator.last_evaluated(), Some(t(600)));
    }

    #[test]
    fn timer_task_writes_once_per_boundary() {
        let mut store = timer_store(900, 1700);
        let writes_before = store.medium().writes();
        let clock = FixedClock::at(8, 0);
        let mut task = TimerTask::new();

        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Switched {
                on: false,
                persisted: true
            }
        );
        for minute in [10, 20, 59] {
            clock.set(8, minute);
            assert_eq!(
                task.tick(&mut store, ConnectivityMode::Station, &clock),
                TimerOutcome::Unchanged
            );
        }
        assert_eq!(store.medium().writes(), writes_before + 1);

        clock.set(9, 0);
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Switched {
                on: true,
                persisted: true
            }
        );
        clock.set(9, 1);
        task.tick(&mut store, ConnectivityMode::Station, &clock);

        assert!(store.is_lights_on());
        assert_eq!(store.medium().writes(), writes_before + 2);
    }

    #[test]
    fn timer_task_applies_timezone() {
        let mut store = timer_store(1700, 2200);
        assert!(store.set_tz_offset(-6));
        let clock = FixedClock::at(23, 10);
        let mut task = TimerTask::new();

        task.tick(&mut store, ConnectivityMode::Station, &clock);

        assert!(store.is_lights_on());
        assert_eq!(task.evaluator().last_evaluated(), Some(t(1710)));
    }

    #[test]
    fn timer_task_idles_without_time_network_or_timer() {
        let mut store = timer_store(900, 1700);
        let mut task = TimerTask::new();

        let unsynced = FixedClock(Cell::new(None));
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &unsynced),
            TimerOutcome::Idle
        );

        let clock = FixedClock::at(10, 0);
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::AccessPoint, &clock),
            TimerOutcome::Idle
        );

        store.set_timer_on(false);
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Idle
        );
        assert!(!store.is_lights_on());
    }

    #[test]
    fn reenabling_timer_forces_a_fresh_decision() {
        let mut store = timer_store(900, 1700);
        let clock = FixedClock::at(10, 0);
        let mut task = TimerTask::new();

        task.tick(&mut store, ConnectivityMode::Station, &clock);
        assert!(store.is_lights_on());

        // Manual override while the timer is off.
        store.set_timer_on(false);
        task.tick(&mut store, ConnectivityMode::Station, &clock);
        store.set_lights_on(false);

        store.set_timer_on(true);
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Switched {
                on: true,
                persisted: true
            }
        );
    }

    #[test]
    fn failed_write_is_reported_not_retried() {
        let mut store = timer_store(900, 1700);
        store.medium_mut().fail_writes(true);
        let clock = FixedClock::at(12, 0);
        let mut task = TimerTask::new();

        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Switched {
                on: true,
                persisted: false
            }
        );
        assert_eq!(
            task.tick(&mut store, ConnectivityMode::Station, &clock),
            TimerOutcome::Unchanged
        );
        assert!(store.is_lights_on());
    }
}
