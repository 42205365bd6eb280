use chrono::{DateTime, Datelike, Timelike, Utc};

/// Hour and minute of the current UTC wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcTime {
    hour: u8,
    minute: u8,
}

impl UtcTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn from_datetime(now: DateTime<Utc>) -> Self {
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }
}

/// Wall-clock source. `None` means the time is not known yet (for example
/// SNTP has not synced).
pub trait WallClock {
    fn utc_now(&self) -> Option<UtcTime>;
}

/// System clock that only reports a time once it has been set to something
/// past `min_year`. An unsynced RTC starts at 1970.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    min_year: i32,
}

impl SystemClock {
    pub const fn new(min_year: i32) -> Self {
        Self { min_year }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(2024)
    }
}

impl WallClock for SystemClock {
    fn utc_now(&self) -> Option<UtcTime> {
        let now = Utc::now();
        (now.year() >= self.min_year).then(|| UtcTime::from_datetime(now))
    }
}
