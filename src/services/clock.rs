//! Time source

use chrono::{Local, NaiveDateTime, TimeZone};
use std::time::SystemTime;

/// Supplies the wall-clock time of the run.
pub trait Clock: Send + Sync {
    /// Local time, used to stamp archive names
    fn now_local(&self) -> NaiveDateTime;

    /// Absolute time, compared against file modification times
    fn now_system(&self) -> SystemTime;
}

/// The host clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    local: NaiveDateTime,
    system: SystemTime,
}

impl FixedClock {
    /// Freeze at a local time; the absolute time is derived from it
    pub fn at(local: NaiveDateTime) -> Self {
        let system = Local
            .from_local_datetime(&local)
            .earliest()
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);
        Self { local, system }
    }
}

impl Clock for FixedClock {
    fn now_local(&self) -> NaiveDateTime {
        self.local
    }

    fn now_system(&self) -> SystemTime {
        self.system
    }
}
