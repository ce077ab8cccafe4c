/*
 * Wall-clock access for generation naming and log file names. Injected through
 * `ClockOperations` so runs can be replayed on fixed dates in tests.
 */
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

pub const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month padding:zero]-[day padding:zero]");
pub const TIME_SUFFIX_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour padding:zero][minute padding:zero][second padding:zero]");
pub const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]/[month padding:zero]/[day padding:zero] [hour padding:zero]:[minute padding:zero]:[second padding:zero]"
);

pub trait ClockOperations: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

// Formats with a fixed layout; formatting can only fail on I/O, which strings never do.
pub fn format_with(moment: OffsetDateTime, layout: &[FormatItem<'static>]) -> String {
    moment.format(layout).unwrap_or_default()
}

pub fn date_stamp(clock: &dyn ClockOperations) -> String {
    format_with(clock.now(), DATE_FORMAT)
}

pub struct SystemClock {}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {}
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockOperations for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
pub use fixed::FixedClock;

#[cfg(test)]
mod fixed {
    use super::*;
    use std::sync::Mutex;
    use time::Duration;

    pub struct FixedClock {
        now: Mutex<OffsetDateTime>,
    }

    impl FixedClock {
        pub fn at(now: OffsetDateTime) -> Self {
            FixedClock {
                now: Mutex::new(now),
            }
        }

        pub fn advance_days(&self, days: i64) {
            let mut now = self.now.lock().unwrap();
            *now += Duration::days(days);
        }
    }

    impl ClockOperations for FixedClock {
        fn now(&self) -> OffsetDateTime {
            *self.now.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_date_stamp_uses_iso_layout() {
        let clock = FixedClock::at(datetime!(2024-01-01 03:04:05 UTC));
        assert_eq!(date_stamp(&clock), "2024-01-01");
        assert_eq!(format_with(clock.now(), TIME_SUFFIX_FORMAT), "030405");

        clock.advance_days(31);
        assert_eq!(date_stamp(&clock), "2024-02-01");
    }
}
