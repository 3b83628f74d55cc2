//! Timestamp newtype and time-of-day windows
use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Copy for TimeStamp<Utc> {}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn offset(&self, delta: TimeDelta) -> Self {
        Self(self.0 + delta)
    }
    /// Calendar date, used as the rollover key for daily counters.
    pub fn day(&self) -> NaiveDate {
        self.0.date_naive()
    }
    pub fn minute_of_day(&self) -> u16 {
        (self.0.hour() * 60 + self.0.minute()) as u16
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Per-user do-not-disturb window in minutes since midnight.
///
/// The window is half-open `[start, end)`. A window whose start is later
/// than its end wraps across midnight (22:00-06:00 covers 23:00 and 05:00
/// but not 12:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: u16,
    pub end: u16,
}

impl QuietHours {
    pub fn new(start_hour: u16, start_min: u16, end_hour: u16, end_min: u16) -> Self {
        Self {
            start: start_hour * 60 + start_min,
            end: end_hour * 60 + end_min,
        }
    }

    pub fn contains(&self, minute_of_day: u16) -> bool {
        if self.start <= self.end {
            self.start <= minute_of_day && minute_of_day < self.end
        } else {
            minute_of_day >= self.start || minute_of_day < self.end
        }
    }
}
