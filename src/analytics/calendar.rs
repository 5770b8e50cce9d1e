//! Calendar context used to bucket views by weekday.
//!
//! Weekday numbers run 1..=7 starting at the calendar's first day of the
//! week. The context is passed in explicitly. Its time zone resolves the
//! offset per timestamp, so daylight-saving changes land on the right day.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, FixedOffset, Local, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar<Tz: TimeZone = Utc> {
    zone: Tz,
    first_weekday: Weekday,
}

impl<Tz: TimeZone> Calendar<Tz> {
    pub fn new(zone: Tz, first_weekday: Weekday) -> Self {
        Self {
            zone,
            first_weekday,
        }
    }

    /// Gregorian week starting on Sunday (Sunday = 1, Saturday = 7).
    pub fn gregorian(zone: Tz) -> Self {
        Self::new(zone, Weekday::Sun)
    }

    pub fn zone(&self) -> &Tz {
        &self.zone
    }

    pub fn first_weekday(&self) -> Weekday {
        self.first_weekday
    }

    pub fn weekday_number(&self, timestamp: &DateTime<Utc>) -> u8 {
        let weekday = timestamp.with_timezone(&self.zone).weekday();
        let shifted = (weekday.num_days_from_monday() + 7
            - self.first_weekday.num_days_from_monday())
            % 7;
        // shifted < 7
        shifted as u8 + 1
    }
}

impl Calendar<Utc> {
    pub fn utc() -> Self {
        Self::gregorian(Utc)
    }
}

impl Calendar<Local> {
    /// The machine's time zone, including its daylight-saving rules.
    pub fn local() -> Self {
        Self::gregorian(Local)
    }
}

impl Calendar<FixedOffset> {
    /// A zone that never changes offset.
    pub fn fixed(offset: FixedOffset) -> Self {
        Self::gregorian(offset)
    }
}

impl Default for Calendar<Utc> {
    fn default() -> Self {
        Self::utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayBucket {
    pub weekday: u8,
    pub count: u64,
}

/// Count timestamps per weekday. Buckets are sorted by weekday number and
/// empty weekdays are left out.
pub fn bucket_by_weekday<'a, I, Tz>(timestamps: I, calendar: &Calendar<Tz>) -> Vec<WeekdayBucket>
where
    I: IntoIterator<Item = &'a DateTime<Utc>>,
    Tz: TimeZone,
{
    let mut counts: BTreeMap<u8, u64> = BTreeMap::new();
    for timestamp in timestamps {
        *counts.entry(calendar.weekday_number(timestamp)).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(weekday, count)| WeekdayBucket { weekday, count })
        .collect()
}
