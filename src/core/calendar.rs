//! Business calendar: working days, working hours and day enumeration.
//!
//! All computations are pure functions of the [`BusinessDayPolicy`] and the
//! input instant. Instants are UTC; dates and times of day are interpreted in
//! the policy's fixed offset.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

use crate::config::BusinessDayPolicy;
use crate::core::QueueError;

/// Working-day rules compiled from a validated policy.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    policy: BusinessDayPolicy,
    offset: FixedOffset,
    holidays: BTreeSet<NaiveDate>,
    /// Indexed by `Weekday::num_days_from_monday`.
    working_weekdays: [bool; 7],
}

impl BusinessCalendar {
    /// Build a calendar, rejecting invalid policies.
    pub fn new(policy: BusinessDayPolicy) -> Result<Self, QueueError> {
        policy.validate().map_err(QueueError::Configuration)?;
        let offset = FixedOffset::east_opt(policy.utc_offset_minutes * 60).ok_or_else(|| {
            QueueError::Configuration(format!(
                "utc offset {} minutes out of range",
                policy.utc_offset_minutes
            ))
        })?;
        let mut working_weekdays = [false; 7];
        for day in &policy.working_days {
            working_weekdays[day.num_days_from_monday() as usize] = true;
        }
        let holidays = policy.holidays.iter().copied().collect();
        Ok(Self {
            policy,
            offset,
            holidays,
            working_weekdays,
        })
    }

    /// False for non-working weekdays and holidays.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_weekdays[date.weekday().num_days_from_monday() as usize]
            && !self.holidays.contains(&date)
    }

    /// Local business date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Opening time of `date` as a UTC instant.
    pub fn opening_instant(&self, date: NaiveDate) -> DateTime<Utc> {
        self.local_to_utc(date, self.policy.start_time)
    }

    fn local_to_utc(&self, date: NaiveDate, time: chrono::NaiveTime) -> DateTime<Utc> {
        let shift = chrono::Duration::seconds(i64::from(self.offset.local_minus_utc()));
        (date.and_time(time) - shift).and_utc()
    }

    /// First working day strictly after `date`.
    pub fn next_working_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.working_days_from(date.succ_opt()?).next()
    }

    /// Smallest instant `>= from` that lies within working hours of a working day.
    pub fn next_working_instant(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        let local = from.with_timezone(&self.offset);
        let date = local.date_naive();
        let time = local.time();

        if self.is_working_day(date) {
            if time < self.policy.start_time {
                return Ok(self.opening_instant(date));
            }
            if time < self.policy.end_time {
                return Ok(from);
            }
        }

        self.next_working_day(date)
            .map(|next| self.opening_instant(next))
            .ok_or_else(|| QueueError::Configuration(format!("no working day after {date}")))
    }

    /// Lazy enumeration of working days starting at `start` (inclusive).
    ///
    /// Unbounded; callers cap it with `take(horizon)`.
    pub const fn working_days_from(&self, start: NaiveDate) -> WorkingDays<'_> {
        WorkingDays {
            calendar: self,
            cursor: Some(start),
            end: None,
        }
    }

    /// Working days in `start..=end`.
    pub const fn working_days_between(&self, start: NaiveDate, end: NaiveDate) -> WorkingDays<'_> {
        WorkingDays {
            calendar: self,
            cursor: Some(start),
            end: Some(end),
        }
    }

    /// Working days left from the next working instant through `period_end`.
    pub fn remaining_working_days(
        &self,
        from: DateTime<Utc>,
        period_end: NaiveDate,
    ) -> Result<usize, QueueError> {
        let start = self.local_date(self.next_working_instant(from)?);
        Ok(self.working_days_between(start, period_end).count())
    }
}

/// Iterator over working days. Cloning restarts from the clone point.
#[derive(Debug, Clone)]
pub struct WorkingDays<'a> {
    calendar: &'a BusinessCalendar,
    cursor: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl Iterator for WorkingDays<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            let date = self.cursor?;
            if self.end.is_some_and(|end| date > end) {
                self.cursor = None;
                return None;
            }
            self.cursor = date.succ_opt();
            if self.calendar.is_working_day(date) {
                return Some(date);
            }
        }
    }
}
