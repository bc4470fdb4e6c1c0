// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Class schedules and enroll/cancel time windows.
//!
//! A class either recurs weekly on a fixed weekday or happens once on a
//! specific date. Window validation resolves the next concrete occurrence
//! and applies the booking rules: enrollment closes 10 minutes after the
//! class starts, cancellation requires 2 hours of notice. A schedule with
//! no start time cannot be resolved and validates permissively (fail-open).
//! Staff-flagged callers skip validation entirely.

use crate::error::EngineError;
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Grace period after the start time during which enrollment stays open.
const ENROLL_GRACE_MINUTES: i64 = 10;

/// Minimum notice before the start time for a cancellation.
const CANCEL_NOTICE_HOURS: i64 = 2;

/// When a class takes place: every week on a weekday, or once on a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occurrence {
    Weekly(Weekday),
    Date(NaiveDate),
}

/// Schedule descriptor for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub occurrence: Occurrence,
    /// Missing time makes the occurrence unresolvable; validation then
    /// passes permissively.
    pub start_time: Option<NaiveTime>,
}

impl Schedule {
    pub fn weekly(weekday: Weekday, start_time: NaiveTime) -> Self {
        Self {
            occurrence: Occurrence::Weekly(weekday),
            start_time: Some(start_time),
        }
    }

    pub fn on_date(date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            occurrence: Occurrence::Date(date),
            start_time: Some(start_time),
        }
    }

    /// Resolves the relevant concrete occurrence as seen from `now`.
    ///
    /// A specific date stands as-is (even in the past). A weekly class
    /// resolves to today when the weekday matches, otherwise to the next
    /// matching weekday.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<NaiveDateTime> {
        let start_time = self.start_time?;
        let date = match self.occurrence {
            Occurrence::Date(date) => date,
            Occurrence::Weekly(weekday) => upcoming_weekday(now.date_naive(), weekday),
        };
        Some(date.and_time(start_time))
    }
}

/// Today if the weekday matches, otherwise the next matching date.
fn upcoming_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let days_ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday())
        % 7;
    today + Days::new(u64::from(days_ahead))
}

/// Validates the enrollment time window.
///
/// # Errors
///
/// - [`EngineError::ClassInThePast`] - The occurrence is on a past day.
/// - [`EngineError::EnrollmentClosed`] - The class started more than
///   10 minutes ago today.
pub fn validate_enrollment_window(
    schedule: &Schedule,
    staff: bool,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if staff {
        return Ok(());
    }
    let Some(occurrence) = schedule.next_occurrence(now) else {
        return Ok(());
    };

    let today = now.date_naive();
    if occurrence.date() < today {
        return Err(EngineError::ClassInThePast);
    }
    if occurrence.date() == today
        && now.naive_utc() - occurrence > Duration::minutes(ENROLL_GRACE_MINUTES)
    {
        return Err(EngineError::EnrollmentClosed);
    }
    Ok(())
}

/// Validates the cancellation time window.
///
/// # Errors
///
/// - [`EngineError::ClassInThePast`] - The occurrence is on a past day.
/// - [`EngineError::CancellationTooLate`] - Less than 2 hours remain before
///   a class happening today.
pub fn validate_cancellation_window(
    schedule: &Schedule,
    staff: bool,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if staff {
        return Ok(());
    }
    let Some(occurrence) = schedule.next_occurrence(now) else {
        return Ok(());
    };

    let today = now.date_naive();
    if occurrence.date() < today {
        return Err(EngineError::ClassInThePast);
    }
    if occurrence.date() == today
        && occurrence - now.naive_utc() < Duration::hours(CANCEL_NOTICE_HOURS)
    {
        return Err(EngineError::CancellationTooLate);
    }
    Ok(())
}
