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

//! Session bundle (bono) management.
//!
//! A bundle grants a fixed (or unlimited) number of class sessions over a
//! validity window. Its status follows a state machine:
//!
//  Active ──consume to zero──► Exhausted ──add sessions──► Active
//    │                             │
//    ├──pause──► Paused ──reactivate (extends end date)──► Active
//    │
//    ├──end date passes──► Expired
//    │
//    └──replaced by a new bundle──► Finished (terminal)
//!
//! Status is a cached projection: [`Bono::effective_status`] derives it from
//! the end date, the remaining sessions, and the explicit pause/finish flags,
//! and [`Bono::sync_status`] writes the derivation back whenever the bundle
//! is touched. Owner-side effects of a transition (linking or unlinking the
//! member's active-bundle reference) are applied by the engine, not here.

use crate::base::{BonoId, UserId};
use crate::error::EngineError;
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed catalog of bundle plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanKind {
    /// Single session, typically for walk-ins.
    DropIn,
    TenSessions,
    TwentySessions,
    /// No session accounting; only the validity window applies.
    Unlimited,
}

impl PlanKind {
    /// Whether the remaining-session count is meaningful for this plan.
    pub fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Default number of sessions granted by this plan.
    pub fn default_sessions(self) -> u32 {
        match self {
            Self::DropIn => 1,
            Self::TenSessions => 10,
            Self::TwentySessions => 20,
            Self::Unlimited => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DropIn => "Drop-in",
            Self::TenSessions => "10 Sessions",
            Self::TwentySessions => "20 Sessions",
            Self::Unlimited => "Unlimited",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for PlanKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop-in" | "dropin" => Ok(Self::DropIn),
            "10" | "10-sessions" | "10 sessions" => Ok(Self::TenSessions),
            "20" | "20-sessions" | "20 sessions" => Ok(Self::TwentySessions),
            "unlimited" => Ok(Self::Unlimited),
            _ => Err(EngineError::InvalidQuantity),
        }
    }
}

/// Bundle lifecycle status.
///
/// `Finished` is terminal and only ever set explicitly (a new bundle replaced
/// this one). `Paused` is held until an explicit reactivation. The remaining
/// three are derived from the validity window and the session count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonoStatus {
    Active,
    Paused,
    Finished,
    Expired,
    Exhausted,
}

/// A stored-status change reported by [`Bono::sync_status`].
///
/// The engine matches on `to` to apply the owner-side reference updates in
/// the same logical transaction as the bundle mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: BonoStatus,
    pub to: BonoStatus,
}

/// One pause interval. `ended_at` and `extension_days` stay empty until the
/// bundle is reactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub extension_days: Option<u32>,
}

/// Snapshot of an ongoing pause, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PauseInfo {
    pub started_at: DateTime<Utc>,
    pub reason: String,
    /// Days accrued so far, rounded up; this is the extension the bundle
    /// would receive if reactivated now.
    pub days_paused: u32,
}

/// A purchased session bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bono {
    pub id: BonoId,
    pub owner: UserId,
    pub plan: PlanKind,
    pub sessions_total: u32,
    pub sessions_remaining: u32,
    pub start_date: NaiveDate,
    /// Mutable: extended by pause reactivations.
    pub end_date: NaiveDate,
    /// Snapshot of the end date at purchase time, never updated.
    pub original_end_date: NaiveDate,
    pub status: BonoStatus,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub pauses: Vec<PauseRecord>,
    pub extension_days_total: u32,
    pub price: Decimal,
}

/// The validity window closes at the very end of the end date.
pub(crate) fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_milli_opt(23, 59, 59, 999).unwrap().and_utc()
}

/// Whole days between two instants, rounded up, floored at zero.
fn days_between_ceil(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    let secs = (end - start).num_seconds();
    if secs <= 0 {
        return 0;
    }
    ((secs + 86_399) / 86_400) as u32
}

impl Bono {
    /// Creates a bundle starting now and ending `duration_months` later.
    pub fn new(
        id: BonoId,
        owner: UserId,
        plan: PlanKind,
        sessions_total: u32,
        price: Decimal,
        duration_months: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let start_date = now.date_naive();
        let end_date = start_date + Months::new(duration_months);
        Self {
            id,
            owner,
            plan,
            sessions_total,
            sessions_remaining: sessions_total,
            start_date,
            end_date,
            original_end_date: end_date,
            status: BonoStatus::Active,
            pause_reason: None,
            paused_at: None,
            pauses: Vec::new(),
            extension_days_total: 0,
            price,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.plan.is_unlimited() || self.sessions_remaining <= self.sessions_total,
            "Invariant violated: remaining {} exceeds total {}",
            self.sessions_remaining,
            self.sessions_total
        );
    }

    /// Whether the validity window has passed, ignoring the stored status.
    pub fn is_expired_by_date(&self, now: DateTime<Utc>) -> bool {
        now > end_of_day(self.end_date)
    }

    /// Derives the status from the bundle's data at `now`.
    ///
    /// Pure: repeated calls with the same `now` return the same value.
    /// Stored `Finished` and `Paused` are sticky and never auto-transition.
    pub fn effective_status(&self, now: DateTime<Utc>) -> BonoStatus {
        match self.status {
            BonoStatus::Finished => BonoStatus::Finished,
            BonoStatus::Paused => BonoStatus::Paused,
            _ => {
                if self.is_expired_by_date(now) {
                    BonoStatus::Expired
                } else if !self.plan.is_unlimited() && self.sessions_remaining == 0 {
                    BonoStatus::Exhausted
                } else {
                    BonoStatus::Active
                }
            }
        }
    }

    /// Re-derives the status and stores it, reporting the transition if the
    /// stored value changed.
    pub fn sync_status(&mut self, now: DateTime<Utc>) -> Option<StatusTransition> {
        let derived = self.effective_status(now);
        if derived == self.status {
            return None;
        }
        let transition = StatusTransition {
            from: self.status,
            to: derived,
        };
        self.status = derived;
        Some(transition)
    }

    /// Marks the bundle finished. Terminal: no automatic recovery.
    pub fn finish(&mut self) {
        self.status = BonoStatus::Finished;
    }

    /// Pauses the bundle, freezing its end date.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyPaused`] - The bundle is already paused.
    /// - [`EngineError::BundleClosed`] - The bundle is finished or expired.
    pub fn pause(&mut self, reason: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
        match self.status {
            BonoStatus::Paused => return Err(EngineError::AlreadyPaused),
            BonoStatus::Finished | BonoStatus::Expired => return Err(EngineError::BundleClosed),
            BonoStatus::Active | BonoStatus::Exhausted => {}
        }

        self.status = BonoStatus::Paused;
        self.pause_reason = Some(reason.to_owned());
        self.paused_at = Some(at);
        self.pauses.push(PauseRecord {
            started_at: at,
            ended_at: None,
            reason: reason.to_owned(),
            extension_days: None,
        });
        Ok(())
    }

    /// Reactivates a paused bundle, extending its end date.
    ///
    /// Extension days come from `override_days` when supplied, otherwise from
    /// the pause duration rounded up to whole days (floored at zero). Returns
    /// the days applied.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotPaused`] - The bundle is not paused.
    pub fn reactivate(
        &mut self,
        override_days: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        if self.status != BonoStatus::Paused {
            return Err(EngineError::NotPaused);
        }

        let days = match override_days {
            Some(days) => days,
            None => match self.paused_at {
                Some(paused_at) => days_between_ceil(paused_at, at),
                None => 0,
            },
        };

        if days > 0 {
            self.end_date = self.end_date + Days::new(u64::from(days));
            self.extension_days_total += days;
        }

        // Close the open pause record, if any.
        if let Some(record) = self.pauses.last_mut() {
            if record.ended_at.is_none() {
                record.ended_at = Some(at);
                record.extension_days = Some(days);
            }
        }

        self.status = BonoStatus::Active;
        self.pause_reason = None;
        self.paused_at = None;
        Ok(days)
    }

    /// Adds sessions to both the total and the remaining count.
    ///
    /// May flip an `Exhausted` bundle back to `Active`; the transition is
    /// reported so the engine can re-link the owner.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] - `quantity` is zero.
    /// - [`EngineError::BundleClosed`] - The bundle is finished or expired.
    pub fn add_sessions(
        &mut self,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusTransition>, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if matches!(self.status, BonoStatus::Finished | BonoStatus::Expired) {
            return Err(EngineError::BundleClosed);
        }

        self.sessions_total += quantity;
        self.sessions_remaining += quantity;
        self.assert_invariants();
        Ok(self.sync_status(now))
    }

    /// Consumes one session. No-op for unlimited plans.
    ///
    /// The caller is responsible for checking eligibility first; consuming
    /// the last session flips the status to `Exhausted`.
    pub fn consume_session(&mut self, now: DateTime<Utc>) -> Option<StatusTransition> {
        if self.plan.is_unlimited() {
            return None;
        }
        debug_assert!(
            self.sessions_remaining > 0,
            "consume_session called on an empty bundle"
        );
        self.sessions_remaining = self.sessions_remaining.saturating_sub(1);
        self.assert_invariants();
        self.sync_status(now)
    }

    /// Returns one session on cancellation.
    ///
    /// Only applies while the validity window is open (checked fresh against
    /// the end date, not the stored status); an expired bundle forfeits the
    /// session. Unlimited plans skip the counter but still count as refunded.
    /// Returns whether the session was refunded, plus any status transition.
    pub fn refund_session(
        &mut self,
        now: DateTime<Utc>,
    ) -> (bool, Option<StatusTransition>) {
        if self.is_expired_by_date(now) {
            return (false, None);
        }
        if self.plan.is_unlimited() {
            return (true, None);
        }

        self.sessions_remaining += 1;
        (true, self.sync_status(now))
    }

    /// Snapshot of the ongoing pause, if the bundle is paused.
    pub fn current_pause(&self, now: DateTime<Utc>) -> Option<PauseInfo> {
        if self.status != BonoStatus::Paused {
            return None;
        }
        let started_at = self.paused_at?;
        Some(PauseInfo {
            started_at,
            reason: self.pause_reason.clone().unwrap_or_default(),
            days_paused: days_between_ceil(started_at, now),
        })
    }
}
