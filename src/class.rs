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

//! Scheduled classes: roster, capacity, and the enrollment history log.
//!
//! The history is append-only. A member holds at most one `Active` record
//! per class; cancellation locates it with a newest-first linear scan, which
//! is plenty at roster scale.

use crate::base::{BonoId, ClassId, UserId};
use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a seat was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConsumptionMode {
    /// Charged against a session bundle.
    Bundle { bono: BonoId },
    /// Spent one free-session credit.
    FreeCredit,
    /// Staff enrolled the member; nothing was consumed.
    StaffOverride,
}

impl ConsumptionMode {
    /// The bundle charged, if any.
    pub fn charged_bono(&self) -> Option<BonoId> {
        match self {
            Self::Bundle { bono } => Some(*bono),
            Self::FreeCredit | Self::StaffOverride => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Active,
    Cancelled,
    Completed,
}

/// One enrollment in the class history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub user: UserId,
    pub enrolled_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub state: EnrollmentState,
    /// `None` only on legacy records; every new enrollment carries a mode.
    pub mode: Option<ConsumptionMode>,
    /// Whether a cancellation returned the session to the member.
    pub refunded: bool,
}

/// A scheduled class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub capacity: usize,
    pub schedule: Schedule,
    /// Currently enrolled members; unique, never above capacity.
    pub enrolled: Vec<UserId>,
    pub history: Vec<EnrollmentRecord>,
}

impl Class {
    pub fn new(id: ClassId, name: &str, capacity: usize, schedule: Schedule) -> Self {
        Self {
            id,
            name: name.to_owned(),
            capacity,
            schedule,
            enrolled: Vec::new(),
            history: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.enrolled.len() <= self.capacity,
            "Invariant violated: roster exceeds capacity"
        );
        debug_assert!(
            self.enrolled
                .iter()
                .all(|user| self.enrolled.iter().filter(|other| *other == user).count() == 1),
            "Invariant violated: duplicate member on roster"
        );
    }

    pub fn is_full(&self) -> bool {
        self.enrolled.len() >= self.capacity
    }

    pub fn is_enrolled(&self, user: UserId) -> bool {
        self.enrolled.contains(&user)
    }

    /// Whether the member has an `Active` record in the history log.
    pub fn has_active_record(&self, user: UserId) -> bool {
        self.history
            .iter()
            .any(|record| record.user == user && record.state == EnrollmentState::Active)
    }

    /// Newest `Active` record for the member, scanning newest-first.
    pub fn latest_active_record_mut(&mut self, user: UserId) -> Option<&mut EnrollmentRecord> {
        self.history
            .iter_mut()
            .rev()
            .find(|record| record.user == user && record.state == EnrollmentState::Active)
    }

    /// Cancels the member's newest `Active` record, stamping the
    /// cancellation time. Returns the record's index so the caller can apply
    /// the refund outcome.
    pub fn cancel_latest_active(&mut self, user: UserId, now: DateTime<Utc>) -> Option<usize> {
        let index = self
            .history
            .iter()
            .rposition(|record| record.user == user && record.state == EnrollmentState::Active)?;
        let record = &mut self.history[index];
        record.state = EnrollmentState::Cancelled;
        record.cancelled_at = Some(now);
        Some(index)
    }

    /// Appends an `Active` history record and adds the member to the roster.
    ///
    /// The caller has already run the duplicate and capacity checks; this
    /// only records the outcome.
    pub fn record_enrollment(
        &mut self,
        user: UserId,
        mode: Option<ConsumptionMode>,
        now: DateTime<Utc>,
    ) {
        self.history.push(EnrollmentRecord {
            user,
            enrolled_at: now,
            cancelled_at: None,
            state: EnrollmentState::Active,
            mode,
            refunded: false,
        });
        self.enrolled.push(user);
        self.assert_invariants();
    }

    /// Removes the member from the roster. The history record stays.
    pub fn remove_from_roster(&mut self, user: UserId) {
        self.enrolled.retain(|enrolled| *enrolled != user);
        self.assert_invariants();
    }
}
