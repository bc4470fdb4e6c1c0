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

//! Member accounts and the free-session ledger.
//!
//! Free sessions are ad-hoc single-use class credits granted by staff,
//! independent of any bundle. The counter is a `u32` (never negative by
//! construction) and every change appends a history record whose signed
//! deltas always sum back to the counter.

use crate::base::{BonoId, UserId};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Member roles. Staff roles bypass eligibility and time-window checks when
/// enrolling (capacity still applies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Monitor,
    Member,
}

impl Role {
    /// Whether this role carries the effective staff flag.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Monitor)
    }
}

impl std::str::FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "monitor" => Ok(Self::Monitor),
            "member" => Ok(Self::Member),
            _ => Err(EngineError::InvalidQuantity),
        }
    }
}

/// Account lifecycle status, mutated by staff actions only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeSessionKind {
    Added,
    Used,
    Expired,
}

/// One append-only entry in a member's free-session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSessionRecord {
    pub kind: FreeSessionKind,
    /// Signed quantity delta; the running sum equals the member's counter.
    pub delta: i32,
    pub reason: String,
    /// Acting administrator; `None` for self-service use.
    pub granted_by: Option<UserId>,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// A member account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub account_status: AccountStatus,
    pub free_sessions: u32,
    pub free_session_history: Vec<FreeSessionRecord>,
    /// At most one active bundle at a time; maintained by the engine as
    /// bundle statuses transition.
    pub active_bono: Option<BonoId>,
    pub bono_history: Vec<BonoId>,
}

impl User {
    pub fn new(id: UserId, name: &str, email: &str, role: Role) -> Self {
        Self {
            id,
            name: name.to_owned(),
            email: email.to_owned(),
            role,
            account_status: AccountStatus::Active,
            free_sessions: 0,
            free_session_history: Vec::new(),
            active_bono: None,
            bono_history: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.history_balance(),
            i64::from(self.free_sessions),
            "Invariant violated: free-session history does not sum to the counter"
        );
    }

    /// Running sum of the history deltas. Always equals `free_sessions`.
    pub fn history_balance(&self) -> i64 {
        self.free_session_history
            .iter()
            .map(|record| i64::from(record.delta))
            .sum()
    }

    /// Adds `quantity` free sessions, recording who granted them and why.
    ///
    /// The staff-only rule that grants require an active account lives in
    /// the engine; cancellation refunds go through here regardless of
    /// account status.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] - `quantity` is zero.
    pub fn add_free_sessions(
        &mut self,
        quantity: u32,
        reason: &str,
        granted_by: Option<UserId>,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }

        self.free_sessions += quantity;
        self.free_session_history.push(FreeSessionRecord {
            kind: FreeSessionKind::Added,
            delta: quantity as i32,
            reason: reason.to_owned(),
            granted_by,
            at: now,
            detail: detail.map(str::to_owned),
        });
        self.assert_invariants();
        Ok(self.free_sessions)
    }

    /// Spends one free session on a class booking.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InsufficientFreeSessions`] - The counter is zero.
    pub fn use_free_session(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        if self.free_sessions == 0 {
            return Err(EngineError::InsufficientFreeSessions);
        }

        self.free_sessions -= 1;
        self.free_session_history.push(FreeSessionRecord {
            kind: FreeSessionKind::Used,
            delta: -1,
            reason: reason.to_owned(),
            granted_by: None,
            at: now,
            detail: None,
        });
        self.assert_invariants();
        Ok(self.free_sessions)
    }

    /// Removes `quantity` free sessions (administrative revocation).
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidQuantity`] - `quantity` is zero.
    /// - [`EngineError::InsufficientFreeSessions`] - Not enough sessions held.
    pub fn revoke_free_sessions(
        &mut self,
        quantity: u32,
        reason: &str,
        revoked_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        if self.free_sessions < quantity {
            return Err(EngineError::InsufficientFreeSessions);
        }

        self.free_sessions -= quantity;
        self.free_session_history.push(FreeSessionRecord {
            kind: FreeSessionKind::Expired,
            delta: -(quantity as i32),
            reason: reason.to_owned(),
            granted_by: revoked_by,
            at: now,
            detail: None,
        });
        self.assert_invariants();
        Ok(self.free_sessions)
    }
}
