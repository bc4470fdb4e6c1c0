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

//! Booking eligibility for member-role users.
//!
//! The resolver prefers the active bundle, falls back to free-session
//! credits, and otherwise reports the condition that actually failed. Staff
//! callers never reach it; the engine records a staff override instead.

use crate::base::BonoId;
use crate::bono::{Bono, BonoStatus};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a booking was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The active bundle has no sessions left (and no free credits remain).
    BundleExhausted,
    /// The active bundle's validity window has passed.
    BundleExpired,
    /// The active bundle is paused.
    BundlePaused,
    /// No active bundle and no free sessions.
    NoCredit,
}

impl DenialReason {
    pub fn into_error(self) -> EngineError {
        match self {
            Self::BundleExhausted => EngineError::BundleExhausted,
            Self::BundleExpired => EngineError::BundleExpired,
            Self::BundlePaused => EngineError::BundlePaused,
            Self::NoCredit => EngineError::NoEligibleCredit,
        }
    }
}

/// Outcome of the eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BookingDecision {
    /// Book against the bundle; consume one session unless unlimited.
    Bundle { bono: BonoId },
    /// Spend one free-session credit.
    FreeCredit,
    Denied { reason: DenialReason },
}

impl BookingDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// Resolves how a member may pay for a booking.
///
/// `active_bundle` is the bundle behind the member's active reference, if
/// any; the engine syncs its stored status before calling. The derivation
/// here is pure, so a stale stored value cannot leak into the decision.
pub fn resolve(
    active_bundle: Option<&Bono>,
    free_sessions: u32,
    now: DateTime<Utc>,
) -> BookingDecision {
    let mut bundle_status = None;

    if let Some(bono) = active_bundle {
        let status = bono.effective_status(now);
        if status == BonoStatus::Active
            && (bono.plan.is_unlimited() || bono.sessions_remaining > 0)
        {
            return BookingDecision::Bundle { bono: bono.id };
        }
        bundle_status = Some(status);
    }

    if free_sessions > 0 {
        return BookingDecision::FreeCredit;
    }

    let reason = match bundle_status {
        Some(BonoStatus::Exhausted) => DenialReason::BundleExhausted,
        Some(BonoStatus::Expired) => DenialReason::BundleExpired,
        Some(BonoStatus::Paused) => DenialReason::BundlePaused,
        _ => DenialReason::NoCredit,
    };
    BookingDecision::Denied { reason }
}
