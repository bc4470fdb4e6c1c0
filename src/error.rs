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

//! Error types for engine operations.

use thiserror::Error;

/// Broad classification of an [`EngineError`], for mapping to a transport
/// layer (e.g. HTTP 404 vs 422). The engine itself never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced member, class, or bundle does not exist.
    NotFound,
    /// A business rule rejected the operation.
    Validation,
}

/// Engine operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced member does not exist
    #[error("member not found")]
    UserNotFound,

    /// Referenced class does not exist
    #[error("class not found")]
    ClassNotFound,

    /// Referenced session bundle does not exist
    #[error("bundle not found")]
    BonoNotFound,

    /// Member ID already registered
    #[error("duplicate member ID")]
    DuplicateUser,

    /// Class ID already registered
    #[error("duplicate class ID")]
    DuplicateClass,

    /// Bundle ID already registered
    #[error("duplicate bundle ID")]
    DuplicateBono,

    /// Member already holds an active enrollment in this class
    #[error("already enrolled in this class")]
    AlreadyEnrolled,

    /// Member is not on the class roster
    #[error("not enrolled in this class")]
    NotEnrolled,

    /// Class roster is at capacity
    #[error("class is full")]
    ClassFull,

    /// The class occurrence is on a past day
    #[error("the class took place on a past day")]
    ClassInThePast,

    /// More than 10 minutes past the class start time
    #[error("enrollment closes 10 minutes after the class starts")]
    EnrollmentClosed,

    /// Less than 2 hours remain before the class starts
    #[error("cancellation requires at least 2 hours notice")]
    CancellationTooLate,

    /// Member has no active bundle and no free sessions
    #[error("no active bundle and no free sessions available")]
    NoEligibleCredit,

    /// Member's bundle has no sessions left
    #[error("bundle has no sessions remaining")]
    BundleExhausted,

    /// Member's bundle validity window has passed
    #[error("bundle has expired")]
    BundleExpired,

    /// Member's bundle is paused
    #[error("bundle is paused")]
    BundlePaused,

    /// Bundle is already paused
    #[error("bundle is already paused")]
    AlreadyPaused,

    /// Bundle is not paused
    #[error("bundle is not paused")]
    NotPaused,

    /// Pause/add-sessions on a finished or expired bundle
    #[error("bundle is finished or expired")]
    BundleClosed,

    /// Free sessions can only be granted to active member accounts
    #[error("member account is not active")]
    InactiveUser,

    /// Quantity must be a positive number
    #[error("quantity must be positive")]
    InvalidQuantity,

    /// Revoking more free sessions than the member holds
    #[error("not enough free sessions")]
    InsufficientFreeSessions,
}

impl EngineError {
    /// Classifies the error for transport-layer mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound | Self::ClassNotFound | Self::BonoNotFound => ErrorKind::NotFound,
            _ => ErrorKind::Validation,
        }
    }
}
