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

//! # Gym Ledger
//!
//! This library provides a session-credit engine for a gym: members buy
//! session bundles (bonos) or hold free-session credits, and the engine runs
//! the class enrollment/cancellation workflows that consume and refund them.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central processor managing members, classes, and bundles
//! - [`Bono`]: Session bundle with a validity window and pause support
//! - [`User`]: Member account with the free-session ledger
//! - [`Class`]: Scheduled class with roster, capacity, and enrollment history
//! - [`BookingDecision`]: How a booking would be paid for, or why not
//! - [`EngineError`]: Error types for workflow failures
//!
//! ## Example
//!
//! ```
//! use gym_ledger_rs::{
//!     BonoId, ClassId, Engine, PlanKind, Role, Schedule, UserId,
//! };
//! use chrono::{NaiveTime, TimeZone, Utc, Weekday};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
//!
//! engine
//!     .register_user(UserId(1), "Ana", "ana@example.com", Role::Member, now)
//!     .unwrap();
//! engine
//!     .create_bono(BonoId(1), UserId(1), PlanKind::TenSessions, 10, dec!(80.00), 1, now)
//!     .unwrap();
//! engine
//!     .add_class(
//!         ClassId(1),
//!         "Yoga",
//!         12,
//!         Schedule::weekly(Weekday::Mon, NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
//!         now,
//!     )
//!     .unwrap();
//!
//! // Enroll; one session is charged to the bundle.
//! let outcome = engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
//! assert!(outcome.class.is_enrolled(UserId(1)));
//!
//! let bono = engine.current_bono(UserId(1), now).unwrap().unwrap();
//! assert_eq!(bono.sessions_remaining, 9);
//! ```
//!
//! ## Thread Safety
//!
//! The engine handles concurrent access to members, classes, and bundles,
//! allowing bookings for different classes to proceed in parallel while a
//! class's capacity check and roster update stay atomic.

mod base;
pub mod bono;
pub mod class;
pub mod eligibility;
mod engine;
pub mod error;
mod journal;
pub mod schedule;
pub mod user;

pub use base::{BonoId, ClassId, UserId};
pub use bono::{Bono, BonoStatus, PauseInfo, PauseRecord, PlanKind, StatusTransition};
pub use class::{Class, ConsumptionMode, EnrollmentRecord, EnrollmentState};
pub use eligibility::{BookingDecision, DenialReason};
pub use engine::{BonoStats, Engine, EnrollmentOutcome, MemberSummary};
pub use error::{EngineError, ErrorKind};
pub use journal::{Journal, JournalEntry, JournalEvent};
pub use schedule::{Occurrence, Schedule};
pub use user::{AccountStatus, FreeSessionKind, FreeSessionRecord, Role, User};
