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

//! Session-credit engine.
//!
//! The [`Engine`] is the central component that owns member, class, and
//! bundle stores and runs the enrollment/cancellation workflows on top of
//! them. It handles bundle administration (create, pause, reactivate, add
//! sessions, expiration sweep), free-session grants, and the bookkeeping
//! that ties them together.
//!
//! # Workflows
//!
//! - **Enroll**: duplicate and capacity checks, booking time window,
//!   eligibility resolution, credit consumption, history record.
//! - **Cancel**: roster check, cancellation time window, refund keyed on the
//!   consumption mode recorded at enrollment.
//! - **Sweep**: re-derives the status of every open bundle on demand.
//!
//! # Thread Safety
//!
//! Entities live in [`DashMap`] stores and every mutation happens under the
//! entity's shard guard. The capacity/duplicate checks and the roster
//! insertion of an enrollment run under one held class guard, so two
//! concurrent enrollments cannot overfill a class. Guards are always
//! acquired in class → bundle → member order; member snapshots taken before
//! that sequence are advisory and re-validated under the owning guard.
//!
//! All time-dependent operations take an explicit `now` so callers (and
//! tests) control the clock.

use crate::base::{BonoId, ClassId, UserId};
use crate::bono::{Bono, BonoStatus, PlanKind, StatusTransition};
use crate::class::{Class, ConsumptionMode};
use crate::eligibility::{self, BookingDecision};
use crate::error::EngineError;
use crate::journal::{Journal, JournalEntry, JournalEvent};
use crate::schedule::{Schedule, validate_cancellation_window, validate_enrollment_window};
use crate::user::{AccountStatus, Role, User};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;

/// Result of a successful enrollment: the updated class and how the seat
/// was paid for.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentOutcome {
    pub class: Class,
    pub mode: ConsumptionMode,
}

/// Aggregate bundle figures, refreshed by a sweep before counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BonoStats {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub finished: usize,
    pub expired: usize,
    pub exhausted: usize,
    pub sessions_remaining: u64,
    /// Days accrued so far across currently paused bundles.
    pub paused_days_accrued: u64,
}

/// Flat per-member snapshot for reports (CSV output of the replay binary).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub member: UserId,
    pub name: String,
    pub role: Role,
    pub account_status: AccountStatus,
    pub free_sessions: u32,
    pub bono: Option<BonoId>,
    pub bono_status: Option<BonoStatus>,
    pub sessions_remaining: Option<u32>,
}

/// Session-credit engine managing members, classes, and bundles.
pub struct Engine {
    /// Member accounts indexed by member ID.
    users: DashMap<UserId, User>,
    /// Scheduled classes indexed by class ID.
    classes: DashMap<ClassId, Class>,
    /// Session bundles indexed by bundle ID; never removed.
    bonos: DashMap<BonoId, Bono>,
    /// Ordered audit trail of state-changing operations.
    journal: Journal,
}

impl Engine {
    /// Creates an engine with empty stores.
    pub fn new() -> Self {
        Engine {
            users: DashMap::new(),
            classes: DashMap::new(),
            bonos: DashMap::new(),
            journal: Journal::new(),
        }
    }

    // === Members ===

    /// Registers a member account.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateUser`] - The member ID is taken.
    pub fn register_user(
        &self,
        id: UserId,
        name: &str,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match self.users.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::DuplicateUser),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(User::new(id, name, email, role));
                self.journal.record(now, JournalEvent::UserRegistered { user: id });
                tracing::info!(member = %id, "member registered");
                Ok(())
            }
        }
    }

    /// Changes a member's role (staff action; the auth layer gates callers).
    pub fn set_role(&self, id: UserId, role: Role) -> Result<(), EngineError> {
        let mut user = self.users.get_mut(&id).ok_or(EngineError::UserNotFound)?;
        user.role = role;
        Ok(())
    }

    /// Changes a member's account status.
    pub fn set_account_status(
        &self,
        id: UserId,
        status: AccountStatus,
    ) -> Result<(), EngineError> {
        let mut user = self.users.get_mut(&id).ok_or(EngineError::UserNotFound)?;
        user.account_status = status;
        Ok(())
    }

    /// Retrieves a member account by ID.
    pub fn get_user(&self, id: &UserId) -> Option<dashmap::mapref::one::Ref<'_, UserId, User>> {
        self.users.get(id)
    }

    /// Returns an iterator over all member accounts.
    pub fn users(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, User>> {
        self.users.iter()
    }

    // === Classes ===

    /// Adds a scheduled class.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateClass`] - The class ID is taken.
    pub fn add_class(
        &self,
        id: ClassId,
        name: &str,
        capacity: usize,
        schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match self.classes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::DuplicateClass),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Class::new(id, name, capacity, schedule));
                self.journal.record(now, JournalEvent::ClassAdded { class: id });
                Ok(())
            }
        }
    }

    /// Retrieves a class by ID.
    pub fn get_class(&self, id: &ClassId) -> Option<dashmap::mapref::one::Ref<'_, ClassId, Class>> {
        self.classes.get(id)
    }

    // === Bundles ===

    /// Creates a bundle for a member, replacing any previous active bundle
    /// (the previous one is force-finished and stays in the history).
    ///
    /// # Errors
    ///
    /// - [`EngineError::UserNotFound`] - Unknown member.
    /// - [`EngineError::DuplicateBono`] - The bundle ID is taken.
    pub fn create_bono(
        &self,
        id: BonoId,
        user_id: UserId,
        plan: PlanKind,
        sessions_total: u32,
        price: Decimal,
        duration_months: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.bonos.contains_key(&id) {
            return Err(EngineError::DuplicateBono);
        }
        let previous = {
            let user = self.users.get(&user_id).ok_or(EngineError::UserNotFound)?;
            user.active_bono
        };

        if let Some(previous_id) = previous {
            if let Some(mut old) = self.bonos.get_mut(&previous_id) {
                old.finish();
            }
        }

        self.bonos
            .insert(id, Bono::new(id, user_id, plan, sessions_total, price, duration_months, now));

        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.active_bono = Some(id);
            user.bono_history.push(id);
        }

        self.journal
            .record(now, JournalEvent::BonoCreated { bono: id, user: user_id });
        tracing::info!(bono = %id, member = %user_id, plan = %plan, "bundle created");
        Ok(())
    }

    /// Retrieves a bundle snapshot by ID, without syncing its status.
    pub fn get_bono(&self, id: &BonoId) -> Option<Bono> {
        self.bonos.get(id).map(|bono| bono.clone())
    }

    /// The member's active bundle with its status freshly synced, or `None`
    /// when the member has no active reference.
    pub fn current_bono(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Bono>, EngineError> {
        let active = {
            let user = self.users.get(&user_id).ok_or(EngineError::UserNotFound)?;
            user.active_bono
        };
        let Some(bono_id) = active else {
            return Ok(None);
        };
        Ok(self.sync_bono(bono_id, now))
    }

    /// The member's full bundle history, each entry freshly synced.
    pub fn bono_history(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bono>, EngineError> {
        let ids = {
            let user = self.users.get(&user_id).ok_or(EngineError::UserNotFound)?;
            user.bono_history.clone()
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| self.sync_bono(id, now))
            .collect())
    }

    /// Pauses a bundle, freezing its end date until reactivation.
    pub fn pause_bono(
        &self,
        id: BonoId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let owner = {
            let mut bono = self.bonos.get_mut(&id).ok_or(EngineError::BonoNotFound)?;
            // Recompute before deciding; the stored status may be stale.
            let transition = bono.sync_status(at);
            self.apply_transition(&bono, transition);
            bono.pause(reason, at)?;
            bono.owner
        };
        self.journal.record(at, JournalEvent::BonoPaused { bono: id });
        tracing::info!(bono = %id, member = %owner, reason, "bundle paused");
        Ok(())
    }

    /// Reactivates a paused bundle, extending its end date. Returns the
    /// extension days applied.
    pub fn reactivate_bono(
        &self,
        id: BonoId,
        override_days: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        let days = {
            let mut bono = self.bonos.get_mut(&id).ok_or(EngineError::BonoNotFound)?;
            let days = bono.reactivate(override_days, at)?;
            // A long pause without enough extension may leave the window
            // already closed; re-derive and unlink if so.
            let transition = bono.sync_status(at);
            self.apply_transition(&bono, transition);
            days
        };
        self.journal
            .record(at, JournalEvent::BonoReactivated { bono: id, extension_days: days });
        tracing::info!(bono = %id, extension_days = days, "bundle reactivated");
        Ok(days)
    }

    /// Adds sessions to a bundle; may revive an exhausted bundle.
    pub fn add_sessions(
        &self,
        id: BonoId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        {
            let mut bono = self.bonos.get_mut(&id).ok_or(EngineError::BonoNotFound)?;
            let transition = bono.sync_status(now);
            self.apply_transition(&bono, transition);
            let transition = bono.add_sessions(quantity, now)?;
            self.apply_transition(&bono, transition);
        }
        self.journal
            .record(now, JournalEvent::SessionsAdded { bono: id, quantity });
        Ok(())
    }

    /// Re-derives the status of every bundle stored `Active` or `Exhausted`,
    /// returning how many actually changed. Invoked on demand; callers
    /// decide the cadence.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for mut entry in self.bonos.iter_mut() {
            if !matches!(entry.status, BonoStatus::Active | BonoStatus::Exhausted) {
                continue;
            }
            let transition = entry.sync_status(now);
            if transition.is_some() {
                changed += 1;
            }
            self.apply_transition(&entry, transition);
        }
        self.journal.record(now, JournalEvent::SweepCompleted { changed });
        tracing::info!(changed, "expiration sweep completed");
        changed
    }

    /// Aggregate bundle figures, after a sweep refreshes stored statuses.
    pub fn bono_stats(&self, now: DateTime<Utc>) -> BonoStats {
        self.sweep_expired(now);

        let mut stats = BonoStats {
            total: 0,
            active: 0,
            paused: 0,
            finished: 0,
            expired: 0,
            exhausted: 0,
            sessions_remaining: 0,
            paused_days_accrued: 0,
        };
        for bono in self.bonos.iter() {
            stats.total += 1;
            match bono.status {
                BonoStatus::Active => stats.active += 1,
                BonoStatus::Paused => stats.paused += 1,
                BonoStatus::Finished => stats.finished += 1,
                BonoStatus::Expired => stats.expired += 1,
                BonoStatus::Exhausted => stats.exhausted += 1,
            }
            if !bono.plan.is_unlimited() {
                stats.sessions_remaining += u64::from(bono.sessions_remaining);
            }
            if let Some(pause) = bono.current_pause(now) {
                stats.paused_days_accrued += u64::from(pause.days_paused);
            }
        }
        stats
    }

    // === Free sessions ===

    /// Grants free sessions to an active member account (staff action).
    ///
    /// # Errors
    ///
    /// - [`EngineError::InactiveUser`] - The target account is not active.
    pub fn grant_free_sessions(
        &self,
        user_id: UserId,
        quantity: u32,
        reason: &str,
        granted_by: Option<UserId>,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        let balance = {
            let mut user = self.users.get_mut(&user_id).ok_or(EngineError::UserNotFound)?;
            if user.account_status != AccountStatus::Active {
                return Err(EngineError::InactiveUser);
            }
            user.add_free_sessions(quantity, reason, granted_by, detail, now)?
        };
        self.journal
            .record(now, JournalEvent::FreeSessionsGranted { user: user_id, quantity });
        tracing::info!(member = %user_id, quantity, balance, "free sessions granted");
        Ok(balance)
    }

    /// Removes free sessions from a member (staff action).
    pub fn revoke_free_sessions(
        &self,
        user_id: UserId,
        quantity: u32,
        reason: &str,
        revoked_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u32, EngineError> {
        let balance = {
            let mut user = self.users.get_mut(&user_id).ok_or(EngineError::UserNotFound)?;
            user.revoke_free_sessions(quantity, reason, revoked_by, now)?
        };
        self.journal
            .record(now, JournalEvent::FreeSessionsRevoked { user: user_id, quantity });
        Ok(balance)
    }

    // === Booking ===

    /// How the member could pay for a booking right now.
    pub fn can_book(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<BookingDecision, EngineError> {
        let (active, free_sessions) = {
            let user = self.users.get(&user_id).ok_or(EngineError::UserNotFound)?;
            (user.active_bono, user.free_sessions)
        };

        if let Some(bono_id) = active {
            self.sync_bono(bono_id, now);
            let guard = self.bonos.get(&bono_id);
            return Ok(eligibility::resolve(
                guard.as_deref(),
                free_sessions,
                now,
            ));
        }
        Ok(eligibility::resolve(None, free_sessions, now))
    }

    /// Enrolls a member into a class.
    ///
    /// Staff-flagged calls skip the time window and eligibility (the seat is
    /// recorded as a staff override) but still respect capacity.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UserNotFound`] / [`EngineError::ClassNotFound`]
    /// - [`EngineError::AlreadyEnrolled`] - Active record already exists.
    /// - [`EngineError::ClassFull`] - Roster at capacity.
    /// - [`EngineError::ClassInThePast`] / [`EngineError::EnrollmentClosed`]
    /// - Eligibility denials: [`EngineError::NoEligibleCredit`],
    ///   [`EngineError::BundleExhausted`], [`EngineError::BundleExpired`],
    ///   [`EngineError::BundlePaused`]
    pub fn enroll(
        &self,
        class_id: ClassId,
        user_id: UserId,
        as_staff: bool,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentOutcome, EngineError> {
        // Advisory snapshot; every decision below is re-validated under the
        // owning guard.
        let (active_bono, free_sessions) = {
            let user = self.users.get(&user_id).ok_or(EngineError::UserNotFound)?;
            (user.active_bono, user.free_sessions)
        };

        let mut class = self
            .classes
            .get_mut(&class_id)
            .ok_or(EngineError::ClassNotFound)?;

        if class.has_active_record(user_id) || class.is_enrolled(user_id) {
            return Err(EngineError::AlreadyEnrolled);
        }
        if class.is_full() {
            return Err(EngineError::ClassFull);
        }
        validate_enrollment_window(&class.schedule, as_staff, now)?;

        let mode = if as_staff {
            ConsumptionMode::StaffOverride
        } else {
            self.consume_credit(&class.name, user_id, active_bono, free_sessions, now)?
        };

        class.record_enrollment(user_id, Some(mode), now);

        self.journal.record(
            now,
            JournalEvent::Enrolled { class: class_id, user: user_id, mode },
        );
        tracing::info!(class = %class_id, member = %user_id, ?mode, "member enrolled");
        Ok(EnrollmentOutcome {
            class: class.clone(),
            mode,
        })
    }

    /// Resolves eligibility and consumes the chosen credit. Called with the
    /// class guard held; acquires bundle and member guards in that order.
    fn consume_credit(
        &self,
        class_name: &str,
        user_id: UserId,
        active_bono: Option<BonoId>,
        free_sessions: u32,
        now: DateTime<Utc>,
    ) -> Result<ConsumptionMode, EngineError> {
        if let Some(bono_id) = active_bono {
            self.sync_bono(bono_id, now);
        }

        let decision = {
            let guard = active_bono.and_then(|id| self.bonos.get(&id));
            eligibility::resolve(guard.as_deref(), free_sessions, now)
        };

        match decision {
            BookingDecision::Bundle { bono: bono_id } => {
                let mut bono = self
                    .bonos
                    .get_mut(&bono_id)
                    .ok_or(EngineError::BonoNotFound)?;
                // Defensive re-check at the moment of charging.
                match bono.effective_status(now) {
                    BonoStatus::Active => {}
                    BonoStatus::Expired => return Err(EngineError::BundleExpired),
                    BonoStatus::Paused => return Err(EngineError::BundlePaused),
                    BonoStatus::Exhausted => return Err(EngineError::BundleExhausted),
                    BonoStatus::Finished => return Err(EngineError::BundleClosed),
                }
                if bono.is_expired_by_date(now) {
                    return Err(EngineError::BundleExpired);
                }
                let transition = bono.consume_session(now);
                self.apply_transition(&bono, transition);
                Ok(ConsumptionMode::Bundle { bono: bono_id })
            }
            BookingDecision::FreeCredit => {
                let mut user = self.users.get_mut(&user_id).ok_or(EngineError::UserNotFound)?;
                user.use_free_session(&format!("Class: {class_name}"), now)?;
                Ok(ConsumptionMode::FreeCredit)
            }
            BookingDecision::Denied { reason } => Err(reason.into_error()),
        }
    }

    /// Cancels a member's enrollment, refunding the consumed credit when the
    /// rules allow it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UserNotFound`] / [`EngineError::ClassNotFound`]
    /// - [`EngineError::NotEnrolled`] - Member not on the roster.
    /// - [`EngineError::ClassInThePast`] /
    ///   [`EngineError::CancellationTooLate`]
    pub fn cancel(
        &self,
        class_id: ClassId,
        user_id: UserId,
        as_staff: bool,
        now: DateTime<Utc>,
    ) -> Result<Class, EngineError> {
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::UserNotFound);
        }

        let mut class = self
            .classes
            .get_mut(&class_id)
            .ok_or(EngineError::ClassNotFound)?;

        if !class.is_enrolled(user_id) {
            return Err(EngineError::NotEnrolled);
        }
        validate_cancellation_window(&class.schedule, as_staff, now)?;

        let class_name = class.name.clone();
        let mut refunded = false;
        if let Some(index) = class.cancel_latest_active(user_id, now) {
            if !as_staff {
                refunded = match class.history[index].mode {
                    Some(ConsumptionMode::Bundle { bono }) => {
                        self.refund_bundle_session(bono, user_id, now)
                    }
                    Some(ConsumptionMode::FreeCredit) => {
                        if let Some(mut user) = self.users.get_mut(&user_id) {
                            // Entity-level add skips the active-account rule
                            // on purpose; a refund always lands.
                            user.add_free_sessions(
                                1,
                                &format!("Class cancellation: {class_name}"),
                                None,
                                None,
                                now,
                            )?;
                            true
                        } else {
                            false
                        }
                    }
                    Some(ConsumptionMode::StaffOverride) | None => false,
                };
                class.history[index].refunded = refunded;
            }
        }

        class.remove_from_roster(user_id);

        self.journal.record(
            now,
            JournalEvent::Cancelled { class: class_id, user: user_id, refunded },
        );
        tracing::info!(class = %class_id, member = %user_id, refunded, "enrollment cancelled");
        Ok(class.clone())
    }

    /// Returns one session to the charged bundle if its window is still
    /// open. An expired bundle forfeits the session.
    fn refund_bundle_session(&self, bono_id: BonoId, user_id: UserId, now: DateTime<Utc>) -> bool {
        let Some(mut bono) = self.bonos.get_mut(&bono_id) else {
            return false;
        };
        let (refunded, transition) = bono.refund_session(now);
        if let Some(transition) = transition {
            // Refund re-links only when the member has no active reference;
            // a newer bundle must not be displaced.
            if transition.to == BonoStatus::Active {
                if let Some(mut user) = self.users.get_mut(&user_id) {
                    if user.active_bono.is_none() {
                        user.active_bono = Some(bono_id);
                    }
                }
            }
        }
        refunded
    }

    // === Reporting ===

    /// Per-member snapshots, sorted by member ID, with bundle statuses
    /// synced first.
    pub fn member_summaries(&self, now: DateTime<Utc>) -> Vec<MemberSummary> {
        let mut summaries: Vec<MemberSummary> = self
            .users
            .iter()
            .map(|user| {
                let bono = user.active_bono.and_then(|id| self.sync_bono(id, now));
                MemberSummary {
                    member: user.id,
                    name: user.name.clone(),
                    role: user.role,
                    account_status: user.account_status,
                    free_sessions: user.free_sessions,
                    bono: bono.as_ref().map(|bono| bono.id),
                    bono_status: bono.as_ref().map(|bono| bono.status),
                    sessions_remaining: bono.as_ref().and_then(|bono| {
                        (!bono.plan.is_unlimited()).then_some(bono.sessions_remaining)
                    }),
                }
            })
            .collect();
        summaries.sort_by_key(|summary| summary.member.0);
        summaries
    }

    /// Removes and returns the journal entries recorded so far, in order.
    pub fn drain_journal(&self) -> Vec<JournalEntry> {
        self.journal.drain()
    }

    // === Internals ===

    /// Syncs a bundle's stored status, applies the owner-side effects of
    /// any transition, and returns a snapshot.
    fn sync_bono(&self, id: BonoId, now: DateTime<Utc>) -> Option<Bono> {
        let mut bono = self.bonos.get_mut(&id)?;
        let transition = bono.sync_status(now);
        self.apply_transition(&bono, transition);
        Some(bono.clone())
    }

    /// Applies the member-reference side of a status transition. Called with
    /// the bundle guard held; acquires the member guard (always last in the
    /// lock order).
    fn apply_transition(&self, bono: &Bono, transition: Option<StatusTransition>) {
        let Some(transition) = transition else {
            return;
        };
        tracing::debug!(
            bono = %bono.id,
            from = ?transition.from,
            to = ?transition.to,
            "bundle status transition"
        );
        match transition.to {
            BonoStatus::Active
                if matches!(transition.from, BonoStatus::Exhausted | BonoStatus::Expired) =>
            {
                if let Some(mut user) = self.users.get_mut(&bono.owner) {
                    user.active_bono = Some(bono.id);
                }
            }
            BonoStatus::Expired => {
                if let Some(mut user) = self.users.get_mut(&bono.owner) {
                    if user.active_bono == Some(bono.id) {
                        user.active_bono = None;
                    }
                }
            }
            _ => {}
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
