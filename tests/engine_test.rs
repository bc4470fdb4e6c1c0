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

//! Engine public API integration tests.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use gym_ledger_rs::{
    BonoId, BonoStatus, BookingDecision, ClassId, ConsumptionMode, Engine, EngineError, PlanKind,
    Role, Schedule, UserId,
};
use rust_decimal_macros::dec;

// 2026-03-02 is a Monday; the fixture class runs Mondays at 18:00,
// so a 10:00 clock is safely inside both booking windows.
fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn monday_class() -> Schedule {
    Schedule::weekly(Weekday::Mon, NaiveTime::from_hms_opt(18, 0, 0).unwrap())
}

fn register_member(engine: &Engine, id: u32, now: DateTime<Utc>) {
    engine
        .register_user(UserId(id), "Ana", "ana@example.com", Role::Member, now)
        .unwrap();
}

fn give_ten_sessions(engine: &Engine, bono_id: u32, user_id: u32, now: DateTime<Utc>) {
    engine
        .create_bono(
            BonoId(bono_id),
            UserId(user_id),
            PlanKind::TenSessions,
            10,
            dec!(80.00),
            1,
            now,
        )
        .unwrap();
}

fn add_yoga(engine: &Engine, capacity: usize, now: DateTime<Utc>) {
    engine
        .add_class(ClassId(1), "Yoga", capacity, monday_class(), now)
        .unwrap();
}

#[test]
fn enrollment_charges_active_bundle() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    let outcome = engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    assert_eq!(outcome.mode, ConsumptionMode::Bundle { bono: BonoId(1) });
    assert!(outcome.class.is_enrolled(UserId(1)));

    let bono = engine.current_bono(UserId(1), now).unwrap().unwrap();
    assert_eq!(bono.sessions_remaining, 9);
}

#[test]
fn consuming_last_session_exhausts_and_unlinks_nothing() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::DropIn, 1, dec!(12.00), 1, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();

    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.status, BonoStatus::Exhausted);
    // Exhausted keeps the active reference: adding sessions revives it.
    let user = engine.get_user(&UserId(1)).unwrap();
    assert_eq!(user.active_bono, Some(BonoId(1)));
}

#[test]
fn exhausted_bundle_falls_back_to_free_credit() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::DropIn, 1, dec!(12.00), 1, now)
        .unwrap();
    engine
        .grant_free_sessions(UserId(1), 1, "welcome pack", None, None, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    engine.cancel(ClassId(1), UserId(1), false, now).unwrap();
    // Burn the bundle session for real this time.
    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    engine
        .add_class(ClassId(2), "Pilates", 12, monday_class(), now)
        .unwrap();

    let outcome = engine.enroll(ClassId(2), UserId(1), false, now).unwrap();
    assert_eq!(outcome.mode, ConsumptionMode::FreeCredit);
    assert_eq!(engine.get_user(&UserId(1)).unwrap().free_sessions, 0);
}

#[test]
fn exhausted_bundle_without_credits_is_denied() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::DropIn, 1, dec!(12.00), 1, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    engine
        .add_class(ClassId(2), "Pilates", 12, monday_class(), now)
        .unwrap();

    let result = engine.enroll(ClassId(2), UserId(1), false, now);
    assert_eq!(result, Err(EngineError::BundleExhausted));
}

#[test]
fn expired_bundle_is_denied_with_expired() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    // 2026-04-06 is a Monday, five weeks on; the one-month window is closed.
    let later = Utc.with_ymd_and_hms(2026, 4, 6, 10, 0, 0).unwrap();
    let result = engine.enroll(ClassId(1), UserId(1), false, later);
    assert_eq!(result, Err(EngineError::BundleExpired));

    // The sync also cleared the member's active reference.
    let user = engine.get_user(&UserId(1)).unwrap();
    assert_eq!(user.active_bono, None);
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Expired);
}

#[test]
fn paused_bundle_is_denied_with_paused() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    engine.pause_bono(BonoId(1), "vacation", now).unwrap();
    let result = engine.enroll(ClassId(1), UserId(1), false, now);
    assert_eq!(result, Err(EngineError::BundlePaused));

    assert_eq!(
        engine.can_book(UserId(1), now).unwrap(),
        BookingDecision::Denied {
            reason: gym_ledger_rs::DenialReason::BundlePaused
        }
    );
}

#[test]
fn pause_and_reactivate_extend_validity() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);

    let original_end = engine.get_bono(&BonoId(1)).unwrap().end_date;
    engine.pause_bono(BonoId(1), "injury", now).unwrap();

    let twelve_days = now + Duration::days(12);
    let days = engine.reactivate_bono(BonoId(1), None, twelve_days).unwrap();
    assert_eq!(days, 12);

    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.status, BonoStatus::Active);
    assert_eq!(bono.end_date, original_end + chrono::Days::new(12));
    assert_eq!(bono.original_end_date, original_end);
}

#[test]
fn cancellation_refunds_bundle_session() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    let class = engine.cancel(ClassId(1), UserId(1), false, now).unwrap();

    assert!(!class.is_enrolled(UserId(1)));
    assert!(class.history[0].refunded);
    assert_eq!(class.history[0].cancelled_at, Some(now));

    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.sessions_remaining, 10);
}

#[test]
fn cancellation_of_expired_bundle_forfeits_session() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();

    // Cancel weeks later, after the bundle's window closed. The Monday
    // morning clock keeps the cancellation window itself open.
    let later = Utc.with_ymd_and_hms(2026, 4, 6, 10, 0, 0).unwrap();
    let class = engine.cancel(ClassId(1), UserId(1), false, later).unwrap();

    assert!(!class.history[0].refunded);
    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.sessions_remaining, 9);
}

#[test]
fn refund_revives_exhausted_bundle_and_relinks() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::DropIn, 1, dec!(12.00), 1, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Exhausted);

    engine.cancel(ClassId(1), UserId(1), false, now).unwrap();

    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.status, BonoStatus::Active);
    assert_eq!(bono.sessions_remaining, 1);
    assert_eq!(engine.get_user(&UserId(1)).unwrap().active_bono, Some(BonoId(1)));
}

#[test]
fn free_credit_enrollment_round_trip() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .grant_free_sessions(UserId(1), 2, "welcome pack", Some(UserId(9)), None, now)
        .unwrap();

    let outcome = engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    assert_eq!(outcome.mode, ConsumptionMode::FreeCredit);
    assert_eq!(engine.get_user(&UserId(1)).unwrap().free_sessions, 1);

    engine.cancel(ClassId(1), UserId(1), false, now).unwrap();

    let user = engine.get_user(&UserId(1)).unwrap();
    assert_eq!(user.free_sessions, 2);
    assert_eq!(user.history_balance(), 2);
    // grant, use, refund
    assert_eq!(user.free_session_history.len(), 3);
}

#[test]
fn full_class_rejects_everyone_including_staff() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    register_member(&engine, 2, now);
    engine
        .register_user(UserId(3), "Marta", "marta@example.com", Role::Admin, now)
        .unwrap();
    give_ten_sessions(&engine, 1, 1, now);
    give_ten_sessions(&engine, 2, 2, now);
    add_yoga(&engine, 2, now);

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    engine.enroll(ClassId(1), UserId(2), false, now).unwrap();

    // Staff bypass eligibility and time windows, never capacity.
    let result = engine.enroll(ClassId(1), UserId(3), true, now);
    assert_eq!(result, Err(EngineError::ClassFull));
}

#[test]
fn staff_enrollment_consumes_nothing() {
    let engine = Engine::new();
    let now = monday_morning();
    engine
        .register_user(UserId(1), "Marta", "marta@example.com", Role::Monitor, now)
        .unwrap();
    add_yoga(&engine, 12, now);

    let outcome = engine.enroll(ClassId(1), UserId(1), true, now).unwrap();
    assert_eq!(outcome.mode, ConsumptionMode::StaffOverride);

    // Staff cancellation refunds nothing either.
    let class = engine.cancel(ClassId(1), UserId(1), true, now).unwrap();
    assert!(!class.history[0].refunded);
}

#[test]
fn duplicate_enrollment_is_rejected_before_charging() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    let result = engine.enroll(ClassId(1), UserId(1), false, now);
    assert_eq!(result, Err(EngineError::AlreadyEnrolled));

    // Only the first enrollment consumed a session.
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().sessions_remaining, 9);
}

#[test]
fn enrollment_window_closes_after_grace() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    let late = Utc.with_ymd_and_hms(2026, 3, 2, 18, 11, 0).unwrap();
    let result = engine.enroll(ClassId(1), UserId(1), false, late);
    assert_eq!(result, Err(EngineError::EnrollmentClosed));
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().sessions_remaining, 10);
}

#[test]
fn cancellation_window_requires_notice() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();

    let too_late = Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).unwrap();
    let result = engine.cancel(ClassId(1), UserId(1), false, too_late);
    assert_eq!(result, Err(EngineError::CancellationTooLate));

    // Still enrolled, nothing refunded.
    assert!(engine.get_class(&ClassId(1)).unwrap().is_enrolled(UserId(1)));
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().sessions_remaining, 9);
}

#[test]
fn cancel_without_enrollment_is_rejected() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);

    let result = engine.cancel(ClassId(1), UserId(1), false, now);
    assert_eq!(result, Err(EngineError::NotEnrolled));
}

#[test]
fn unknown_entities_report_not_found() {
    let engine = Engine::new();
    let now = monday_morning();

    assert_eq!(
        engine.enroll(ClassId(1), UserId(1), false, now),
        Err(EngineError::UserNotFound)
    );

    register_member(&engine, 1, now);
    assert_eq!(
        engine.enroll(ClassId(1), UserId(1), false, now),
        Err(EngineError::ClassNotFound)
    );
    assert_eq!(
        engine.pause_bono(BonoId(1), "x", now),
        Err(EngineError::BonoNotFound)
    );
}

#[test]
fn new_bundle_finishes_the_previous_one() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    engine
        .create_bono(BonoId(2), UserId(1), PlanKind::Unlimited, 0, dec!(120.00), 1, now)
        .unwrap();

    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Finished);

    let user = engine.get_user(&UserId(1)).unwrap();
    assert_eq!(user.active_bono, Some(BonoId(2)));
    assert_eq!(user.bono_history, vec![BonoId(1), BonoId(2)]);
}

#[test]
fn cancellation_refund_never_displaces_a_newer_bundle() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::DropIn, 1, dec!(12.00), 1, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    give_ten_sessions(&engine, 2, 1, now);

    // The old bundle was force-finished; the refund is forfeited and the
    // new bundle stays linked.
    engine.cancel(ClassId(1), UserId(1), false, now).unwrap();

    let user = engine.get_user(&UserId(1)).unwrap();
    assert_eq!(user.active_bono, Some(BonoId(2)));
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Finished);
}

#[test]
fn unlimited_bundle_books_without_accounting() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    add_yoga(&engine, 12, now);
    engine
        .create_bono(BonoId(1), UserId(1), PlanKind::Unlimited, 0, dec!(120.00), 1, now)
        .unwrap();

    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    let bono = engine.get_bono(&BonoId(1)).unwrap();
    assert_eq!(bono.status, BonoStatus::Active);
    assert_eq!(bono.sessions_remaining, 0);

    // Cancellation still counts as refunded, with nothing to return.
    let class = engine.cancel(ClassId(1), UserId(1), false, now).unwrap();
    assert!(class.history[0].refunded);
}

#[test]
fn sweep_expires_open_bundles() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    register_member(&engine, 2, now);
    give_ten_sessions(&engine, 1, 1, now);
    engine
        .create_bono(BonoId(2), UserId(2), PlanKind::TenSessions, 10, dec!(80.00), 6, now)
        .unwrap();

    let later = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
    let changed = engine.sweep_expired(later);
    assert_eq!(changed, 1);

    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Expired);
    assert_eq!(engine.get_bono(&BonoId(2)).unwrap().status, BonoStatus::Active);
    assert_eq!(engine.get_user(&UserId(1)).unwrap().active_bono, None);

    // A second sweep with the same clock changes nothing.
    assert_eq!(engine.sweep_expired(later), 0);
}

#[test]
fn paused_bundle_survives_sweep() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    engine.pause_bono(BonoId(1), "surgery", now).unwrap();

    let much_later = Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap();
    assert_eq!(engine.sweep_expired(much_later), 0);
    assert_eq!(engine.get_bono(&BonoId(1)).unwrap().status, BonoStatus::Paused);
}

#[test]
fn grant_requires_active_account() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    engine
        .set_account_status(UserId(1), gym_ledger_rs::AccountStatus::Inactive)
        .unwrap();

    let result = engine.grant_free_sessions(UserId(1), 1, "comp", None, None, now);
    assert_eq!(result, Err(EngineError::InactiveUser));
}

#[test]
fn bono_stats_count_by_status() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    register_member(&engine, 2, now);
    register_member(&engine, 3, now);
    give_ten_sessions(&engine, 1, 1, now);
    give_ten_sessions(&engine, 2, 2, now);
    give_ten_sessions(&engine, 3, 3, now);
    engine.pause_bono(BonoId(2), "trip", now).unwrap();

    let stats = engine.bono_stats(now + Duration::days(3));
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.paused, 1);
    assert_eq!(stats.sessions_remaining, 30);
    assert_eq!(stats.paused_days_accrued, 3);
}

#[test]
fn journal_records_workflow_in_order() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    add_yoga(&engine, 12, now);
    engine.enroll(ClassId(1), UserId(1), false, now).unwrap();
    engine.cancel(ClassId(1), UserId(1), false, now).unwrap();

    let entries = engine.drain_journal();
    assert_eq!(entries.len(), 5);
    assert!(matches!(
        entries[3].event,
        gym_ledger_rs::JournalEvent::Enrolled {
            mode: ConsumptionMode::Bundle { bono: BonoId(1) },
            ..
        }
    ));
    assert!(matches!(
        entries[4].event,
        gym_ledger_rs::JournalEvent::Cancelled { refunded: true, .. }
    ));
}

#[test]
fn bono_history_returns_all_bundles_synced() {
    let engine = Engine::new();
    let now = monday_morning();
    register_member(&engine, 1, now);
    give_ten_sessions(&engine, 1, 1, now);
    engine
        .create_bono(BonoId(2), UserId(1), PlanKind::TwentySessions, 20, dec!(140.00), 3, now)
        .unwrap();

    let history = engine.bono_history(UserId(1), now).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, BonoStatus::Finished);
    assert_eq!(history[1].status, BonoStatus::Active);
}
