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

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use gym_ledger_rs::{BonoId, ClassId, Engine, PlanKind, Role, Schedule, UserId};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Gym Ledger - Replay gym operation CSV files
///
/// Reads operations from a CSV file and outputs member summaries to stdout.
/// Supports member/class/bundle administration, enrollments, cancellations,
/// free-session grants, and expiration sweeps.
#[derive(Parser, Debug)]
#[command(name = "gym-ledger-rs")]
#[command(about = "A session-credit engine that replays gym operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,user,class,bono,plan,qty,price,name,email,role,text,at
    /// Example: cargo run -- operations.csv > members.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Dump the operation journal to stderr after the replay
    #[arg(long)]
    journal: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_operations(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_members(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if args.journal {
        for entry in engine.drain_journal() {
            eprintln!("{} {:?}", entry.at.to_rfc3339(), entry.event);
        }
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, class, bono, plan, qty, price, name, email, role, text, at`.
/// Only `op` is required; each operation reads the columns it needs.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    user: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    class: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    bono: Option<u32>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    qty: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    price: Option<Decimal>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    at: Option<DateTime<Utc>>,
}

/// Parses `"mon 18:00"` (weekly) or `"2026-03-09 18:00"` (one-off).
fn parse_schedule(text: &str) -> Option<Schedule> {
    let (day, time) = text.trim().split_once(' ')?;
    let start_time = NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()?;
    if let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        return Some(Schedule::on_date(date, start_time));
    }
    let weekday: Weekday = day.parse().ok()?;
    Some(Schedule::weekly(weekday, start_time))
}

/// Applies one CSV record to the engine.
///
/// Returns `false` when the record is missing a required column or names an
/// unknown operation; workflow errors from the engine are reported by the
/// caller instead.
fn apply_operation(engine: &Engine, record: CsvRecord) -> Option<Result<(), String>> {
    let now = record.at.unwrap_or_else(Utc::now);

    // Enroll/cancel act with the member's registered role.
    let staff_flag = |user: UserId| {
        engine
            .get_user(&user)
            .map(|u| u.role.is_staff())
            .unwrap_or(false)
    };

    let outcome = match record.op.to_lowercase().as_str() {
        "register" => {
            let user = UserId(record.user?);
            let name = record.name?;
            let email = record.email?;
            let role: Role = record.role.as_deref().unwrap_or("member").parse().ok()?;
            engine
                .register_user(user, &name, &email, role, now)
                .map_err(|e| e.to_string())
        }
        "class" => {
            let class = ClassId(record.class?);
            let name = record.name?;
            let capacity = record.qty? as usize;
            let schedule = parse_schedule(record.text.as_deref()?)?;
            engine
                .add_class(class, &name, capacity, schedule, now)
                .map_err(|e| e.to_string())
        }
        "bono" => {
            let bono = BonoId(record.bono?);
            let user = UserId(record.user?);
            let plan: PlanKind = record.plan.as_deref()?.parse().ok()?;
            let months = record.qty.unwrap_or(1);
            let price = record.price.unwrap_or_default();
            engine
                .create_bono(bono, user, plan, plan.default_sessions(), price, months, now)
                .map_err(|e| e.to_string())
        }
        "pause" => {
            let bono = BonoId(record.bono?);
            let reason = record.text.unwrap_or_default();
            engine.pause_bono(bono, &reason, now).map_err(|e| e.to_string())
        }
        "reactivate" => {
            let bono = BonoId(record.bono?);
            engine
                .reactivate_bono(bono, record.qty, now)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "add-sessions" => {
            let bono = BonoId(record.bono?);
            engine
                .add_sessions(bono, record.qty?, now)
                .map_err(|e| e.to_string())
        }
        "grant-free" => {
            let user = UserId(record.user?);
            let reason = record.text.unwrap_or_default();
            engine
                .grant_free_sessions(user, record.qty?, &reason, None, None, now)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "revoke-free" => {
            let user = UserId(record.user?);
            let reason = record.text.unwrap_or_default();
            engine
                .revoke_free_sessions(user, record.qty?, &reason, None, now)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "enroll" => {
            let class = ClassId(record.class?);
            let user = UserId(record.user?);
            let staff = staff_flag(user);
            engine
                .enroll(class, user, staff, now)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "cancel" => {
            let class = ClassId(record.class?);
            let user = UserId(record.user?);
            let staff = staff_flag(user);
            engine
                .cancel(class, user, staff, now)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        "sweep" => {
            engine.sweep_expired(now);
            Ok(())
        }
        _ => return None,
    };
    Some(outcome)
}

/// Process operations from a CSV reader.
///
/// This function uses streaming parsing, so replay files of any size work
/// without loading everything into memory. Malformed rows and unknown
/// operations are silently skipped; workflow rejections (full class, no
/// eligible credit, and so on) are logged in debug mode but don't stop the
/// replay.
///
/// # CSV Format
///
/// Expected columns: `op, user, class, bono, plan, qty, price, name, email,
/// role, text, at`. Unused columns may be left empty.
///
/// # Example
///
/// ```csv
/// op,user,class,bono,plan,qty,price,name,email,role,text,at
/// register,1,,,,,,Ana,ana@example.com,member,,
/// class,,1,,,12,,Yoga,,,mon 18:00,
/// bono,1,,1,10-sessions,1,80.00,,,,,
/// enroll,1,1,,,,,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => match apply_operation(&engine, record) {
                Some(Ok(())) => {}
                Some(Err(_e)) => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping rejected operation: {}", _e);
                }
                None => {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid operation record");
                }
            },
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Write member summaries to a CSV writer.
///
/// # CSV Format
///
/// Columns: `member, name, role, account_status, free_sessions, bono,
/// bono_status, sessions_remaining`, sorted by member ID.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_members<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for summary in engine.member_summaries(Utc::now()) {
        wtr.serialize(&summary)?;
    }

    wtr.flush()?;
    Ok(())
}
