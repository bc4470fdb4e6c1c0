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

//! Ordered journal of state-changing engine operations.
//!
//! Backed by a lock-free [`SegQueue`], so recording never contends with the
//! entity stores. The journal is append-only and drained for reporting.

use crate::base::{BonoId, ClassId, UserId};
use crate::class::ConsumptionMode;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use serde::Serialize;

/// What happened, with just enough detail for an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    UserRegistered { user: UserId },
    ClassAdded { class: ClassId },
    BonoCreated { bono: BonoId, user: UserId },
    BonoPaused { bono: BonoId },
    BonoReactivated { bono: BonoId, extension_days: u32 },
    SessionsAdded { bono: BonoId, quantity: u32 },
    FreeSessionsGranted { user: UserId, quantity: u32 },
    FreeSessionsRevoked { user: UserId, quantity: u32 },
    Enrolled { class: ClassId, user: UserId, mode: ConsumptionMode },
    Cancelled { class: ClassId, user: UserId, refunded: bool },
    SweepCompleted { changed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Thread-safe append-only operation journal.
#[derive(Debug, Default)]
pub struct Journal {
    entries: SegQueue<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            entries: SegQueue::new(),
        }
    }

    pub fn record(&self, at: DateTime<Utc>, event: JournalEvent) {
        self.entries.push(JournalEntry { at, event });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns all entries in insertion order.
    pub fn drain(&self) -> Vec<JournalEntry> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            drained.push(entry);
        }
        drained
    }
}
