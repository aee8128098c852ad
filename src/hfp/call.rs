// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Call records and the per-session call table.
//!
//! The table is keyed by the AG's call index. It is only rewritten
//! wholesale by [`CallTable::apply_snapshot`], which runs once a `+CLCC`
//! listing has been terminated by its result code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Call state as reported by `+CLCC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Terminated,
}

impl CallState {
    /// Map a `+CLCC` `<stat>` value. Response-and-hold (6) reads as held.
    pub fn from_clcc(code: u8) -> Option<Self> {
        match code {
            0 => Some(CallState::Active),
            1 => Some(CallState::Held),
            2 => Some(CallState::Dialing),
            3 => Some(CallState::Alerting),
            4 => Some(CallState::Incoming),
            5 => Some(CallState::Waiting),
            6 => Some(CallState::Held),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Active => "active",
            CallState::Held => "held",
            CallState::Dialing => "dialing",
            CallState::Alerting => "alerting",
            CallState::Incoming => "incoming",
            CallState::Waiting => "waiting",
            CallState::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn from_clcc(code: u8) -> Option<Self> {
        match code {
            0 => Some(CallDirection::Outgoing),
            1 => Some(CallDirection::Incoming),
            _ => None,
        }
    }
}

/// The AG-owned part of a call record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFields {
    pub direction: CallDirection,
    pub state: CallState,
    pub number: String,
    pub multiparty: bool,
}

/// A call known to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Stable identity; survives the HF-originated placeholder being matched.
    pub id: Uuid,
    /// AG call index. 0 marks a locally dialled call not yet listed by the AG.
    pub index: u32,
    pub direction: CallDirection,
    pub state: CallState,
    pub number: String,
    pub multiparty: bool,
    pub in_band_ring: bool,
    /// Session-relative creation time.
    #[serde(skip)]
    pub created_at: Duration,
}

impl Call {
    pub fn new(index: u32, fields: CallFields, in_band_ring: bool, now: Duration) -> Self {
        let in_band_ring = in_band_ring && fields.direction == CallDirection::Incoming;
        Self {
            id: Uuid::new_v4(),
            index,
            direction: fields.direction,
            state: fields.state,
            number: fields.number,
            multiparty: fields.multiparty,
            in_band_ring,
            created_at: now,
        }
    }

    pub fn fields(&self) -> CallFields {
        CallFields {
            direction: self.direction,
            state: self.state,
            number: self.number.clone(),
            multiparty: self.multiparty,
        }
    }

    fn merge(&mut self, fields: CallFields) -> bool {
        // The AG drops the number from some listings; keep the one we have.
        let number = if fields.number.is_empty() {
            self.number.clone()
        } else {
            fields.number
        };
        let merged = CallFields { number, ..fields };
        if self.fields() == merged {
            return false;
        }
        self.direction = merged.direction;
        self.state = merged.state;
        self.number = merged.number;
        self.multiparty = merged.multiparty;
        true
    }
}

/// Outcome of [`CallTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    Unchanged,
}

/// One entry of a calls-changed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "call", rename_all = "snake_case")]
pub enum CallChange {
    Added(Call),
    Updated(Call),
    Removed(Call),
}

impl CallChange {
    pub fn call(&self) -> &Call {
        match self {
            CallChange::Added(call) | CallChange::Updated(call) | CallChange::Removed(call) => call,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallTable {
    calls: BTreeMap<u32, Call>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or merge the record at `index`.
    ///
    /// `in_band_ring` is only consulted when an incoming record is created.
    pub fn upsert(&mut self, index: u32, fields: CallFields, in_band_ring: bool, now: Duration) -> Upsert {
        match self.calls.get_mut(&index) {
            Some(call) => {
                if call.merge(fields) {
                    Upsert::Updated
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                self.calls.insert(index, Call::new(index, fields, in_band_ring, now));
                Upsert::Created
            }
        }
    }

    /// Remove a record, returning it marked terminated.
    pub fn remove(&mut self, index: u32) -> Option<Call> {
        self.calls.remove(&index).map(|mut call| {
            call.state = CallState::Terminated;
            call
        })
    }

    pub fn get(&self, index: u32) -> Option<&Call> {
        self.calls.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Call> {
        self.calls.get_mut(&index)
    }

    /// Records in index order.
    pub fn list(&self) -> Vec<Call> {
        self.calls.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn count_in_state(&self, state: CallState) -> usize {
        self.calls.values().filter(|c| c.state == state).count()
    }

    /// First record (in index order) whose state is any of `states`.
    pub fn first_matching(&self, states: &[CallState]) -> Option<&Call> {
        self.calls.values().find(|c| states.contains(&c.state))
    }

    /// Drop every record, returning them marked terminated.
    pub fn clear(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|mut call| {
                call.state = CallState::Terminated;
                call
            })
            .collect()
    }

    /// Reconcile the table with a complete call listing.
    ///
    /// Returns removals first, then additions and updates in index order.
    pub fn apply_snapshot(
        &mut self,
        snapshot: BTreeMap<u32, CallFields>,
        in_band_ring: bool,
        now: Duration,
    ) -> Vec<CallChange> {
        let gone: Vec<u32> = self
            .calls
            .keys()
            .filter(|index| !snapshot.contains_key(index))
            .copied()
            .collect();

        let mut changes: Vec<CallChange> = gone
            .into_iter()
            .filter_map(|index| self.remove(index))
            .map(CallChange::Removed)
            .collect();

        for (index, fields) in snapshot {
            match self.upsert(index, fields, in_band_ring, now) {
                Upsert::Created => changes.extend(self.get(index).cloned().map(CallChange::Added)),
                Upsert::Updated => changes.extend(self.get(index).cloned().map(CallChange::Updated)),
                Upsert::Unchanged => {}
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(direction: CallDirection, state: CallState, number: &str) -> CallFields {
        CallFields {
            direction,
            state,
            number: number.to_string(),
            multiparty: false,
        }
    }

    #[test]
    fn test_clcc_mapping() {
        assert_eq!(CallState::from_clcc(4), Some(CallState::Incoming));
        assert_eq!(CallState::from_clcc(6), Some(CallState::Held));
        assert_eq!(CallState::from_clcc(7), None);
        assert_eq!(CallDirection::from_clcc(1), Some(CallDirection::Incoming));
        assert_eq!(CallDirection::from_clcc(2), None);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut table = CallTable::new();
        let f = fields(CallDirection::Incoming, CallState::Incoming, "5551212");

        assert_eq!(table.upsert(1, f.clone(), false, Duration::ZERO), Upsert::Created);
        let before = table.list();
        assert_eq!(table.upsert(1, f, false, Duration::from_secs(1)), Upsert::Unchanged);
        assert_eq!(table.list(), before);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_upsert_merges_known_index() {
        let mut table = CallTable::new();
        table.upsert(1, fields(CallDirection::Incoming, CallState::Incoming, "5551212"), false, Duration::ZERO);
        let id = table.get(1).unwrap().id;

        let outcome = table.upsert(1, fields(CallDirection::Incoming, CallState::Active, ""), false, Duration::ZERO);
        assert_eq!(outcome, Upsert::Updated);
        let call = table.get(1).unwrap();
        assert_eq!(call.state, CallState::Active);
        assert_eq!(call.number, "5551212");
        assert_eq!(call.id, id);
    }

    #[test]
    fn test_in_band_ring_stamped_on_incoming_creation_only() {
        let mut table = CallTable::new();
        table.upsert(1, fields(CallDirection::Incoming, CallState::Incoming, "1"), true, Duration::ZERO);
        table.upsert(2, fields(CallDirection::Outgoing, CallState::Dialing, "2"), true, Duration::ZERO);
        assert!(table.get(1).unwrap().in_band_ring);
        assert!(!table.get(2).unwrap().in_band_ring);

        table.upsert(1, fields(CallDirection::Incoming, CallState::Active, "1"), false, Duration::ZERO);
        assert!(table.get(1).unwrap().in_band_ring);
    }

    #[test]
    fn test_queries() {
        let mut table = CallTable::new();
        table.upsert(1, fields(CallDirection::Outgoing, CallState::Active, "1"), false, Duration::ZERO);
        table.upsert(2, fields(CallDirection::Incoming, CallState::Waiting, "2"), false, Duration::ZERO);
        table.upsert(3, fields(CallDirection::Incoming, CallState::Held, "3"), false, Duration::ZERO);

        assert_eq!(table.count_in_state(CallState::Active), 1);
        assert_eq!(table.count_in_state(CallState::Dialing), 0);
        assert_eq!(
            table.first_matching(&[CallState::Held, CallState::Waiting]).map(|c| c.index),
            Some(2)
        );
        assert!(table.first_matching(&[CallState::Incoming]).is_none());
    }

    #[test]
    fn test_apply_snapshot_diff() {
        let mut table = CallTable::new();
        table.upsert(1, fields(CallDirection::Outgoing, CallState::Active, "1"), false, Duration::ZERO);
        table.upsert(2, fields(CallDirection::Incoming, CallState::Waiting, "2"), false, Duration::ZERO);

        let mut snapshot = BTreeMap::new();
        snapshot.insert(2, fields(CallDirection::Incoming, CallState::Active, "2"));
        snapshot.insert(3, fields(CallDirection::Incoming, CallState::Incoming, "3"));

        let changes = table.apply_snapshot(snapshot, false, Duration::ZERO);
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], CallChange::Removed(c) if c.index == 1 && c.state == CallState::Terminated));
        assert!(matches!(&changes[1], CallChange::Updated(c) if c.index == 2 && c.state == CallState::Active));
        assert!(matches!(&changes[2], CallChange::Added(c) if c.index == 3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_apply_identical_snapshot_is_empty() {
        let mut table = CallTable::new();
        let mut snapshot = BTreeMap::new();
        snapshot.insert(1, fields(CallDirection::Incoming, CallState::Incoming, "5551212"));
        assert_eq!(table.apply_snapshot(snapshot.clone(), false, Duration::ZERO).len(), 1);
        assert!(table.apply_snapshot(snapshot, false, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_clear_terminates() {
        let mut table = CallTable::new();
        table.upsert(1, fields(CallDirection::Incoming, CallState::Active, "1"), false, Duration::ZERO);
        let cleared = table.clear();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].state, CallState::Terminated);
        assert!(table.is_empty());
    }
}
