use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Reservation records, partitioned by room.
///
/// Each room sits behind its own lock; mutating methods take the already
/// locked `RoomState` so callers decide how long the lock is held. Room
/// entries are never removed, so one room id always maps to one lock.
/// `MAX_ROOMS` therefore bounds rooms holding reservations, not map entries.
pub struct InMemoryStore {
    rooms: DashMap<String, SharedRoomState>,
    /// Reverse lookup: reservation id → room id
    reservation_to_room: DashMap<Ulid, String>,
    /// Rooms with at least one reservation. Changes only under a room write lock.
    active_rooms: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            active_rooms: AtomicUsize::new(0),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Acquire)
    }

    /// Whether a reservation may be added to `room` without exceeding `MAX_ROOMS`.
    pub fn check_room_capacity(&self, room: &RoomState) -> Result<(), EngineError> {
        if room.reservations.is_empty() && self.active_room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        Ok(())
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get_room(&self, room_id: &str) -> Option<SharedRoomState> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    /// Get or create the room's shared state. A new entry is refused while
    /// `MAX_ROOMS` rooms already hold reservations.
    pub fn room(&self, room_id: &str) -> Result<SharedRoomState, EngineError> {
        if let Some(rs) = self.get_room(room_id) {
            return Ok(rs);
        }
        if self.active_room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        Ok(self.room_or_insert(room_id))
    }

    pub(super) fn room_or_insert(&self, room_id: &str) -> SharedRoomState {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(RoomState::new(room_id.to_string()))))
            .value()
            .clone()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_room.len()
    }

    pub fn contains_reservation(&self, id: &Ulid) -> bool {
        self.reservation_to_room.contains_key(id)
    }

    pub fn room_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_room.get(id).map(|e| e.value().clone())
    }

    // ── Record operations (caller holds the room lock) ───────

    pub fn insert(&self, room: &mut RoomState, reservation: Reservation) -> Result<(), EngineError> {
        debug_assert_eq!(room.room_id, reservation.room_id);
        match self.reservation_to_room.entry(reservation.id) {
            Entry::Occupied(_) => Err(EngineError::Conflict(reservation.id)),
            Entry::Vacant(slot) => {
                slot.insert(reservation.room_id.clone());
                if room.reservations.is_empty() {
                    self.active_rooms.fetch_add(1, Ordering::AcqRel);
                }
                room.insert_reservation(reservation);
                Ok(())
            }
        }
    }

    pub fn delete_by_id(&self, room: &mut RoomState, id: Ulid) -> bool {
        match room.remove_reservation(id) {
            Some(_) => {
                self.reservation_to_room.remove(&id);
                if room.reservations.is_empty() {
                    self.active_rooms.fetch_sub(1, Ordering::AcqRel);
                }
                true
            }
            None => false,
        }
    }

    pub fn find_overlapping(&self, room: &RoomState, span: &Span) -> Option<Reservation> {
        super::conflict::find_overlapping(room, span).cloned()
    }

    // ── Lookups (take the room read lock) ────────────────────

    pub async fn find_by_id(&self, id: &Ulid) -> Option<Reservation> {
        let room_id = self.room_for_reservation(id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        let found = guard.get(*id).cloned();
        found
    }

    /// Active reservations for the room, ascending by start_time.
    pub async fn find_by_room(&self, room_id: &str) -> Vec<Reservation> {
        let Some(rs) = self.get_room(room_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard.reservations.clone()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a logged event to its (locked) room. Used by replay.
    pub fn apply_event(&self, room: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        match event {
            Event::ReservationCreated {
                id,
                room_id,
                start_time,
                end_time,
            } => self.insert(
                room,
                Reservation {
                    id: *id,
                    room_id: room_id.clone(),
                    start_time: *start_time,
                    end_time: *end_time,
                },
            ),
            Event::ReservationCancelled { id, .. } => {
                self.delete_by_id(room, *id);
                Ok(())
            }
        }
    }
}
