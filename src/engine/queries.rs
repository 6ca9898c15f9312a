use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Active reservations for a room, ascending by start_time.
    /// An unknown room has no reservations.
    pub async fn list_reservations_for_room(&self, room_id: &str) -> Vec<Reservation> {
        self.store.find_by_room(room_id).await
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .find_by_id(&id)
            .await
            .ok_or(EngineError::NotFound(id))
    }

    /// Rooms with at least one active reservation, ordered by room id.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms = Vec::new();
        for room_id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            let reservation_count = rs.read().await.reservations.len();
            if reservation_count > 0 {
                rooms.push(RoomInfo {
                    room_id,
                    reservation_count,
                });
            }
        }
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}
