use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::check_no_overlap;
use super::validate::{validate_proposal, validate_room_id};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Admit a new reservation if it is well-formed, in the future, and free
    /// in its room. The id is generated here.
    ///
    /// The room's write lock is held from the overlap check through the WAL
    /// append and the insert, so concurrent overlapping requests for the same
    /// room admit exactly one.
    pub async fn create_reservation(
        &self,
        room_id: String,
        start_time: TimeInput,
        end_time: TimeInput,
    ) -> Result<Reservation, EngineError> {
        let result = self.admit(room_id, start_time, end_time).await;
        match &result {
            Ok(r) => {
                info!(
                    "admitted reservation {} in room {} [{}, {})",
                    r.id, r.room_id, r.start_time, r.end_time
                );
                metrics::counter!(observability::RESERVATIONS_ADMITTED_TOTAL).increment(1);
                metrics::gauge!(observability::RESERVATIONS_ACTIVE)
                    .set(self.store.reservation_count() as f64);
            }
            Err(e) => {
                if e.is_client_error() {
                    debug!("rejected reservation: {e}");
                } else {
                    error!("reservation failed: {e}");
                }
                metrics::counter!(
                    observability::RESERVATIONS_REJECTED_TOTAL,
                    "reason" => observability::rejection_label(e)
                )
                .increment(1);
            }
        }
        result
    }

    async fn admit(
        &self,
        room_id: String,
        start_time: TimeInput,
        end_time: TimeInput,
    ) -> Result<Reservation, EngineError> {
        let span = validate_proposal(&start_time, &end_time, Utc::now())?;
        validate_room_id(&room_id)?;

        let _gate = self.compaction_gate.read().await;
        let rs = self.store.room(&room_id)?;
        let mut guard = rs.write_owned().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }
        self.store.check_room_capacity(&guard)?;

        check_no_overlap(&guard, &span)?;

        let id = Ulid::new();
        if self.store.contains_reservation(&id) {
            return Err(EngineError::Conflict(id));
        }
        let reservation = Reservation {
            id,
            room_id,
            start_time: span.start,
            end_time: span.end,
        };
        self.wal_append(&Event::ReservationCreated {
            id,
            room_id: reservation.room_id.clone(),
            start_time: reservation.start_time,
            end_time: reservation.end_time,
        })
        .await?;
        self.store.insert(&mut guard, reservation.clone())?;
        Ok(reservation)
    }

    /// Remove a reservation, returning what was removed.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let room_id = self
            .store
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write_owned().await;
        // A concurrent cancel may have won between the lookup and the lock.
        let existing = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        self.wal_append(&Event::ReservationCancelled { id, room_id })
            .await?;
        if !self.store.delete_by_id(&mut guard, id) {
            return Err(EngineError::NotFound(id));
        }

        info!("cancelled reservation {id} in room {}", existing.room_id);
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        metrics::gauge!(observability::RESERVATIONS_ACTIVE)
            .set(self.store.reservation_count() as f64);
        Ok(existing)
    }

    /// Rewrite the WAL with one creation event per active reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut room_ids = self.store.room_ids();
        room_ids.sort();
        let mut events = Vec::with_capacity(self.store.reservation_count());
        for room_id in room_ids {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                id: r.id,
                room_id: r.room_id.clone(),
                start_time: r.start_time,
                end_time: r.end_time,
            }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
