use crate::model::*;

use super::EngineError;

/// Any active reservation intersecting `span` (half-open on both sides).
/// When several intersect, which one comes back is unspecified.
pub fn find_overlapping<'a>(room: &'a RoomState, span: &Span) -> Option<&'a Reservation> {
    room.overlapping(span).next()
}

pub(crate) fn check_no_overlap(room: &RoomState, span: &Span) -> Result<(), EngineError> {
    match find_overlapping(room, span) {
        Some(_) => Err(EngineError::Overlap {
            room_id: room.room_id.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn at(hour: u32, min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 1, 1, hour, min, 0).unwrap().into()
    }

    fn room_with(spans: &[(Timestamp, Timestamp)]) -> RoomState {
        let mut room = RoomState::new("A".into());
        for &(start_time, end_time) in spans {
            room.insert_reservation(Reservation {
                id: Ulid::new(),
                room_id: "A".into(),
                start_time,
                end_time,
            });
        }
        room
    }

    #[test]
    fn partial_overlap_detected() {
        let room = room_with(&[(at(10, 0), at(11, 0))]);
        let span = Span::new(at(10, 30), at(11, 30));
        assert!(find_overlapping(&room, &span).is_some());
        assert_eq!(
            check_no_overlap(&room, &span),
            Err(EngineError::Overlap { room_id: "A".into() })
        );
    }

    #[test]
    fn containment_detected_both_ways() {
        let room = room_with(&[(at(10, 0), at(11, 0))]);
        assert!(find_overlapping(&room, &Span::new(at(9, 0), at(12, 0))).is_some());
        assert!(find_overlapping(&room, &Span::new(at(10, 15), at(10, 45))).is_some());
        assert!(find_overlapping(&room, &Span::new(at(10, 0), at(11, 0))).is_some());
    }

    #[test]
    fn adjacent_on_either_side_allowed() {
        let room = room_with(&[(at(10, 0), at(11, 0))]);
        assert!(check_no_overlap(&room, &Span::new(at(11, 0), at(12, 0))).is_ok());
        assert!(check_no_overlap(&room, &Span::new(at(9, 0), at(10, 0))).is_ok());
    }

    #[test]
    fn gap_between_bookings_allowed() {
        let room = room_with(&[(at(9, 0), at(10, 0)), (at(11, 0), at(12, 0))]);
        assert!(check_no_overlap(&room, &Span::new(at(10, 0), at(11, 0))).is_ok());
        assert!(check_no_overlap(&room, &Span::new(at(10, 0), at(11, 1))).is_err());
    }

    #[test]
    fn multiple_overlaps_still_reported() {
        let room = room_with(&[(at(9, 0), at(10, 0)), (at(10, 0), at(11, 0))]);
        let hit = find_overlapping(&room, &Span::new(at(9, 30), at(10, 30))).unwrap();
        assert!(hit.start_time == at(9, 0) || hit.start_time == at(10, 0));
    }

    #[test]
    fn empty_room_never_overlaps() {
        let room = room_with(&[]);
        assert!(check_no_overlap(&room, &Span::new(at(0, 0), at(23, 0))).is_ok());
    }
}
