use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::EngineError;

/// Validate a reservation window and return it.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Window, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("window start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let window = Window::new(start, end);
    if window.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(window)
}

/// Same ordering and bound rules as a reservation window, with the wider
/// duration cap that applies to search queries.
pub(crate) fn validate_query_window(start: Ms, end: Ms) -> Result<Window, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("window start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let window = Window::new(start, end);
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

/// First active reservation overlapping `window`, skipping `exclude`.
/// Only statuses in the active set ({confirmed, checked_in}) claim their
/// window; historical records never conflict.
pub(crate) fn find_conflict(
    space: &SpaceState,
    window: &Window,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    space
        .overlapping(window)
        .find(|r| r.status.is_active() && exclude != Some(r.id))
        .map(|r| r.id)
}

pub(crate) fn check_no_conflict(
    space: &SpaceState,
    window: &Window,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(space, window, exclude) {
        Some(id) => {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn requester() -> Requester {
        Requester {
            id: "s-1".into(),
            name: "Chi".into(),
            email: "chi@example.edu".into(),
        }
    }

    fn reservation(space: &SpaceState, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            space_id: space.id,
            requester: requester(),
            window: Window::new(start, end),
            participants: 1,
            purpose: Purpose::IndividualStudy,
            notes: None,
            status,
            check_in_time: None,
            check_out_time: None,
            created_at: 0,
            updated_at: 0,
            version: 1,
        }
    }

    fn space() -> SpaceState {
        SpaceState::new(
            Ulid::new(),
            "C-301".into(),
            Location {
                building: "C".into(),
                floor: 3,
                room_number: "301".into(),
            },
            4,
            SpaceType::Individual,
            vec![],
            None,
        )
    }

    #[test]
    fn validate_window_rejects_inverted() {
        assert!(matches!(
            validate_window(2 * H, H),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_window(H, H),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn validate_window_rejects_out_of_range() {
        assert!(matches!(
            validate_window(-5, H),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(0, MAX_VALID_TIMESTAMP_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn validate_window_rejects_too_wide() {
        assert!(matches!(
            validate_window(0, MAX_WINDOW_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_window(0, MAX_WINDOW_DURATION_MS).is_ok());
    }

    #[test]
    fn query_window_allows_wider_span() {
        assert!(validate_query_window(0, MAX_WINDOW_DURATION_MS + 1).is_ok());
        assert!(matches!(
            validate_query_window(0, MAX_QUERY_WINDOW_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn adjacent_windows_do_not_conflict() {
        let mut s = space();
        s.insert_reservation(reservation(&s, 10 * H, 11 * H, ReservationStatus::Confirmed));
        // [11:00, 12:00) touches [10:00, 11:00) at the boundary only
        assert!(find_conflict(&s, &Window::new(11 * H, 12 * H), None).is_none());
        // one minute of overlap conflicts
        assert!(find_conflict(&s, &Window::new(10 * H + 3_540_000, 12 * H), None).is_some());
    }

    #[test]
    fn historical_statuses_do_not_conflict() {
        let mut s = space();
        for status in [
            ReservationStatus::Cancelled,
            ReservationStatus::CheckedOut,
            ReservationStatus::NoShow,
            ReservationStatus::Pending,
        ] {
            s.insert_reservation(reservation(&s, H, 2 * H, status));
        }
        assert!(find_conflict(&s, &Window::new(H, 2 * H), None).is_none());
    }

    #[test]
    fn checked_in_conflicts() {
        let mut s = space();
        let r = reservation(&s, H, 2 * H, ReservationStatus::CheckedIn);
        let id = r.id;
        s.insert_reservation(r);
        assert_eq!(find_conflict(&s, &Window::new(H, 90 * 60_000), None), Some(id));
    }

    #[test]
    fn exclude_skips_own_id() {
        let mut s = space();
        let r = reservation(&s, H, 2 * H, ReservationStatus::Confirmed);
        let id = r.id;
        s.insert_reservation(r);
        // A reservation re-checking its own (possibly shifted) window must
        // not collide with itself, but must with anyone else.
        assert!(find_conflict(&s, &Window::new(H, 3 * H), Some(id)).is_none());
        let other = reservation(&s, 2 * H, 3 * H, ReservationStatus::Confirmed);
        let other_id = other.id;
        s.insert_reservation(other);
        assert_eq!(
            find_conflict(&s, &Window::new(H, 3 * H), Some(id)),
            Some(other_id)
        );
    }

    #[test]
    fn check_no_conflict_maps_to_error() {
        let mut s = space();
        let r = reservation(&s, H, 2 * H, ReservationStatus::Confirmed);
        let id = r.id;
        s.insert_reservation(r);
        match check_no_conflict(&s, &Window::new(H, 2 * H), None) {
            Err(EngineError::Conflict(found)) => assert_eq!(found, id),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
