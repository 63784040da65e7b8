use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_window};
use super::{Engine, EngineError};

/// Ownership rule: the creator may mutate; an admin may mutate any.
fn authorize(reservation: &Reservation, requester_id: &str, role: Role) -> Result<(), EngineError> {
    if role == Role::Admin || reservation.requester.id == requester_id {
        Ok(())
    } else {
        Err(EngineError::Authorization("not the reservation owner"))
    }
}

/// Optimistic-concurrency gate. `None` skips the check; state-machine
/// legality is still re-validated under the space lock either way.
fn check_version(reservation: &Reservation, expected: Option<u64>) -> Result<(), EngineError> {
    if let Some(expected) = expected
        && expected != reservation.version
    {
        return Err(EngineError::StaleState {
            expected,
            actual: reservation.version,
        });
    }
    Ok(())
}

fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn validate_participants(participants: u32, capacity: u32) -> Result<(), EngineError> {
    if participants == 0 {
        return Err(EngineError::Validation("participants must be at least 1"));
    }
    if participants > capacity {
        return Err(EngineError::Validation("participants exceed space capacity"));
    }
    Ok(())
}

impl Engine {
    /// Book a window. The overlap check and the insert happen under one
    /// per-space write guard; two racing creates for the same slot admit
    /// exactly one winner.
    pub async fn create_reservation(
        &self,
        space_id: Ulid,
        requester: Requester,
        start: Ms,
        end: Ms,
        participants: u32,
        purpose: Purpose,
        notes: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let window = validate_window(start, end)?;
        validate_notes(notes.as_deref())?;
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = ss.write().await;
        // The space may have been removed while we waited for the lock.
        if guard.removed {
            return Err(EngineError::NotFound(space_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many reservations on space"));
        }
        validate_participants(participants, guard.capacity)?;
        check_no_conflict(&guard, &window, None)?;

        let now = self.now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            space_id,
            requester,
            window,
            participants,
            purpose,
            notes,
            status: ReservationStatus::Confirmed,
            check_in_time: None,
            check_out_time: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        info!("reservation {} created on space {space_id}", reservation.id);
        Ok(reservation)
    }

    /// Apply a typed patch. A window move re-runs the overlap check
    /// excluding this reservation's own id.
    pub async fn modify_reservation(
        &self,
        reservation_id: Ulid,
        requester_id: &str,
        role: Role,
        patch: ReservationPatch,
        expected_version: Option<u64>,
    ) -> Result<Reservation, EngineError> {
        validate_notes(patch.notes.as_deref())?;
        let (space_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();
        authorize(&current, requester_id, role)?;
        check_version(&current, expected_version)?;
        if current.status == ReservationStatus::CheckedIn || current.status.is_terminal() {
            return Err(EngineError::InvalidState {
                action: "modify",
                status: current.status,
            });
        }

        let window = validate_window(
            patch.start.unwrap_or(current.window.start),
            patch.end.unwrap_or(current.window.end),
        )?;
        let participants = patch.participants.unwrap_or(current.participants);
        validate_participants(participants, guard.capacity)?;
        if window != current.window {
            check_no_conflict(&guard, &window, Some(reservation_id))?;
        }

        let now = self.now_ms();
        let event = Event::ReservationModified {
            space_id,
            id: reservation_id,
            window,
            participants,
            purpose: patch.purpose.unwrap_or(current.purpose),
            notes: patch.notes.or(current.notes),
            at: now,
            version: current.version + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))
    }

    /// Cancel a reservation. A checked-in occupant must check out instead.
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        requester_id: &str,
        role: Role,
        expected_version: Option<u64>,
    ) -> Result<(), EngineError> {
        let (space_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();
        authorize(&current, requester_id, role)?;
        check_version(&current, expected_version)?;
        if current.status == ReservationStatus::CheckedIn || current.status.is_terminal() {
            return Err(EngineError::InvalidState {
                action: "cancel",
                status: current.status,
            });
        }

        let now = self.now_ms();
        let event = Event::ReservationCancelled {
            space_id,
            id: reservation_id,
            at: now,
            version: current.version + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        info!("reservation {reservation_id} cancelled");
        Ok(())
    }

    /// Check in. The window is `[start − early margin, end]`; both bounds
    /// are inclusive of their instant.
    pub async fn check_in(
        &self,
        reservation_id: Ulid,
        requester_id: &str,
        role: Role,
    ) -> Result<Reservation, EngineError> {
        let (space_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();
        authorize(&current, requester_id, role)?;
        if current.status != ReservationStatus::Confirmed {
            return Err(EngineError::InvalidState {
                action: "check in",
                status: current.status,
            });
        }

        let now = self.now_ms();
        let opens_at = current.window.start - CHECK_IN_EARLY_MS;
        if now < opens_at {
            return Err(EngineError::TooEarly { opens_at });
        }
        if now > current.window.end {
            return Err(EngineError::Expired {
                closed_at: current.window.end,
            });
        }

        let event = Event::CheckedIn {
            space_id,
            id: reservation_id,
            at: now,
            version: current.version + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        info!("reservation {reservation_id} checked in on space {space_id}");
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))
    }

    /// Check out. Only legal from checked-in; a second call is an
    /// `InvalidState`, which makes the operation externally idempotent.
    pub async fn check_out(
        &self,
        reservation_id: Ulid,
        requester_id: &str,
        role: Role,
    ) -> Result<Reservation, EngineError> {
        let (space_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();
        authorize(&current, requester_id, role)?;
        if current.status != ReservationStatus::CheckedIn {
            return Err(EngineError::InvalidState {
                action: "check out",
                status: current.status,
            });
        }

        let now = self.now_ms();
        let event = Event::CheckedOut {
            space_id,
            id: reservation_id,
            at: now,
            version: current.version + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        info!("reservation {reservation_id} checked out of space {space_id}");
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))
    }

    /// Background policy: a confirmed reservation never checked in within
    /// the grace period past its start stops claiming its window.
    pub async fn mark_no_show(&self, reservation_id: Ulid) -> Result<(), EngineError> {
        let (space_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();
        if current.status != ReservationStatus::Confirmed {
            return Err(EngineError::InvalidState {
                action: "mark no-show",
                status: current.status,
            });
        }

        let now = self.now_ms();
        let eligible_at = current.window.start + NO_SHOW_GRACE_MS;
        if now < eligible_at {
            return Err(EngineError::TooEarly {
                opens_at: eligible_at,
            });
        }

        let event = Event::NoShowMarked {
            space_id,
            id: reservation_id,
            at: now,
            version: current.version + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        self.project_status(&mut guard, now).await?;
        metrics::counter!(observability::NO_SHOWS_TOTAL).increment(1);
        info!("reservation {reservation_id} marked no-show");
        Ok(())
    }

    /// Sweep candidates: confirmed, past the grace period, never checked in.
    /// Contended spaces are skipped and picked up on the next pass.
    pub fn collect_overdue(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut overdue = Vec::new();
        for entry in self.spaces.iter() {
            let ss = entry.value().clone();
            if let Ok(guard) = ss.try_read() {
                for r in &guard.reservations {
                    if r.status == ReservationStatus::Confirmed
                        && now >= r.window.start + NO_SHOW_GRACE_MS
                    {
                        overdue.push((r.id, guard.id));
                    }
                }
            }
        }
        overdue
    }
}
