use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// Derivation with the override ignored. Check-in claims the room outright;
/// a merely confirmed reservation claims it only while its window covers `now`.
pub(super) fn derive(space: &SpaceState, now: Ms) -> SpaceStatus {
    if space.occupant().is_some() {
        return SpaceStatus::InUse;
    }
    if space
        .reservations
        .iter()
        .any(|r| r.status.is_active() && r.window.contains_instant(now))
    {
        return SpaceStatus::Reserved;
    }
    SpaceStatus::Empty
}

/// Live status of a space at `now`. An active maintenance override takes
/// precedence over the derivation until explicitly cleared.
pub(super) fn project(space: &SpaceState, now: Ms) -> SpaceStatus {
    if space.override_active {
        return SpaceStatus::Maintenance;
    }
    derive(space, now)
}

impl Engine {
    /// Recompute and persist the space's status. Runs under the same write
    /// guard as the lifecycle event that triggered it; idempotent (no event
    /// when the status is unchanged). The write is retried once on failure
    /// and then surfaced — the triggering reservation write is never rolled
    /// back, and the sweeper re-persists drift on its next pass.
    pub(super) async fn project_status(
        &self,
        space: &mut SpaceState,
        now: Ms,
    ) -> Result<(), EngineError> {
        let derived = project(space, now);
        if derived == space.status {
            return Ok(());
        }
        let event = Event::StatusProjected {
            space_id: space.id,
            seq: space.status_seq + 1,
            status: derived,
        };
        if let Err(first) = self.persist_and_apply(space.id, space, &event).await {
            warn!(
                "status projection for space {} failed ({first}), retrying once",
                space.id
            );
            metrics::counter!(observability::PROJECTION_RETRIES_TOTAL).increment(1);
            self.persist_and_apply(space.id, space, &event).await?;
        }
        debug!("space {} now {}", space.id, derived.label());
        Ok(())
    }

    /// Set the maintenance override. Trusted channel (admin or IoT);
    /// idempotent while already in force.
    pub async fn set_maintenance(&self, space_id: Ulid) -> Result<(), EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = ss.write().await;
        if guard.removed {
            return Err(EngineError::NotFound(space_id));
        }
        if guard.override_active {
            return Ok(());
        }
        let event = Event::OverrideSet {
            space_id,
            seq: guard.status_seq + 1,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        info!("maintenance override set on space {space_id}");
        Ok(())
    }

    /// Clear the override and persist the re-derived status.
    pub async fn clear_maintenance(&self, space_id: Ulid) -> Result<(), EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = ss.write().await;
        if guard.removed {
            return Err(EngineError::NotFound(space_id));
        }
        if !guard.override_active {
            return Ok(());
        }
        let status = derive(&guard, self.now_ms());
        let event = Event::OverrideCleared {
            space_id,
            seq: guard.status_seq + 1,
            status,
        };
        self.persist_and_apply(space_id, &mut guard, &event).await?;
        info!(
            "maintenance override cleared on space {space_id}, back to {}",
            status.label()
        );
        Ok(())
    }

    /// Persist statuses whose time-dependent derivation has drifted since
    /// the last event (a window beginning or ending with nothing else
    /// happening). Called by the sweeper; returns the number repersisted.
    pub async fn reproject_spaces(&self) -> usize {
        let now = self.now_ms();
        let ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        let mut changed = 0;
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let mut guard = ss.write().await;
            if guard.removed || project(&guard, now) == guard.status {
                continue;
            }
            match self.project_status(&mut guard, now).await {
                Ok(()) => changed += 1,
                Err(e) => warn!("sweep: reprojection failed for space {id}: {e}"),
            }
        }
        changed
    }
}
