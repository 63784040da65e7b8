use ulid::Ulid;

use crate::model::*;

use super::status;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_space(&self, space_id: Ulid) -> Result<SpaceInfo, EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.read().await;
        let live = status::project(&guard, self.now_ms());
        Ok(guard.info(live))
    }

    pub async fn list_spaces(&self) -> Vec<SpaceInfo> {
        let now = self.now_ms();
        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            infos.push(guard.info(status::project(&guard, now)));
        }
        infos
    }

    /// Live status plus a privacy-trimmed view of the current occupancy.
    /// The occupant's email never leaves the engine on this path.
    pub async fn room_status(&self, space_id: Ulid) -> Result<RoomStatusView, EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.read().await;
        let live = status::project(&guard, self.now_ms());
        let occupant = guard.occupant().map(|r| Occupant {
            reservation_id: r.id,
            requester_id: r.requester.id.clone(),
            requester_name: r.requester.name.clone(),
            window: r.window,
            check_in_time: r.check_in_time,
        });
        Ok(RoomStatusView {
            space: guard.info(live),
            occupied: occupant.is_some(),
            occupant,
        })
    }

    /// Students may read only their own reservations; staff read any.
    pub async fn get_reservation(
        &self,
        reservation_id: Ulid,
        requester_id: &str,
        role: Role,
    ) -> Result<Reservation, EngineError> {
        let space_id = self
            .space_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let guard = ss.read().await;
        let reservation = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if role == Role::Student && reservation.requester.id != requester_id {
            return Err(EngineError::Authorization("not the reservation owner"));
        }
        Ok(reservation.clone())
    }

    /// Every reservation created by `requester_id`, oldest window first.
    pub async fn reservations_for(&self, requester_id: &str) -> Vec<Reservation> {
        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut mine = Vec::new();
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            mine.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.requester.id == requester_id)
                    .cloned(),
            );
        }
        mine.sort_by_key(|r| (r.window.start, r.id));
        mine
    }

    /// Every reservation across every space, oldest window first. Admin only.
    pub async fn all_reservations(&self, role: Role) -> Result<Vec<Reservation>, EngineError> {
        if role != Role::Admin {
            return Err(EngineError::Authorization("admin role required"));
        }
        let mut ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let mut all = Vec::new();
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            all.extend(guard.reservations.iter().cloned());
        }
        all.sort_by_key(|r| (r.window.start, r.id));
        Ok(all)
    }

    /// All reservations on a space, optionally restricted to those
    /// overlapping `within`. History included.
    pub async fn space_reservations(
        &self,
        space_id: Ulid,
        within: Option<Window>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.read().await;
        Ok(match within {
            Some(w) => guard.overlapping(&w).cloned().collect(),
            None => guard.reservations.clone(),
        })
    }
}
