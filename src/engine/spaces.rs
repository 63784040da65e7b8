use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("space name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("space name too long"));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), EngineError> {
    if let Some(d) = description
        && d.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

impl Engine {
    /// Register a space. Names are unique across the engine.
    pub async fn register_space(
        &self,
        name: String,
        location: Location,
        capacity: u32,
        kind: SpaceType,
        facilities: Vec<Facility>,
        description: Option<String>,
    ) -> Result<Ulid, EngineError> {
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        validate_name(&name)?;
        validate_description(description.as_deref())?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }

        let id = Ulid::new();
        // The name index doubles as the registration mutex: the entry API
        // makes check-and-claim atomic per name.
        match self.names.entry(name.clone()) {
            Entry::Occupied(e) => return Err(EngineError::AlreadyExists(*e.get())),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::SpaceRegistered {
            id,
            name: name.clone(),
            location: location.clone(),
            capacity,
            kind,
            facilities: facilities.clone(),
            description: description.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.names.remove(&name);
            return Err(e);
        }
        let ss = SpaceState::new(id, name, location, capacity, kind, facilities, description);
        self.spaces.insert(id, Arc::new(RwLock::new(ss)));
        self.notify.send(id, &event);
        metrics::gauge!(observability::SPACES_ACTIVE).set(self.spaces.len() as f64);
        info!("registered space {id}");
        Ok(id)
    }

    /// Partial update of static metadata. Reservations are untouched; the
    /// new capacity applies to future creates/modifies only.
    pub async fn update_space(&self, space_id: Ulid, patch: SpacePatch) -> Result<(), EngineError> {
        if let Some(ref n) = patch.name {
            validate_name(n)?;
        }
        validate_description(patch.description.as_deref())?;
        if patch.capacity == Some(0) {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }

        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = ss.write().await;
        if guard.removed {
            return Err(EngineError::NotFound(space_id));
        }

        let renamed_from = if let Some(ref new_name) = patch.name
            && *new_name != guard.name
        {
            match self.names.entry(new_name.clone()) {
                Entry::Occupied(e) => return Err(EngineError::AlreadyExists(*e.get())),
                Entry::Vacant(v) => {
                    v.insert(space_id);
                }
            }
            Some(guard.name.clone())
        } else {
            None
        };

        let event = Event::SpaceUpdated {
            id: space_id,
            name: patch.name.clone().unwrap_or_else(|| guard.name.clone()),
            location: patch.location.clone().unwrap_or_else(|| guard.location.clone()),
            capacity: patch.capacity.unwrap_or(guard.capacity),
            kind: patch.kind.unwrap_or(guard.kind),
            facilities: patch
                .facilities
                .clone()
                .unwrap_or_else(|| guard.facilities.clone()),
            description: patch.description.clone().or_else(|| guard.description.clone()),
        };
        if let Err(e) = self.persist_and_apply(space_id, &mut guard, &event).await {
            if renamed_from.is_some()
                && let Some(ref new_name) = patch.name
            {
                self.names.remove(new_name);
            }
            return Err(e);
        }
        if let Some(old) = renamed_from {
            self.names.remove(&old);
        }
        Ok(())
    }

    /// Remove a space. Refused while any reservation still claims a window;
    /// historical records go with the space.
    pub async fn remove_space(&self, space_id: Ulid) -> Result<(), EngineError> {
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let mut guard = ss.write().await;
        if guard.removed {
            return Err(EngineError::NotFound(space_id));
        }
        if guard.active_count() > 0 {
            return Err(EngineError::HasActiveReservations(space_id));
        }

        let event = Event::SpaceRemoved { id: space_id };
        self.wal_append(&event).await?;
        // Mark the state itself before the map entry goes: a writer already
        // queued on this lock must observe the removal once it gets in.
        guard.removed = true;
        for r in &guard.reservations {
            self.reservation_to_space.remove(&r.id);
        }
        self.names.remove(&guard.name);
        drop(guard);
        self.spaces.remove(&space_id);
        self.notify.send(space_id, &event);
        self.notify.remove(&space_id);
        metrics::gauge!(observability::SPACES_ACTIVE).set(self.spaces.len() as f64);
        info!("removed space {space_id}");
        Ok(())
    }
}
