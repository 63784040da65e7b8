use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceType {
    Individual,
    Group,
    Mentoring,
}

impl SpaceType {
    pub fn label(&self) -> &'static str {
        match self {
            SpaceType::Individual => "individual",
            SpaceType::Group => "group",
            SpaceType::Mentoring => "mentoring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facility {
    Lighting,
    PowerOutlet,
    Projector,
    Whiteboard,
    InteractiveScreen,
    OnlineMeetingDevice,
    AirConditioner,
}

/// Displayed room status. Derived from reservation state except for
/// `Maintenance`, which is an external override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceStatus {
    Empty,
    Reserved,
    InUse,
    Maintenance,
}

impl SpaceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SpaceStatus::Empty => "empty",
            SpaceStatus::Reserved => "reserved",
            SpaceStatus::InUse => "in_use",
            SpaceStatus::Maintenance => "maintenance",
        }
    }
}

/// Reservation lifecycle states. `Pending` is legal but never produced;
/// it is reserved for a future approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Active reservations are the only ones that claim their window.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::CheckedOut | ReservationStatus::Cancelled | ReservationStatus::NoShow
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    IndividualStudy,
    GroupStudy,
    ProjectWork,
    Mentoring,
    Other,
}

/// Caller role, supplied per call by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Technical,
    Admin,
}

/// Verified caller identity, supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub building: String,
    pub floor: i32,
    pub room_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub space_id: Ulid,
    pub requester: Requester,
    pub window: Window,
    pub participants: u32,
    pub purpose: Purpose,
    pub notes: Option<String>,
    pub status: ReservationStatus,
    pub check_in_time: Option<Ms>,
    pub check_out_time: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
    /// Bumped on every mutation; optimistic-concurrency token.
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct SpaceState {
    pub id: Ulid,
    pub name: String,
    pub location: Location,
    /// Max participants (at least 1).
    pub capacity: u32,
    pub kind: SpaceType,
    pub facilities: Vec<Facility>,
    pub description: Option<String>,
    /// Last persisted projection (or override) of this space's status.
    pub status: SpaceStatus,
    /// True while an external maintenance override is in force.
    pub override_active: bool,
    /// Monotonic per-space projection sequence; stale writes are ignored.
    pub status_seq: u64,
    /// True once removal has committed. Checked after lock acquisition;
    /// the map entry is deleted only after the removing guard drops.
    pub removed: bool,
    /// All reservations (active and historical), sorted by `window.start`.
    pub reservations: Vec<Reservation>,
}

impl SpaceState {
    pub fn new(
        id: Ulid,
        name: String,
        location: Location,
        capacity: u32,
        kind: SpaceType,
        facilities: Vec<Facility>,
        description: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            location,
            capacity,
            kind,
            facilities,
            description,
            status: SpaceStatus::Empty,
            override_active: false,
            status_seq: 0,
            removed: false,
            reservations: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by window.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.window.start, |r| r.window.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove a reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose window overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.window.end > query.start)
    }

    /// First currently checked-in reservation, if any.
    pub fn occupant(&self) -> Option<&Reservation> {
        self.reservations
            .iter()
            .find(|r| r.status == ReservationStatus::CheckedIn)
    }

    pub fn has_facilities(&self, required: &[Facility]) -> bool {
        required.iter().all(|f| self.facilities.contains(f))
    }

    /// Reservations still claiming their window.
    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.status.is_active()).count()
    }

    /// Snapshot view with the given (live-derived) status.
    pub fn info(&self, status: SpaceStatus) -> SpaceInfo {
        SpaceInfo {
            id: self.id,
            name: self.name.clone(),
            location: self.location.clone(),
            capacity: self.capacity,
            kind: self.kind,
            facilities: self.facilities.clone(),
            description: self.description.clone(),
            status,
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceRegistered {
        id: Ulid,
        name: String,
        location: Location,
        capacity: u32,
        kind: SpaceType,
        facilities: Vec<Facility>,
        description: Option<String>,
    },
    /// Carries the resulting metadata, not the patch.
    SpaceUpdated {
        id: Ulid,
        name: String,
        location: Location,
        capacity: u32,
        kind: SpaceType,
        facilities: Vec<Facility>,
        description: Option<String>,
    },
    SpaceRemoved {
        id: Ulid,
    },
    /// Carries the full record; compaction re-emits historical reservations
    /// through the same variant.
    ReservationCreated {
        reservation: Reservation,
    },
    /// Carries the resulting fields, not the patch.
    ReservationModified {
        space_id: Ulid,
        id: Ulid,
        window: Window,
        participants: u32,
        purpose: Purpose,
        notes: Option<String>,
        at: Ms,
        version: u64,
    },
    ReservationCancelled {
        space_id: Ulid,
        id: Ulid,
        at: Ms,
        version: u64,
    },
    CheckedIn {
        space_id: Ulid,
        id: Ulid,
        at: Ms,
        version: u64,
    },
    CheckedOut {
        space_id: Ulid,
        id: Ulid,
        at: Ms,
        version: u64,
    },
    NoShowMarked {
        space_id: Ulid,
        id: Ulid,
        at: Ms,
        version: u64,
    },
    StatusProjected {
        space_id: Ulid,
        seq: u64,
        status: SpaceStatus,
    },
    OverrideSet {
        space_id: Ulid,
        seq: u64,
    },
    /// Carries the status re-derived at clear time.
    OverrideCleared {
        space_id: Ulid,
        seq: u64,
        status: SpaceStatus,
    },
}

// ── Patch types (typed partial updates) ──────────────────────────

/// Fields present are applied; absent fields keep their stored value.
/// `start` and `end` patch independently; the resulting window is
/// re-validated as a whole.
#[derive(Debug, Clone, Default)]
pub struct ReservationPatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub participants: Option<u32>,
    pub purpose: Option<Purpose>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SpacePatch {
    pub name: Option<String>,
    pub location: Option<Location>,
    pub capacity: Option<u32>,
    pub kind: Option<SpaceType>,
    pub facilities: Option<Vec<Facility>>,
    pub description: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceInfo {
    pub id: Ulid,
    pub name: String,
    pub location: Location,
    pub capacity: u32,
    pub kind: SpaceType,
    pub facilities: Vec<Facility>,
    pub description: Option<String>,
    /// Live derivation at read time, not the last persisted value.
    pub status: SpaceStatus,
}

/// Current occupancy as shown to displays. Never carries the requester's
/// email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub reservation_id: Ulid,
    pub requester_id: String,
    pub requester_name: String,
    pub window: Window,
    pub check_in_time: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusView {
    pub space: SpaceInfo,
    pub occupied: bool,
    pub occupant: Option<Occupant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub total: u32,
    pub empty: u32,
    pub reserved: u32,
    pub in_use: u32,
    pub maintenance: u32,
    pub by_type: Vec<(SpaceType, u32)>,
    pub by_building: Vec<(String, u32)>,
    /// Share of spaces currently in use, 0.0..=100.0.
    pub utilization: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<SpaceType>,
    pub min_capacity: Option<u32>,
    pub building: Option<String>,
    pub facilities: Vec<Facility>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Full filtered count, not the page length.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size.max(1))
    }
}
