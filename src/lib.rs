//! Reservation conflict engine and room-status state machine for shared
//! study spaces, persisted through an append-only WAL.

pub mod clock;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod wal;

pub use engine::{Engine, EngineError};
