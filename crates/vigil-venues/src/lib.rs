//! `vigil-venues` — persisted venue records: registration, bearer tokens,
//! service schedules, event expiry, and maintenance windows.
//!
//! The relay owns all venue rows; every other component reads through
//! [`VenueStore`]. SQLite runs in WAL mode with a single writer behind the
//! store's mutex, so read-heavy callers (schedule ticks, session attach)
//! never contend with admin mutations for long.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, VenueError};
pub use store::VenueStore;
pub use types::{MaintenanceWindow, ScheduleType, ServiceTime, Venue};
