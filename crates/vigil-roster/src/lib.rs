//! `vigil-roster` — who answers for a venue, and when.
//!
//! Three cooperating pieces:
//!
//! * the **TD roster** — one row per `(venue, telegram user)`, written by
//!   `/register CODE`;
//! * the **on-call rotation** — at most one roster member holds the current
//!   ISO week per venue; selection falls back primary → oldest;
//! * the **swap protocol** — in-memory requests with a 24 h TTL, confirmed
//!   by the target replying `/confirmswap`.
//!
//! Guest tokens (`GUEST-xxxxxxxx`, 24 h, first-claim-wins) grant a venue
//! identity without a roster row; a daily sweep removes expired ones.

pub mod db;
pub mod error;
pub mod store;
pub mod swap;
pub mod types;

pub use error::{Result, RosterError};
pub use store::RosterStore;
pub use swap::{SwapBook, SwapRequest};
pub use types::{GuestToken, OnCallEntry, RosterMember};
