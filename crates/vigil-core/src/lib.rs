//! `vigil-core` — shared foundation for the Vigil agent and relay.
//!
//! Holds the pieces every other crate needs: the persisted configuration
//! layer, the wire-level error taxonomy, venue/command/alert identifiers,
//! HMAC-signed venue bearer tokens, and the `enc:` envelope used for
//! sensitive values in the on-disk config file.

pub mod config;
pub mod error;
pub mod sealed;
pub mod token;
pub mod types;

pub use error::{CoreError, ErrorCode, Result};
pub use types::{AlertId, CommandId, Severity, VenueId};
