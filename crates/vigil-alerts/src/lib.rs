//! `vigil-alerts` — the alert & recovery pipeline.
//!
//! Every alert walks the same road:
//!
//! ```text
//!                          +-----(ack)------+
//!                          |                v
//!   new → classified → notified → active → acknowledged
//!                          |        |
//!                          |        +--(90 s, critical only)--→ escalated
//!                          +--(outside window, non-emergency)--→ logged_only
//! ```
//!
//! Classification is a fixed table keyed by alert type. Non-emergency alerts
//! raised outside the venue's service window are persisted but never
//! notified. Types with an auto-fix recipe get one recovery attempt before
//! notification; the attempt's outcome is recorded on the persisted row.
//! Critical alerts arm a 90-second escalation timer that an
//! acknowledgement cancels.

pub mod classify;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod recipes;
pub mod store;
pub mod types;

pub use classify::classify;
pub use error::{AlertError, Result};
pub use pipeline::{AlertNotifier, AlertPipeline, RecoveryDispatcher, WindowOracle};
pub use store::AlertStore;
pub use types::{Alert, AlertState};
