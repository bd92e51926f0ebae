//! `vigil-schedule` — service-window computation and edge detection.
//!
//! A venue is "in window" while a scheduled service (±30 minutes of slack on
//! both ends) is running, or — for event venues — until the event expires.
//! Maintenance windows override everything: overlapping `now` forces the
//! venue out of window.
//!
//! The [`engine::ScheduleEngine`] re-evaluates every venue once a minute and
//! fires registered callbacks on rising (`onOpen`) and falling (`onClose`)
//! edges. Window membership is a pure function of the venue's schedule,
//! event expiry, maintenance windows, and the clock — [`window::is_in_window`]
//! can be (and is) tested without an engine.
//!
//! The [`prechecks::PreServiceScheduler`] rides on the same window math: it
//! looks for services starting 25–35 minutes out and runs a one-shot system
//! check per venue, at most once every two hours.

pub mod engine;
pub mod prechecks;
pub mod window;

pub use engine::{ScheduleEngine, WindowEdge};
pub use prechecks::{CheckDispatcher, CheckNotifier, PreServiceScheduler};
